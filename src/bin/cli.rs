//! Channelstore CLI
//!
//! Command-line interface for Channelstore operations:
//! - Print a config template
//! - Mint access tokens
//! - Query and ingest samples through the API
//! - Inspect and change partitioning and retention

use anyhow::{bail, Context};
use channelstore::api::{JwtManager, Role};
use channelstore::client::{collect_trials, ApiClient};
use channelstore::config::{generate_default_config, Config};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "channelstore-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multichannel time-series store")]
#[command(long_about = "Channelstore keeps sources, measures, channels and chunks in a catalog\nand stores their samples in time partitions. This tool talks to its REST API.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// API server URL (overrides [client].url)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Bearer token (overrides [client].token)
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Mint an access token signed with the configured secret
    Token {
        /// Role group (api_admin, api_consumer, api_producer)
        #[arg(short, long, default_value = "api_consumer")]
        role: Vec<String>,
        /// Token subject
        #[arg(short, long, default_value = "cli")]
        subject: String,
    },

    /// List the endpoints the API advertises
    Endpoints,

    /// Query samples of one measure
    Query {
        /// Source label
        #[arg(long)]
        source: String,
        /// Measure label
        #[arg(long)]
        measure: String,
        /// Channel labels (comma-separated)
        #[arg(long)]
        channels: Option<String>,
        /// Chunk labels (comma-separated); groups results by chunk
        #[arg(long)]
        chunks: Option<String>,
        /// Aggregate values instead of returning raw samples
        #[arg(long)]
        stats: bool,
        /// Timestamp flags, e.g. "single relative"
        #[arg(long)]
        timestamps: Option<String>,
        /// Page number
        #[arg(long, default_value = "1")]
        page: u64,
        /// Page size (server default when unset)
        #[arg(long)]
        page_size: Option<u64>,
        /// Split the page into concurrent requests of this size
        #[arg(long)]
        batch_size: Option<u64>,
        /// Follow `next` links until the last page
        #[arg(long)]
        all: bool,
    },

    /// Ingest a JSON payload file
    Ingest {
        /// Path to a `{source, measure, chunk?, timestamps, values}` file
        path: PathBuf,
        /// Timestamps per request (default: one request)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Show or change partitioning and retention
    Retention {
        /// New partition width, e.g. "1 day"
        #[arg(long)]
        chunk_interval: Option<String>,
        /// New retention window, e.g. "30 days" ("none" removes it)
        #[arg(long)]
        retention_interval: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::from_env(),
    };

    match &cli.command {
        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(path, content)
                        .with_context(|| format!("Failed to write {:?}", path))?;
                    println!("Config written to {:?}", path);
                }
                None => print!("{}", content),
            }
        }

        Commands::Token { role, subject } => {
            let roles = role
                .iter()
                .flat_map(|r| r.split(','))
                .map(|r| r.trim().parse::<Role>().map_err(anyhow::Error::msg))
                .collect::<anyhow::Result<Vec<Role>>>()?;

            let jwt = JwtManager::new(config.auth_config());
            let token = jwt.generate_token(subject, &roles)?;
            println!("{}", token);
        }

        Commands::Endpoints => {
            let api = connect(&cli, &config).await?;

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(api.endpoints())?);
            } else {
                println!("{:<20} {}", "Name", "URL");
                println!("{}", "-".repeat(60));
                for (name, url) in api.endpoints() {
                    println!("{:<20} {}", name, url);
                }
            }
        }

        Commands::Query {
            source,
            measure,
            channels,
            chunks,
            stats,
            timestamps,
            page,
            page_size,
            batch_size,
            all,
        } => {
            let mut params = Map::new();
            params.insert("source".to_string(), json!(source));
            params.insert("measure".to_string(), json!(measure));
            params.insert("channels".to_string(), json!(channels));
            params.insert("chunks".to_string(), json!(chunks));
            params.insert("timestamps".to_string(), json!(timestamps));
            if *stats {
                params.insert("stats".to_string(), json!(true));
            }
            params.insert("page".to_string(), json!(page));
            params.insert("page_size".to_string(), json!(page_size));

            let api = connect(&cli, &config).await?;
            let endpoint = api.endpoint("timeserie")?;

            let pages = match (*all, batch_size) {
                (true, _) => endpoint.get_all(&params).await?,
                (false, Some(size)) => {
                    if page_size.is_none() {
                        bail!("--batch-size needs --page-size");
                    }
                    endpoint.get_in_batches(&params, *size).await?
                }
                (false, None) => vec![endpoint.get(&params).await?],
            };

            if cli.format == "json" {
                let output = if pages.len() == 1 {
                    pages[0].clone()
                } else {
                    Value::Array(pages)
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_query_summary(&pages, *stats);
            }
        }

        Commands::Ingest { path, batch_size } => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            let payload: Value = serde_json::from_str(&content)
                .with_context(|| format!("{:?} is not valid JSON", path))?;

            let api = connect(&cli, &config).await?;
            let endpoint = api.endpoint("timeserie")?;

            let responses = match batch_size {
                Some(size) => endpoint.post_in_batches(&payload, *size).await?,
                None => vec![endpoint.post(&payload).await?],
            };

            let created: u64 = responses
                .iter()
                .filter_map(|r| r["objects_created"].as_u64())
                .sum();
            println!(
                "Stored {} samples in {} request(s)",
                created,
                responses.len()
            );
        }

        Commands::Retention {
            chunk_interval,
            retention_interval,
        } => {
            let api = connect(&cli, &config).await?;
            let endpoint = api.endpoint("timescale-config")?;

            let report = if chunk_interval.is_none() && retention_interval.is_none() {
                endpoint.get(&Map::new()).await?
            } else {
                let mut body = Map::new();
                if let Some(interval) = chunk_interval {
                    body.insert("chunk_interval".to_string(), json!(interval));
                }
                if let Some(interval) = retention_interval {
                    body.insert("retention_interval".to_string(), json!(interval));
                }
                endpoint.post(&Value::Object(body)).await?
            };

            if cli.format == "json" {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Observed chunk interval:   {}",
                    report["chunk_interval"].as_str().unwrap_or("-")
                );
                println!(
                    "Configured chunk interval: {}",
                    report["configured_chunk_interval"].as_str().unwrap_or("-")
                );
                println!(
                    "Retention interval:        {}",
                    report["retention_interval"].as_str().unwrap_or("none")
                );
            }
        }
    }

    Ok(())
}

async fn connect(cli: &Cli, config: &Config) -> anyhow::Result<ApiClient> {
    let mut client_config = config.client_config();
    if let Some(url) = &cli.api_url {
        client_config.base_url = url.clone();
    }
    if let Some(token) = &cli.token {
        client_config.token = Some(token.clone());
    }

    let url = client_config.base_url.clone();
    ApiClient::connect(client_config)
        .await
        .with_context(|| format!("Cannot reach Channelstore API at {}", url))
}

fn print_query_summary(pages: &[Value], stats: bool) {
    if let Some(count) = pages.first().and_then(|p| p["count"].as_i64()) {
        println!("Total: {}", count);
        println!();
    }

    if stats {
        println!(
            "{:<16} {:>12} {:>12} {:>12} {:>12}",
            "Channel", "Avg", "Std", "Min", "Max"
        );
        println!("{}", "-".repeat(68));
        for page in pages {
            let documents = match &page["results"] {
                Value::Array(docs) => docs.clone(),
                doc => vec![doc.clone()],
            };
            for doc in documents {
                let Some(values) = doc["values"].as_object() else {
                    continue;
                };
                for (label, s) in values {
                    let name = match doc["chunk"].as_str() {
                        Some(chunk) => format!("{}/{}", chunk, label),
                        None => label.clone(),
                    };
                    println!(
                        "{:<16} {:>12.4} {:>12.4} {:>12.4} {:>12.4}",
                        name,
                        s["avg"].as_f64().unwrap_or(f64::NAN),
                        s["std"].as_f64().unwrap_or(f64::NAN),
                        s["min"].as_f64().unwrap_or(f64::NAN),
                        s["max"].as_f64().unwrap_or(f64::NAN),
                    );
                }
            }
        }
        return;
    }

    let trials = collect_trials(pages);
    println!("{:<8} {:<16} {:>10} {:>10}", "Trial", "Chunk", "Channels", "Samples");
    println!("{}", "-".repeat(48));
    for (i, trial) in trials.data.iter().enumerate() {
        let samples = trial.first().map(Vec::len).unwrap_or(0);
        println!(
            "{:<8} {:<16} {:>10} {:>10}",
            i + 1,
            trials.classes.get(i).map(String::as_str).unwrap_or("-"),
            trial.len(),
            samples
        );
    }
}

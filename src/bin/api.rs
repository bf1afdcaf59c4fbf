//! Channelstore API Server
//!
//! Run with: cargo run --bin channelstore-api
//!
//! # Configuration
//!
//! Reads `--config <path>` or the first of `~/.config/channelstore/config.toml`,
//! `/etc/channelstore/config.toml` and `./config.toml`. `CHANNELSTORE_*`
//! environment variables override file settings and `RUST_LOG` overrides the
//! configured log level.

use anyhow::Context;
use channelstore::api::{serve, AppState};
use channelstore::config::{Config, LoggingConfig};
use channelstore::storage::{start_retention_task, Store};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "channelstore-api")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Channelstore REST API server")]
struct Args {
    /// Config file (default: search the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    init_tracing(&config.logging);

    tracing::info!("Starting Channelstore API server v{}", env!("CARGO_PKG_VERSION"));

    let store_config = config.store_config()?;
    if let Some(dir) = store_config.path.as_ref().and_then(|p| p.parent()) {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create data directory {:?}", dir))?;
        }
    }
    tracing::info!("Database: {:?}", store_config.path);

    let store = Arc::new(Store::open(store_config).context("Failed to open store")?);
    tracing::info!("Store opened: {}", store.stats()?);

    if !config.auth.enabled {
        tracing::warn!("Authentication is disabled; every caller is treated as an admin");
    }

    // Background retention
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention = config.retention.enabled.then(|| {
        let period = std::time::Duration::from_secs(config.retention.check_interval_secs.max(1));
        tracing::info!("Retention job checks every {:?}", period);
        start_retention_task(&store, period, shutdown_rx)
    });

    let api_config = config.server_config();
    let state = AppState::new(Arc::clone(&store), api_config.clone(), config.auth_config());

    serve(state, &api_config).await?;

    // Graceful shutdown
    let _ = shutdown_tx.send(true);
    if let Some(handle) = retention {
        handle.await.context("Retention task panicked")?;
    }
    tracing::info!("Channelstore API server stopped");

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("channelstore={},tower_http=debug", logging.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

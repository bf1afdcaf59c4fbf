//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::api::{ApiConfig as ServerConfig, AuthConfig};
use crate::client::ClientConfig;
use crate::storage::{parse_interval, StoreConfig};

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "CHANNELSTORE_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub client: ClientSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_chunk_interval")]
    pub chunk_interval: String,

    #[serde(default)]
    pub retention_interval: Option<String>,
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| {
            p.join("channelstore")
                .join("channelstore.db")
                .to_string_lossy()
                .to_string()
        })
        .unwrap_or_else(|| "./channelstore_data/channelstore.db".to_string())
}

fn default_batch_size() -> usize {
    1000
}

fn default_chunk_interval() -> String {
    "1 hours".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            batch_size: default_batch_size(),
            chunk_interval: default_chunk_interval(),
            retention_interval: None,
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub public_url: Option<String>,

    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,

    #[serde(default = "default_page_size")]
    pub page_size: u64,

    #[serde(default = "default_timeserie_page_size")]
    pub timeserie_page_size: u64,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_size_mb() -> usize {
    100
}

fn default_page_size() -> u64 {
    16
}

fn default_timeserie_page_size() -> u64 {
    1024
}

fn default_max_page_size() -> u64 {
    10_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
            max_body_size_mb: default_max_body_size_mb(),
            page_size: default_page_size(),
            timeserie_page_size: default_timeserie_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

/// Token authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSettings {
    #[serde(default = "default_auth_enabled")]
    pub enabled: bool,

    #[serde(default = "default_secret")]
    pub secret: String,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_audience")]
    pub audience: String,

    #[serde(default = "default_token_ttl")]
    pub token_ttl_hours: i64,
}

fn default_auth_enabled() -> bool {
    true
}

fn default_secret() -> String {
    "change-me".to_string()
}

fn default_issuer() -> String {
    "channelstore".to_string()
}

fn default_audience() -> String {
    "channelstore-api".to_string()
}

fn default_token_ttl() -> i64 {
    24
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: default_auth_enabled(),
            secret: default_secret(),
            issuer: default_issuer(),
            audience: default_audience(),
            token_ttl_hours: default_token_ttl(),
        }
    }
}

/// Background retention job
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_enabled")]
    pub enabled: bool,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

fn default_retention_enabled() -> bool {
    true
}

fn default_check_interval() -> u64 {
    3600
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: default_retention_enabled(),
            check_interval_secs: default_check_interval(),
        }
    }
}

/// API client used by the CLI
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_client_url")]
    pub url: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub max_concurrency: Option<usize>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_post_timeout")]
    pub post_timeout_secs: u64,
}

fn default_client_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    5 * 60
}

fn default_post_timeout() -> u64 {
    100 * 60
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: default_client_url(),
            token: None,
            max_concurrency: None,
            request_timeout_secs: default_request_timeout(),
            post_timeout_secs: default_post_timeout(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("channelstore").join("config.toml")),
            Some(PathBuf::from("/etc/channelstore/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply `CHANNELSTORE_*` environment variables to an existing config
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok());
    }

    /// Apply overrides from `lookup`, keyed without the `CHANNELSTORE_` prefix
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Storage overrides
        if let Some(path) = lookup("DB_PATH") {
            self.storage.path = path;
        }
        if let Some(interval) = lookup("CHUNK_INTERVAL") {
            self.storage.chunk_interval = interval;
        }
        if let Some(interval) = lookup("RETENTION_INTERVAL") {
            self.storage.retention_interval = Some(interval);
        }

        // API overrides
        if let Some(host) = lookup("API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }
        if let Some(url) = lookup("PUBLIC_URL") {
            self.api.public_url = Some(url);
        }

        // Auth overrides
        if let Some(enabled) = lookup("AUTH_ENABLED") {
            if let Ok(flag) = enabled.parse() {
                self.auth.enabled = flag;
            }
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            self.auth.secret = secret;
        }

        // Client overrides
        if let Some(url) = lookup("API_URL") {
            self.client.url = url;
        }
        if let Some(token) = lookup("API_TOKEN") {
            self.client.token = Some(token);
        }

        // Logging overrides
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Store settings, with interval strings parsed
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        let chunk_interval =
            parse_interval(&self.storage.chunk_interval).map_err(|e| ConfigError::Invalid {
                key: "storage.chunk_interval".to_string(),
                error: e.to_string(),
            })?;

        let retention = self
            .storage
            .retention_interval
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .map(parse_interval)
            .transpose()
            .map_err(|e| ConfigError::Invalid {
                key: "storage.retention_interval".to_string(),
                error: e.to_string(),
            })?;

        let path = match self.storage.path.as_str() {
            ":memory:" => None,
            path => Some(expand_home(path)),
        };

        Ok(StoreConfig {
            path,
            batch_size: self.storage.batch_size,
            chunk_interval,
            retention,
        })
    }

    /// Settings for the HTTP server
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.api.host.clone(),
            port: self.api.port,
            public_url: self.api.public_url.clone(),
            max_body_size: self.api.max_body_size_mb * 1024 * 1024,
            page_size: self.api.page_size,
            timeserie_page_size: self.api.timeserie_page_size,
            max_page_size: self.api.max_page_size,
        }
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            enabled: self.auth.enabled,
            secret: self.auth.secret.clone(),
            issuer: self.auth.issuer.clone(),
            audience: self.auth.audience.clone(),
            token_ttl_hours: self.auth.token_ttl_hours,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.client.url.clone(),
            token: self.client.token.clone(),
            max_concurrency: self.client.max_concurrency,
            request_timeout_secs: self.client.request_timeout_secs,
            post_timeout_secs: self.client.post_timeout_secs,
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value for {key}: {error}")]
    Invalid { key: String, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Channelstore Configuration
#
# Environment variables override these settings:
# - CHANNELSTORE_DB_PATH
# - CHANNELSTORE_CHUNK_INTERVAL
# - CHANNELSTORE_RETENTION_INTERVAL
# - CHANNELSTORE_API_HOST
# - CHANNELSTORE_API_PORT
# - CHANNELSTORE_PUBLIC_URL
# - CHANNELSTORE_AUTH_ENABLED
# - CHANNELSTORE_JWT_SECRET
# - CHANNELSTORE_API_URL
# - CHANNELSTORE_API_TOKEN
# - CHANNELSTORE_LOG_LEVEL
# - CHANNELSTORE_LOG_FORMAT

[storage]
# SQLite database file (":memory:" for a throwaway store)
path = "~/.local/share/channelstore/channelstore.db"

# Rows per INSERT statement when ingesting (1..=8000)
batch_size = 1000

# Width of new time partitions
chunk_interval = "1 hours"

# Drop partitions older than this (unset keeps everything)
# retention_interval = "30 days"

[api]
# API server host
host = "0.0.0.0"

# API server port
port = 8000

# Base URL used in pagination links (derived from the Host header when unset)
# public_url = "https://channelstore.example.org"

# Maximum request body size (MB)
max_body_size_mb = 100

# Default page sizes
page_size = 16
timeserie_page_size = 1024

# Upper bound for a client-provided page_size
max_page_size = 10000

[auth]
# Require a bearer token on every endpoint but /health
enabled = true

# HS256 signing secret, change this in production
secret = "change-me"

issuer = "channelstore"
audience = "channelstore-api"

# Lifetime of tokens minted by `channelstore-cli token` (hours)
token_ttl_hours = 24

[retention]
# Run the background retention job
enabled = true

# How often the job checks for expired partitions (seconds)
check_interval_secs = 3600

[client]
# API used by channelstore-cli
url = "http://localhost:8000"

# Bearer token
# token = ""

# Maximum concurrent requests for batched calls (unbounded when unset)
# max_concurrency = 8

# Timeouts (seconds)
request_timeout_secs = 300
post_timeout_secs = 6000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

//! # Channelstore
//!
//! Multichannel time-series store with a REST API - catalog records for
//! sources, measures, channels and chunks, bulk sample ingestion, and paginated
//! queries with optional per-channel statistics.
//!
//! ## Features
//!
//! - **Embedded storage**: SQLite with time partitions and age-based retention
//! - **Bulk ingestion**: one transaction per payload, duplicates rejected as a whole
//! - **Aggregated queries**: raw or summarised series, absolute or relative time
//! - **Role-based access**: JWT bearer tokens for admins, consumers and producers
//! - **Async client**: endpoint discovery, page following and batched requests
//!
//! ## Modules
//!
//! - [`storage`]: Catalog, samples, partitions and retention
//! - [`timeserie`]: Ingestion and query shaping
//! - [`api`]: REST API server with Axum
//! - [`client`]: Async REST client
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use channelstore::storage::{Store, StoreConfig};
//! use channelstore::timeserie::{ingest, IngestRequest};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::open(StoreConfig::new("./data/channelstore.db"))?;
//!
//!     let request: IngestRequest = serde_json::from_str(r#"{
//!         "source": "openbci",
//!         "measure": "eeg",
//!         "timestamps": [1704067200.0, 1704067200.004],
//!         "values": {"c3": [12.5, 13.1]}
//!     }"#)?;
//!
//!     let summary = ingest(&store, &request)?;
//!     println!("Stored {} samples", summary.objects_created);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod storage;
pub mod timeserie;

// Re-export top-level types for convenience
pub use storage::{
    Channel, Chunk, Measure, Source, StorageError, StorageResult, Store, StoreConfig, StoreStats,
};

pub use timeserie::{IngestError, IngestRequest, QueryError, QueryParams, TimeserieQuery};

pub use api::{build_router, serve, ApiError, AppState, AuthConfig, Role};

pub use client::{collect_trials, ApiClient, ClientConfig, ClientError, Trials};

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig};

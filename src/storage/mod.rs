//! Channelstore Storage Engine
//!
//! This module provides the persistence layer:
//!
//! - **types**: Catalog records (Source, Measure, Channel, Chunk) and samples
//! - **schema**: SQLite tables and pragmas
//! - **filter**: Exact-match catalog filters and list windows
//! - **interval**: Interval expressions for partitioning and retention
//! - **engine**: The store orchestrating catalog, samples and partitions
//! - **retention**: Background retention job
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   SampleBatch → Chunk → Partitions → batched INSERT → channel counts (one transaction)
//!
//! Read Path:
//!   Channels → distinct timestamp window → per-channel series
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use channelstore::storage::{Store, StoreConfig, NewSource};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::open(StoreConfig::new("./data/channelstore.db"))?;
//!
//!     store.create_source(NewSource {
//!         label: "openbci".into(),
//!         name: "OpenBCI Cyton".into(),
//!         location: None,
//!         device: None,
//!         protocol: None,
//!         version: None,
//!         description: None,
//!         created: None,
//!     })?;
//!
//!     println!("{}", store.stats()?);
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod filter;
pub mod interval;
pub mod retention;
pub mod schema;
pub mod types;

// Re-export commonly used types
pub use engine::{
    ChunkTarget, EngineSettings, InsertReceipt, RetentionReport, SampleBatch, SampleKey, Store,
    StoreConfig, StoreStats,
};
pub use error::{StorageError, StorageResult};
pub use filter::{ChannelFilter, ChunkFilter, Filter, MeasureFilter, SourceFilter, Window};
pub use interval::{format_interval, parse_interval};
pub use retention::start_retention_task;
pub use types::{
    Channel, Chunk, Measure, NewChannel, NewChunk, NewMeasure, NewSource, Partition, Source,
    DEFAULT_CHUNK_LABEL,
};

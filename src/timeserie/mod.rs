//! Time-series ingestion and queries
//!
//! - **ingest**: payload validation and the bulk write path
//! - **query**: flag parsing, pagination and document shaping
//! - **stats**: value and timestamp aggregates
//! - **document**: the JSON shapes returned by queries
//! - **error**: Error types

pub mod document;
pub mod error;
pub mod ingest;
pub mod query;
pub mod stats;

pub use document::{Document, QueryResults, TimeColumn, TimeValue, Timestamps, ValueColumn};
pub use error::{FieldErrors, IngestError, QueryError};
pub use ingest::{ingest, IngestRequest, IngestSummary};
pub use query::{run, QueryPage, QueryParams, TimeserieQuery, TimestampMode};
pub use stats::{timestamp_stats, value_stats, TimestampStats, ValueStats};

//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use serde::{Deserialize, Serialize};

// ============================================
// TIMESERIE DTOs
// ============================================

/// Successful bulk write
#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    /// Always "success"
    pub status: String,
    pub message: String,
    /// Samples written
    pub objects_created: usize,
}

impl IngestResponse {
    pub fn success(objects_created: usize) -> Self {
        Self {
            status: "success".to_string(),
            message: "Your data has been successfully saved.".to_string(),
            objects_created,
        }
    }
}

// ============================================
// PARTITIONING DTOs
// ============================================

/// Body of `POST /timescale-config/`
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct TimescaleConfigRequest {
    /// New partition width, e.g. "1 hours"
    #[serde(default)]
    pub chunk_interval: Option<String>,
    /// New retention window, e.g. "30 days". Empty or "none" removes the policy.
    #[serde(default)]
    pub retention_interval: Option<String>,
}

/// Body of `GET /timescale-config/`
#[derive(Debug, Serialize, Deserialize)]
pub struct TimescaleConfigResponse {
    /// Observed width of the newest partition, or "not enough data"
    pub chunk_interval: String,
    /// Width used for partitions created from now on
    pub configured_chunk_interval: String,
    pub retention_interval: Option<String>,
}

// ============================================
// HEALTH DTOs
// ============================================

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status: "healthy" or "unhealthy"
    pub status: String,
    /// Store status: "ok" or "error"
    pub storage: String,
    /// Stored samples
    pub samples: Option<i64>,
    /// Server uptime in seconds
    pub uptime_seconds: u64,
    /// Service version
    pub version: String,
}

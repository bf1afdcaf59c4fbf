//! Core data types for the channelstore catalog and sample table
//!
//! This module defines the records stored in the database:
//! - `Source`, `Measure`, `Channel`, `Chunk`: the catalog hierarchy
//! - `Partition`: a time range of the sample table
//! - `New*`: creation payloads for the catalog records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label of the chunk used when an ingest does not name one
pub const DEFAULT_CHUNK_LABEL: &str = "default";

/// A data-producing entity (a device or an experiment)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub label: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub created: DateTime<Utc>,
}

/// A named grouping of channels under a source
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Measure {
    pub id: i64,
    pub label: String,
    pub name: String,
    pub description: Option<String>,
    /// Label of the owning source
    pub source: String,
}

/// A single data stream within a measure
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Channel {
    pub id: i64,
    pub label: String,
    pub name: String,
    pub unit: String,
    pub sampling_rate: Option<f64>,
    pub description: Option<String>,
    /// Samples ingested so far. Only ever incremented.
    pub count: i64,
    #[serde(skip)]
    pub measure_id: i64,
    /// Label of the owning measure
    pub measure: String,
    /// Label of the owning source
    pub source: String,
}

/// A logical batch of samples (a session or a trial)
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Chunk {
    pub id: i64,
    pub label: String,
    #[serde(skip)]
    pub measure_id: i64,
    pub measure: String,
    pub source: String,
}

/// A time range of the sample table, [range_start, range_end)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub id: i64,
    /// Start in microseconds since the epoch (inclusive)
    pub range_start: i64,
    /// End in microseconds since the epoch (exclusive)
    pub range_end: i64,
}

impl Partition {
    pub fn contains(&self, micros: i64) -> bool {
        micros >= self.range_start && micros < self.range_end
    }
}

/// Payload for creating a source
#[derive(Debug, Clone, Deserialize)]
pub struct NewSource {
    pub label: String,
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to the creation time
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

/// Payload for creating a measure
#[derive(Debug, Clone, Deserialize)]
pub struct NewMeasure {
    pub source: String,
    pub label: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Payload for creating a channel
#[derive(Debug, Clone, Deserialize)]
pub struct NewChannel {
    pub source: String,
    pub measure: String,
    pub label: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub sampling_rate: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Payload for creating a chunk
#[derive(Debug, Clone, Deserialize)]
pub struct NewChunk {
    pub source: String,
    pub measure: String,
    pub label: String,
}

/// Convert a timestamp to the stored representation
pub fn to_micros(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Convert the stored representation back to a timestamp
pub fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_micros_conversion() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        assert_eq!(from_micros(to_micros(&ts)), ts);
    }

    #[test]
    fn test_partition_contains() {
        let partition = Partition {
            id: 1,
            range_start: 1_000,
            range_end: 2_000,
        };
        assert!(partition.contains(1_000));
        assert!(partition.contains(1_999));
        assert!(!partition.contains(2_000));
        assert!(!partition.contains(999));
    }

    #[test]
    fn test_channel_serialization_hides_measure_id() {
        let channel = Channel {
            id: 3,
            label: "c3".to_string(),
            name: "C3".to_string(),
            unit: "uV".to_string(),
            sampling_rate: Some(250.0),
            description: None,
            count: 0,
            measure_id: 7,
            measure: "eeg".to_string(),
            source: "openbci".to_string(),
        };
        let json = serde_json::to_value(&channel).unwrap();
        assert!(json.get("measure_id").is_none());
        assert_eq!(json["measure"], "eeg");
        assert_eq!(json["count"], 0);
    }
}

//! Query documents
//!
//! The JSON shapes returned by `GET /timeserie/`:
//!
//! ```text
//! {source, measure, chunk?, timestamps?, values}
//! ```
//!
//! `values` is always keyed by channel label. `timestamps` is one flat column
//! in single mode and keyed by channel label otherwise.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::storage::types::from_micros;
use crate::timeserie::stats::{TimestampStats, ValueStats};

/// A rendered timestamp: RFC 3339 string or epoch milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeValue {
    Absolute(String),
    Relative(f64),
}

pub fn render_time(micros: i64, relative: bool) -> TimeValue {
    if relative {
        TimeValue::Relative(micros as f64 / 1_000.0)
    } else {
        TimeValue::Absolute(from_micros(micros).to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

/// Raw samples or their aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueColumn {
    Stats(ValueStats),
    Raw(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeColumn {
    Stats(TimestampStats),
    Raw(Vec<TimeValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Timestamps {
    PerChannel(BTreeMap<String, TimeColumn>),
    Single(TimeColumn),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub source: String,
    pub measure: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Timestamps>,
    pub values: BTreeMap<String, ValueColumn>,
}

impl Document {
    pub fn new(source: &str, measure: &str, chunk: Option<&str>) -> Self {
        Self {
            source: source.to_string(),
            measure: measure.to_string(),
            chunk: chunk.map(str::to_string),
            timestamps: None,
            values: BTreeMap::new(),
        }
    }
}

/// One page of query results: a single document, or one per chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryResults {
    Chunks(Vec<Document>),
    Single(Document),
}

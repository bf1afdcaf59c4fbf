//! Bulk ingestion
//!
//! Turns a nested `{source, measure, chunk?, timestamps, values}` payload into
//! a [`SampleBatch`] and hands it to the store.
//!
//! `timestamps` and every entry of `values` may be a list or a mapping; a
//! mapping contributes its values in document order. Numeric timestamps are
//! epoch seconds, strings are RFC 3339 (naive strings are read as UTC).

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::storage::{Chunk, ChunkTarget, SampleBatch, Store};
use crate::timeserie::error::{FieldErrors, IngestError};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Body of `POST /timeserie/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub measure: String,
    /// Empty or missing routes samples to the `"default"` chunk
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamps: Value,
    #[serde(default)]
    pub values: Map<String, Value>,
}

/// Result of a committed ingestion
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub objects_created: usize,
    pub chunk: Chunk,
}

/// Validate, resolve and write one payload
pub fn ingest(store: &Store, request: &IngestRequest) -> Result<IngestSummary, IngestError> {
    let batch = prepare(store, request)?;
    let receipt = store.insert_samples(&batch)?;

    tracing::info!(
        source = %request.source,
        measure = %request.measure,
        chunk = %receipt.chunk.label,
        rows = receipt.rows,
        "Timeserie ingested"
    );

    Ok(IngestSummary {
        objects_created: receipt.rows,
        chunk: receipt.chunk,
    })
}

/// Build the batch without writing anything
pub fn prepare(store: &Store, request: &IngestRequest) -> Result<SampleBatch, IngestError> {
    let (timestamps, values) = validate(request)?;

    let measure = store.find_measure(&request.source, &request.measure)?;
    let known = store.channels_of(measure.id, &[])?;

    let mut series = Vec::with_capacity(values.len());
    for (label, column) in values {
        match known.iter().find(|c| c.label == label) {
            Some(channel) => series.push((channel.id, column)),
            None => tracing::warn!(
                measure = %request.measure,
                channel = %label,
                "Skipping channel unknown to measure"
            ),
        }
    }

    let chunk = match request.chunk.as_deref() {
        Some(label) if !label.is_empty() => ChunkTarget::Create(label.to_string()),
        _ => ChunkTarget::Default,
    };

    Ok(SampleBatch {
        measure_id: measure.id,
        chunk,
        timestamps,
        series,
    })
}

type Columns = Vec<(String, Vec<f64>)>;

fn validate(request: &IngestRequest) -> Result<(Vec<DateTime<Utc>>, Columns), FieldErrors> {
    let mut errors = FieldErrors::new();

    if request.measure.trim().is_empty() {
        errors.add("measure", "This field may not be blank.");
    }

    let timestamps = match sequence(&request.timestamps).and_then(parse_timestamps) {
        Ok(ts) => ts,
        Err(message) => {
            errors.add("timestamps", message);
            Vec::new()
        }
    };

    if request.values.is_empty() {
        errors.add("values", "This field may not be empty.");
    }

    let mut columns = Vec::with_capacity(request.values.len());
    for (label, raw) in &request.values {
        let field = format!("values.{}", label);
        match sequence(raw).and_then(parse_values) {
            Ok(column) => {
                if errors.get("timestamps").is_none() && column.len() != timestamps.len() {
                    errors.add(
                        field,
                        format!(
                            "Expected {} values to match timestamps, got {}.",
                            timestamps.len(),
                            column.len()
                        ),
                    );
                } else {
                    columns.push((label.clone(), column));
                }
            }
            Err(message) => errors.add(field, message),
        }
    }

    errors.into_result()?;
    Ok((timestamps, columns))
}

/// Items of a list, or the values of a mapping in document order
fn sequence(value: &Value) -> Result<Vec<&Value>, String> {
    match value {
        Value::Array(items) => Ok(items.iter().collect()),
        Value::Object(map) => Ok(map.values().collect()),
        Value::Null => Err("This field is required.".to_string()),
        _ => Err("Expected a list or a mapping of items.".to_string()),
    }
}

fn parse_timestamps(items: Vec<&Value>) -> Result<Vec<DateTime<Utc>>, String> {
    let first = items
        .first()
        .ok_or_else(|| "This list may not be empty.".to_string())?;

    match first {
        Value::Number(_) => items
            .iter()
            .map(|item| {
                item.as_f64()
                    .ok_or_else(|| "Timestamps must all be numbers or all be strings.".to_string())
                    .and_then(from_epoch_seconds)
            })
            .collect(),
        Value::String(_) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| "Timestamps must all be numbers or all be strings.".to_string())
                    .and_then(parse_datetime)
            })
            .collect(),
        _ => Err("Timestamps must be epoch seconds or datetime strings.".to_string()),
    }
}

fn from_epoch_seconds(seconds: f64) -> Result<DateTime<Utc>, String> {
    if !seconds.is_finite() {
        return Err(format!("Invalid timestamp: {}", seconds));
    }
    DateTime::<Utc>::from_timestamp_micros((seconds * 1_000_000.0).round() as i64)
        .ok_or_else(|| format!("Timestamp out of range: {}", seconds))
}

/// Parse an RFC 3339 / ISO 8601 string; values without an offset are UTC
pub fn parse_datetime(input: &str) -> Result<DateTime<Utc>, String> {
    let input = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
    }
    Err(format!("Datetime has wrong format: {}", input))
}

fn parse_values(items: Vec<&Value>) -> Result<Vec<f64>, String> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .map(|v| match v {
            Some(v) if v.is_finite() => Ok(v),
            Some(v) => Err(format!("Value must be finite: {}", v)),
            None => Err("A valid number is required.".to_string()),
        })
        .collect()
}

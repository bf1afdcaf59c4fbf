//! Per-channel aggregates
//!
//! Value statistics use the population standard deviation. Timestamp
//! statistics report durations and consecutive deltas in milliseconds.

use serde::{Deserialize, Serialize};

use crate::timeserie::document::{render_time, TimeValue};

/// Summary of a channel's values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueStats {
    pub avg: f64,
    pub std: f64,
    pub max: f64,
    pub min: f64,
    pub sum: f64,
}

/// Summary of a channel's timestamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampStats {
    pub min: TimeValue,
    pub max: TimeValue,
    /// max - min, milliseconds
    pub duration: f64,
    pub delta_avg: Option<f64>,
    pub delta_std: Option<f64>,
    pub delta_max: Option<f64>,
    pub delta_min: Option<f64>,
}

/// `None` for an empty series
pub fn value_stats(values: &[f64]) -> Option<ValueStats> {
    if values.is_empty() {
        return None;
    }
    let (avg, std) = mean_std(values);
    let sum: f64 = values.iter().sum();
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);

    Some(ValueStats {
        avg,
        std,
        max,
        min,
        sum,
    })
}

/// Stats over microsecond timestamps. `None` for an empty series.
pub fn timestamp_stats(micros: &[i64], relative: bool) -> Option<TimestampStats> {
    let first = *micros.iter().min()?;
    let last = *micros.iter().max()?;

    let mut sorted = micros.to_vec();
    sorted.sort_unstable();
    let deltas: Vec<f64> = sorted
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) as f64 / 1_000.0)
        .collect();

    let (delta_avg, delta_std, delta_max, delta_min) = if deltas.is_empty() {
        (None, None, None, None)
    } else {
        let (avg, std) = mean_std(&deltas);
        let max = deltas.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = deltas.iter().copied().fold(f64::INFINITY, f64::min);
        (Some(avg), Some(std), Some(max), Some(min))
    };

    Some(TimestampStats {
        min: render_time(first, relative),
        max: render_time(last, relative),
        duration: (last - first) as f64 / 1_000.0,
        delta_avg,
        delta_std,
        delta_max,
        delta_min,
    })
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

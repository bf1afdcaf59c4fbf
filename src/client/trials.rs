//! Trial extraction
//!
//! Flattens timeserie query pages into per-document channel matrices. When
//! the pages were grouped by chunk, each chunk is one trial and its label is
//! the trial's class.

use serde_json::Value;

use crate::client::http::INVALID_PAGE;

/// Channel matrices and their chunk labels
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Trials {
    /// One entry per document: one row of samples per channel
    pub data: Vec<Vec<Vec<f64>>>,
    /// Chunk label per document, empty for ungrouped pages
    pub classes: Vec<String>,
}

impl Trials {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Collect the raw channel values of every document in `pages`.
///
/// Pages that carry an `Invalid page.` error are skipped, as are channels
/// whose values were aggregated into stats.
pub fn collect_trials(pages: &[Value]) -> Trials {
    let mut trials = Trials::default();

    for page in pages {
        if is_invalid_page(page) {
            continue;
        }
        match page.get("results") {
            Some(Value::Object(document)) => trials.data.push(channel_rows(document)),
            Some(Value::Array(documents)) => {
                for document in documents.iter().filter_map(Value::as_object) {
                    trials.data.push(channel_rows(document));
                    if let Some(chunk) = document.get("chunk").and_then(Value::as_str) {
                        trials.classes.push(chunk.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    trials
}

fn is_invalid_page(page: &Value) -> bool {
    let message = page
        .pointer("/error/message")
        .or_else(|| page.get("detail"))
        .and_then(Value::as_str);
    message == Some(INVALID_PAGE)
}

fn channel_rows(document: &serde_json::Map<String, Value>) -> Vec<Vec<f64>> {
    document
        .get("values")
        .and_then(Value::as_object)
        .map(|values| {
            values
                .values()
                .filter_map(Value::as_array)
                .map(|row| row.iter().filter_map(Value::as_f64).collect())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_documents() {
        let pages = vec![
            json!({"count": 4, "results": {"values": {"c3": [1.0, 2.0], "c4": [3.0, 4.0]}}}),
            json!({"count": 4, "results": {"values": {"c3": [5.0, 6.0], "c4": [7.0, 8.0]}}}),
            json!({"error": {"code": "INVALID_PAGE", "message": "Invalid page."}}),
        ];
        let trials = collect_trials(&pages);

        assert_eq!(trials.data.len(), 2);
        assert_eq!(trials.data[1], vec![vec![5.0, 6.0], vec![7.0, 8.0]]);
        assert!(trials.classes.is_empty());
    }

    #[test]
    fn test_chunk_documents_carry_classes() {
        let pages = vec![json!({
            "count": 2,
            "results": [
                {"chunk": "left", "values": {"c3": [1.0], "c4": [2.0]}},
                {"chunk": "right", "values": {"c3": [3.0], "c4": [4.0]}}
            ]
        })];
        let trials = collect_trials(&pages);

        assert_eq!(trials.classes, vec!["left", "right"]);
        assert_eq!(trials.data[0], vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_stats_and_legacy_detail_are_skipped() {
        let pages = vec![
            json!({"detail": "Invalid page."}),
            json!({"results": {"values": {"c3": {"avg": 2.5, "sum": 10.0}}}}),
        ];
        let trials = collect_trials(&pages);

        assert_eq!(trials.data, vec![Vec::<Vec<f64>>::new()]);
    }
}

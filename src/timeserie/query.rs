//! Time-series queries
//!
//! Resolves the requested channels and chunks of a measure, pages through
//! the data and reshapes it according to the query flags.
//!
//! Two pagination modes:
//! - without `chunks`: one document; the page is a window over the ordered
//!   distinct (timestamp, chunk) keys of the selected channels, shared by
//!   every channel
//! - with `chunks`: a list of documents; the page is a window over the
//!   matching chunks (ordered by id), each carrying its full series

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::storage::{Channel, Store, Window};
use crate::timeserie::document::{
    render_time, Document, QueryResults, TimeColumn, Timestamps, ValueColumn,
};
use crate::timeserie::error::{FieldErrors, QueryError};
use crate::timeserie::stats::{timestamp_stats, value_stats};

const FALSY: &[&str] = &["false", "0", "no", "none", "off"];
const TRUTHY: &[&str] = &["true", "1", "yes", "on"];

/// Raw query string of `GET /timeserie/`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    pub source: Option<String>,
    pub measure: Option<String>,
    pub channels: Option<String>,
    pub chunks: Option<String>,
    pub stats: Option<String>,
    pub timestamps: Option<String>,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

/// How timestamps are attached to documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimestampMode {
    /// One flat column from the first channel with data
    pub single: bool,
    /// Epoch milliseconds instead of RFC 3339 strings
    pub relative: bool,
}

impl TimestampMode {
    /// Parse the `timestamps` flag. `Ok(None)` disables timestamps.
    pub fn parse(flag: Option<&str>) -> Result<Option<Self>, FieldErrors> {
        let flag = match flag {
            None => return Ok(Some(Self::default())),
            Some(flag) => flag.trim().to_lowercase(),
        };
        if flag.is_empty() {
            return Ok(None);
        }

        let mut mode = Self::default();
        for token in flag.split(|c: char| c.is_whitespace() || c == ',' || c == '+') {
            match token {
                "" => {}
                "single" => mode.single = true,
                "absolute" => mode.relative = false,
                "relative" => mode.relative = true,
                t if FALSY.contains(&t) => return Ok(None),
                t if TRUTHY.contains(&t) => {}
                other => {
                    return Err(FieldErrors::single(
                        "timestamps",
                        format!("Unknown timestamp mode: {}", other),
                    ))
                }
            }
        }
        Ok(Some(mode))
    }
}

/// A validated query
#[derive(Debug, Clone, PartialEq)]
pub struct TimeserieQuery {
    pub source: String,
    pub measure: String,
    /// Empty selects every channel of the measure
    pub channels: Vec<String>,
    /// Non-empty switches to chunk pagination
    pub chunks: Vec<String>,
    pub stats: bool,
    pub timestamps: Option<TimestampMode>,
}

impl TimeserieQuery {
    pub fn from_params(params: &QueryParams) -> Result<Self, FieldErrors> {
        let mut errors = FieldErrors::new();

        let source = params.source.clone().unwrap_or_default();
        let measure = params.measure.clone().unwrap_or_default();
        if source.trim().is_empty() {
            errors.add("source", "This field is required.");
        }
        if measure.trim().is_empty() {
            errors.add("measure", "This field is required.");
        }

        let stats = match params.stats.as_deref().map(|s| s.trim().to_lowercase()) {
            None => false,
            Some(s) if s.is_empty() || FALSY.contains(&s.as_str()) => false,
            Some(s) if TRUTHY.contains(&s.as_str()) => true,
            Some(s) => {
                errors.add("stats", format!("Must be a boolean, got {}", s));
                false
            }
        };

        let timestamps = match TimestampMode::parse(params.timestamps.as_deref()) {
            Ok(mode) => mode,
            Err(e) => {
                for (field, message) in e.into_inner() {
                    errors.add(field, message);
                }
                None
            }
        };

        errors.into_result()?;

        Ok(Self {
            source,
            measure,
            channels: split_labels(params.channels.as_deref()),
            chunks: split_labels(params.chunks.as_deref()),
            stats,
            timestamps,
        })
    }

    pub fn grouped_by_chunk(&self) -> bool {
        !self.chunks.is_empty()
    }
}

/// Split a label list on commas and/or whitespace
pub fn split_labels(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// One page of results plus the total the page was cut from
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    /// Distinct (timestamp, chunk) keys, or chunks when grouped by chunk
    pub count: i64,
    pub results: QueryResults,
}

/// Run a query for a 1-based page
pub fn run(
    store: &Store,
    query: &TimeserieQuery,
    page: u64,
    page_size: u64,
) -> Result<QueryPage, QueryError> {
    let measure = store.find_measure(&query.source, &query.measure)?;
    let channels = store.channels_of(measure.id, &query.channels)?;
    let window = Window::page(page, page_size).ok_or(QueryError::InvalidPage)?;

    if query.grouped_by_chunk() {
        let (chunks, total) = store.chunks_of(measure.id, &query.chunks, window)?;
        check_page(page, window, total)?;

        let mut documents = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let mut series = Vec::with_capacity(channels.len());
            for channel in &channels {
                series.push((channel, store.series(channel.id, Some(chunk.id), None)?));
            }
            let mut doc = Document::new(&query.source, &query.measure, Some(&chunk.label));
            shape(&mut doc, query, series);
            documents.push(doc);
        }

        return Ok(QueryPage {
            count: total,
            results: QueryResults::Chunks(documents),
        });
    }

    let ids: Vec<i64> = channels.iter().map(|c| c.id).collect();
    let (keys, total) = store.timestamp_window(&ids, window)?;
    check_page(page, window, total)?;

    let mut series = Vec::with_capacity(channels.len());
    if let (Some(first), Some(last)) = (keys.first(), keys.last()) {
        for channel in &channels {
            series.push((channel, store.series(channel.id, None, Some((*first, *last)))?));
        }
    }

    let mut doc = Document::new(&query.source, &query.measure, None);
    shape(&mut doc, query, series);

    tracing::debug!(
        measure = %query.measure,
        channels = channels.len(),
        page,
        total,
        "Timeserie page served"
    );

    Ok(QueryPage {
        count: total,
        results: QueryResults::Single(doc),
    })
}

fn check_page(page: u64, window: Window, total: i64) -> Result<(), QueryError> {
    if page > 1 && window.offset >= total {
        return Err(QueryError::InvalidPage);
    }
    Ok(())
}

/// Fill values and timestamps from per-channel series. Empty series are skipped.
fn shape(doc: &mut Document, query: &TimeserieQuery, series: Vec<(&Channel, Vec<(i64, f64)>)>) {
    let mut per_channel: BTreeMap<String, TimeColumn> = BTreeMap::new();
    let mut single: Option<TimeColumn> = None;

    for (channel, samples) in series {
        if samples.is_empty() {
            continue;
        }
        let (micros, values): (Vec<i64>, Vec<f64>) = samples.into_iter().unzip();

        let column = match query.stats.then(|| value_stats(&values)).flatten() {
            Some(stats) => ValueColumn::Stats(stats),
            None => ValueColumn::Raw(values),
        };
        doc.values.insert(channel.label.clone(), column);

        let Some(mode) = query.timestamps else {
            continue;
        };
        if mode.single && single.is_some() {
            continue;
        }

        let time_column = match query
            .stats
            .then(|| timestamp_stats(&micros, mode.relative))
            .flatten()
        {
            Some(stats) => TimeColumn::Stats(stats),
            None => TimeColumn::Raw(
                micros
                    .iter()
                    .map(|ts| render_time(*ts, mode.relative))
                    .collect(),
            ),
        };

        if mode.single {
            single = Some(time_column);
        } else {
            per_channel.insert(channel.label.clone(), time_column);
        }
    }

    doc.timestamps = match query.timestamps {
        None => None,
        Some(mode) if mode.single => single.map(Timestamps::Single),
        Some(_) => Some(Timestamps::PerChannel(per_channel)),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{NewChannel, NewMeasure, NewSource, StoreConfig};
    use crate::timeserie::document::TimeValue;
    use crate::timeserie::ingest::{ingest, IngestRequest};
    use serde_json::json;

    fn create_test_store() -> Store {
        let store = Store::open(StoreConfig::in_memory()).unwrap();
        store
            .create_source(NewSource {
                label: "openbci".to_string(),
                name: "OpenBCI".to_string(),
                location: None,
                device: None,
                protocol: None,
                version: None,
                description: None,
                created: None,
            })
            .unwrap();
        store
            .create_measure(NewMeasure {
                source: "openbci".to_string(),
                label: "eeg".to_string(),
                name: String::new(),
                description: None,
            })
            .unwrap();
        for label in ["c3", "c4", "c5"] {
            store
                .create_channel(NewChannel {
                    source: "openbci".to_string(),
                    measure: "eeg".to_string(),
                    label: label.to_string(),
                    name: String::new(),
                    unit: String::new(),
                    sampling_rate: None,
                    description: None,
                })
                .unwrap();
        }
        store
    }

    fn load(store: &Store, chunk: Option<&str>, start: f64, values: serde_json::Value) {
        let n = values["c3"].as_array().map(|a| a.len()).unwrap_or(0);
        let timestamps: Vec<f64> = (0..n).map(|i| start + i as f64 * 0.004).collect();
        let request: IngestRequest = serde_json::from_value(json!({
            "source": "openbci",
            "measure": "eeg",
            "chunk": chunk,
            "timestamps": timestamps,
            "values": values,
        }))
        .unwrap();
        ingest(store, &request).unwrap();
    }

    fn query(params: serde_json::Value) -> TimeserieQuery {
        let params: QueryParams = serde_json::from_value(params).unwrap();
        TimeserieQuery::from_params(&params).unwrap()
    }

    fn single(page: QueryPage) -> Document {
        match page.results {
            QueryResults::Single(doc) => doc,
            QueryResults::Chunks(_) => panic!("expected a single document"),
        }
    }

    #[test]
    fn test_timestamp_mode_parse() {
        assert_eq!(TimestampMode::parse(None).unwrap(), Some(TimestampMode::default()));
        assert_eq!(TimestampMode::parse(Some("false")).unwrap(), None);
        assert_eq!(TimestampMode::parse(Some("")).unwrap(), None);
        assert_eq!(TimestampMode::parse(Some("OFF")).unwrap(), None);
        assert_eq!(
            TimestampMode::parse(Some("single relative")).unwrap(),
            Some(TimestampMode {
                single: true,
                relative: true
            })
        );
        assert_eq!(
            TimestampMode::parse(Some("true")).unwrap(),
            Some(TimestampMode::default())
        );
        assert!(TimestampMode::parse(Some("sideways")).is_err());
    }

    #[test]
    fn test_split_labels() {
        assert_eq!(split_labels(Some("c3,c4 c5")), vec!["c3", "c4", "c5"]);
        assert_eq!(split_labels(Some(" c3 ,, c4 ")), vec!["c3", "c4"]);
        assert!(split_labels(None).is_empty());
    }

    #[test]
    fn test_query_requires_source_and_measure() {
        let params = QueryParams::default();
        let errors = TimeserieQuery::from_params(&params).unwrap_err();
        assert!(errors.get("source").is_some());
        assert!(errors.get("measure").is_some());
    }

    #[test]
    fn test_stats_values() {
        let store = create_test_store();
        load(&store, None, 1.0, json!({"c3": [1, 2, 3, 4]}));

        let q = query(json!({"source": "openbci", "measure": "eeg", "stats": "true"}));
        let doc = single(run(&store, &q, 1, 1024).unwrap());

        match &doc.values["c3"] {
            ValueColumn::Stats(stats) => {
                assert_eq!(stats.avg, 2.5);
                assert_eq!(stats.sum, 10.0);
                assert!((stats.std - 1.1180).abs() < 1e-4);
            }
            other => panic!("expected stats, got {:?}", other),
        }
        // channels without data are skipped
        assert!(!doc.values.contains_key("c4"));
    }

    #[test]
    fn test_single_relative_timestamps_are_flat() {
        let store = create_test_store();
        load(&store, None, 10.0, json!({"c3": [1, 2], "c4": [3, 4]}));

        let q = query(json!({
            "source": "openbci", "measure": "eeg", "timestamps": "single relative"
        }));
        let doc = single(run(&store, &q, 1, 1024).unwrap());

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["timestamps"], json!([10000.0, 10004.0]));
        assert_eq!(value["values"]["c4"], json!([3.0, 4.0]));
    }

    #[test]
    fn test_default_mode_is_per_channel_absolute() {
        let store = create_test_store();
        load(&store, None, 1_704_067_200.0, json!({"c3": [1]}));

        let q = query(json!({"source": "openbci", "measure": "eeg"}));
        let doc = single(run(&store, &q, 1, 1024).unwrap());
        match doc.timestamps {
            Some(Timestamps::PerChannel(map)) => assert_eq!(
                map["c3"],
                TimeColumn::Raw(vec![TimeValue::Absolute("2024-01-01T00:00:00Z".to_string())])
            ),
            other => panic!("unexpected timestamps: {:?}", other),
        }

        let hidden = query(json!({"source": "openbci", "measure": "eeg", "timestamps": "no"}));
        let doc = single(run(&store, &hidden, 1, 1024).unwrap());
        assert!(doc.timestamps.is_none());
        assert!(serde_json::to_value(&doc).unwrap().get("timestamps").is_none());
    }

    #[test]
    fn test_shared_timestamp_window() {
        let store = create_test_store();
        load(&store, None, 0.0, json!({"c3": [0, 1, 2, 3, 4], "c4": [5, 6, 7, 8, 9]}));

        let q = query(json!({"source": "openbci", "measure": "eeg", "channels": "c3,c4"}));
        let page = run(&store, &q, 2, 2).unwrap();
        assert_eq!(page.count, 5);
        let doc = single(page);
        assert_eq!(doc.values["c3"], ValueColumn::Raw(vec![2.0, 3.0]));
        assert_eq!(doc.values["c4"], ValueColumn::Raw(vec![7.0, 8.0]));

        assert!(matches!(run(&store, &q, 4, 2), Err(QueryError::InvalidPage)));
    }

    #[test]
    fn test_overlapping_chunks_stay_within_page_size() {
        let store = create_test_store();
        load(&store, None, 1.0, json!({"c3": [1, 2, 3, 4]}));
        load(&store, Some("b"), 1.0, json!({"c3": [1, 2, 3, 4]}));

        let q = query(json!({"source": "openbci", "measure": "eeg", "timestamps": "single"}));
        let page = run(&store, &q, 1, 2).unwrap();
        assert_eq!(page.count, 8);
        let doc = single(page);
        assert_eq!(doc.values["c3"], ValueColumn::Raw(vec![1.0, 1.0]));
        match doc.timestamps {
            Some(Timestamps::Single(TimeColumn::Raw(ts))) => assert_eq!(ts.len(), 2),
            other => panic!("unexpected timestamps: {:?}", other),
        }

        let last = single(run(&store, &q, 4, 2).unwrap());
        assert_eq!(last.values["c3"], ValueColumn::Raw(vec![4.0, 4.0]));
        assert!(matches!(run(&store, &q, 5, 2), Err(QueryError::InvalidPage)));
    }

    #[test]
    fn test_huge_page_is_invalid() {
        let store = create_test_store();
        load(&store, None, 0.0, json!({"c3": [1, 2]}));

        let q = query(json!({"source": "openbci", "measure": "eeg"}));
        assert!(matches!(run(&store, &q, u64::MAX, 2), Err(QueryError::InvalidPage)));
    }

    #[test]
    fn test_chunk_pagination() {
        let store = create_test_store();
        load(&store, Some("trial"), 0.0, json!({"c3": [1, 2]}));
        load(&store, Some("trial"), 100.0, json!({"c3": [3, 4, 5]}));
        load(&store, Some("rest"), 200.0, json!({"c3": [6]}));

        let q = query(json!({
            "source": "openbci", "measure": "eeg", "chunks": "trial", "timestamps": "false"
        }));
        let page = run(&store, &q, 1, 16).unwrap();
        assert_eq!(page.count, 2);
        match page.results {
            QueryResults::Chunks(docs) => {
                assert_eq!(docs.len(), 2);
                assert_eq!(docs[0].chunk.as_deref(), Some("trial"));
                assert_eq!(docs[1].values["c3"], ValueColumn::Raw(vec![3.0, 4.0, 5.0]));
            }
            QueryResults::Single(_) => panic!("expected chunk documents"),
        }

        assert!(matches!(run(&store, &q, 2, 16), Err(QueryError::InvalidPage)));
    }

    #[test]
    fn test_empty_measure_first_page_is_valid() {
        let store = create_test_store();
        let q = query(json!({"source": "openbci", "measure": "eeg"}));
        let page = run(&store, &q, 1, 1024).unwrap();
        assert_eq!(page.count, 0);
        assert!(single(page).values.is_empty());
    }
}

//! Benchmarks for Channelstore ingestion and queries
//!
//! Run with: cargo bench

use channelstore::storage::{NewChannel, NewMeasure, NewSource, Store, StoreConfig};
use channelstore::timeserie::{
    ingest, run, timestamp_stats, value_stats, IngestRequest, QueryParams, TimeserieQuery,
};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use serde_json::{json, Map, Value};
use tempfile::tempdir;

const CHANNELS: [&str; 4] = ["c3", "c4", "cz", "pz"];

fn create_catalog(store: &Store) {
    store
        .create_source(NewSource {
            label: "bench".to_string(),
            name: "Bench".to_string(),
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
            source: "bench".to_string(),
            label: "eeg".to_string(),
            name: "EEG".to_string(),
            description: None,
        })
        .unwrap();
    for label in CHANNELS {
        store
            .create_channel(NewChannel {
                source: "bench".to_string(),
                measure: "eeg".to_string(),
                label: label.to_string(),
                name: label.to_uppercase(),
                unit: "uV".to_string(),
                sampling_rate: Some(250.0),
                description: None,
            })
            .unwrap();
    }
}

fn create_payload(samples: usize) -> IngestRequest {
    let timestamps: Vec<f64> = (0..samples).map(|i| 1_704_067_200.0 + i as f64 * 0.004).collect();
    let values: Map<String, Value> = CHANNELS
        .iter()
        .map(|label| {
            let series: Vec<f64> = (0..samples).map(|i| (i as f64 * 0.1).sin()).collect();
            (label.to_string(), json!(series))
        })
        .collect();

    IngestRequest {
        source: "bench".to_string(),
        measure: "eeg".to_string(),
        chunk: None,
        timestamps: json!(timestamps),
        values,
    }
}

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");

    for samples in [100, 1000, 5000] {
        let dir = tempdir().unwrap();
        let store = Store::open(StoreConfig::new(dir.path().join("bench.db"))).unwrap();
        create_catalog(&store);
        let payload = create_payload(samples);

        group.throughput(Throughput::Elements((samples * CHANNELS.len()) as u64));

        // An explicit label always creates a fresh chunk, so repeated
        // payloads never collide.
        let mut run_id = 0u64;
        group.bench_function(format!("payload_{}", samples), |b| {
            b.iter_batched(
                || {
                    run_id += 1;
                    let mut request = payload.clone();
                    request.chunk = Some(format!("run-{}", run_id));
                    request
                },
                |request| ingest(&store, black_box(&request)).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats");

    let values: Vec<f64> = (0..10_000).map(|i| (i as f64 * 0.1).sin()).collect();
    let micros: Vec<i64> = (0..10_000).map(|i| i * 4_000).collect();

    group.throughput(Throughput::Elements(values.len() as u64));
    group.bench_function("values_10000", |b| {
        b.iter(|| value_stats(black_box(&values)))
    });
    group.bench_function("timestamps_10000", |b| {
        b.iter(|| timestamp_stats(black_box(&micros), true))
    });

    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    let dir = tempdir().unwrap();
    let store = Store::open(StoreConfig::new(dir.path().join("bench.db"))).unwrap();
    create_catalog(&store);
    ingest(&store, &create_payload(10_000)).unwrap();

    for (name, stats, timestamps) in [
        ("raw_page", None, None),
        ("stats_page", Some("true"), None),
        ("single_relative_page", None, Some("single relative")),
    ] {
        let params = QueryParams {
            source: Some("bench".to_string()),
            measure: Some("eeg".to_string()),
            stats: stats.map(str::to_string),
            timestamps: timestamps.map(str::to_string),
            ..Default::default()
        };
        let query = TimeserieQuery::from_params(&params).unwrap();

        group.bench_function(name, |b| {
            b.iter(|| run(&store, black_box(&query), 2, 1024).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_ingest, bench_stats, bench_query);
criterion_main!(benches);

#![allow(missing_docs, unused_doc_comments, unused_attributes)]
//! Benchmarks for frbrizer clustering.
//!
//! Synthetic records share a small pool of titles and authors so that most
//! records merge into existing clusters.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use frbrizer::{
    derive_fingerprint, ClusterMatchEngine, Field, InMemoryMatchIndex, ItemConversionTable,
    KvMatchIndex, Leader, MatchIndex, Record, Stub,
};
use frbrizer::index::MemoryKeyValueStore;
use rayon::prelude::*;

const TITLES: [&str; 8] = [
    "Ferdydurke",
    "Lalka",
    "Pan Tadeusz",
    "Kordian",
    "Chłopi",
    "Quo vadis",
    "Trans-Atlantyk",
    "Przedwiośnie",
];

const AUTHORS: [&str; 4] = [
    "Gombrowicz, Witold",
    "Prus, Bolesław",
    "Mickiewicz, Adam",
    "Reymont, Władysław",
];

/// Generate `count` synthetic book records.
fn synthetic_records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::builder(Leader::with_type('a', 'm'))
                .control_field_str("001", &format!("b{i:08}"))
                .control_field_str("008", "010101s2001    pl            000 0 pol d")
                .control_field_str("009", &format!("99{i:08}"))
                .field(
                    Field::builder("100".to_string(), '1', ' ')
                        .subfield_str('a', AUTHORS[i % AUTHORS.len()])
                        .build(),
                )
                .field(
                    Field::builder("245".to_string(), '1', '0')
                        .subfield_str('a', TITLES[i % TITLES.len()])
                        .build(),
                )
                .field(
                    Field::builder("852".to_string(), ' ', ' ')
                        .subfield_str('a', "BN")
                        .build(),
                )
                .build()
        })
        .collect()
}

fn ingest_all<I: MatchIndex>(engine: &mut ClusterMatchEngine<I>, records: &[Record]) -> usize {
    let mut touched = 0;
    for record in records {
        let Ok(data) = derive_fingerprint(record) else {
            continue;
        };
        if let Ok(outcome) = engine.match_and_index(Stub::new(data), record) {
            touched += outcome.touched_clusters.len();
        }
    }
    touched
}

/// Benchmark fingerprinting 1,000 records sequentially.
fn benchmark_fingerprint_1k(c: &mut Criterion) {
    let records = black_box(synthetic_records(1_000));

    c.bench_function("fingerprint_1k_records", |b| {
        b.iter(|| {
            records
                .iter()
                .filter_map(|record| derive_fingerprint(record).ok())
                .count()
        });
    });
}

/// Benchmark fingerprinting 1,000 records with rayon.
fn benchmark_fingerprint_parallel_1k(c: &mut Criterion) {
    let records = black_box(synthetic_records(1_000));

    c.bench_function("fingerprint_1k_records_parallel", |b| {
        b.iter(|| {
            records
                .par_iter()
                .filter_map(|record| derive_fingerprint(record).ok())
                .count()
        });
    });
}

/// Benchmark matching 1,000 records into an in-memory index.
fn benchmark_match_memory_1k(c: &mut Criterion) {
    let records = black_box(synthetic_records(1_000));

    c.bench_function("match_1k_records_memory_index", |b| {
        b.iter(|| {
            let mut engine =
                ClusterMatchEngine::new(InMemoryMatchIndex::new(), ItemConversionTable::default());
            ingest_all(&mut engine, &records)
        });
    });
}

/// Benchmark matching 1,000 records into the key-value index.
fn benchmark_match_kv_1k(c: &mut Criterion) {
    let records = black_box(synthetic_records(1_000));

    c.bench_function("match_1k_records_kv_index", |b| {
        b.iter(|| {
            let mut engine = ClusterMatchEngine::new(
                KvMatchIndex::new(MemoryKeyValueStore::new()),
                ItemConversionTable::default(),
            );
            ingest_all(&mut engine, &records)
        });
    });
}

criterion_group!(
    benches,
    benchmark_fingerprint_1k,
    benchmark_fingerprint_parallel_1k,
    benchmark_match_memory_1k,
    benchmark_match_kv_1k,
);
criterion_main!(benches);

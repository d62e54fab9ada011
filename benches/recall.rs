//! Search benchmarks: lexical, semantic, and merged recall

use std::collections::HashMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chronicle::embedding::{Embedder, HashEmbedder};
use chronicle::index::Indexer;
use chronicle::recall::search;
use chronicle::store::queries::append_record;
use chronicle::store::Store;
use chronicle::types::SearchOptions;

const TOPICS: &[&str] = &[
    "deployed the service to production",
    "debugged a race condition in the worker pool",
    "wrote documentation for the http api",
    "refactored the storage layer",
    "meeting about the quarterly roadmap",
];

fn seeded_store(records: usize) -> (Store, Arc<dyn Embedder>) {
    let store = Store::open_in_memory().unwrap();
    for i in 0..records {
        store
            .with_write(|conn| {
                append_record(
                    conn,
                    &format!("{} (day {})", TOPICS[i % TOPICS.len()], i),
                    &[],
                    "bench",
                    &HashMap::new(),
                )
            })
            .unwrap();
    }

    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(384));
    Indexer::new(store.clone(), embedder.clone())
        .index_pending()
        .unwrap();

    (store, embedder)
}

fn bench_search(c: &mut Criterion) {
    let (store, embedder) = seeded_store(2000);
    let options = SearchOptions::default();

    let mut group = c.benchmark_group("recall");

    group.bench_function("lexical_only", |b| {
        b.iter(|| {
            store
                .with_connection(|conn| {
                    search(conn, None, black_box("race condition"), &options)
                })
                .unwrap()
        })
    });

    group.bench_function("hybrid", |b| {
        b.iter(|| {
            store
                .with_connection(|conn| {
                    search(
                        conn,
                        Some(embedder.as_ref()),
                        black_box("debugging concurrency problems"),
                        &options,
                    )
                })
                .unwrap()
        })
    });

    group.bench_function("pure_filter", |b| {
        b.iter(|| {
            store
                .with_connection(|conn| search(conn, None, black_box(""), &options))
                .unwrap()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);

//! Hybrid recall benchmarks: embedding-backed similarity search and the
//! windowed/query recall paths, at increasing corpus sizes.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use memsynth::embedding::HashingEmbedder;
use memsynth::model::Memory;
use memsynth::storage::sqlite::SqliteStore;
use memsynth::storage::MemoryStore;
use tokio::runtime::Runtime;

fn seeded_store(rt: &Runtime, count: u64) -> Arc<SqliteStore> {
    let embedder = Arc::new(HashingEmbedder::new(64));
    let store = SqliteStore::new(":memory:", embedder, 5_000, 2_000, 4).unwrap();
    rt.block_on(store.initialize()).unwrap();
    for i in 0..count {
        let memory = Memory::new(
            format!("the quick fox number {i} jumps over the lazy dog in scenario {}", i % 7),
            if i % 5 == 0 { "decision" } else { "note" },
            [format!("tag{}", i % 10)],
            Default::default(),
            i as f64,
        )
        .unwrap();
        rt.block_on(store.store(memory)).unwrap();
    }
    Arc::new(store)
}

fn bench_retrieve(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("retrieve");
    for corpus_size in [100u64, 1_000, 5_000] {
        let store = seeded_store(&rt, corpus_size);
        group.bench_with_input(
            BenchmarkId::new("corpus_size", corpus_size),
            &corpus_size,
            |b, _| b.iter(|| rt.block_on(store.retrieve("quick fox jumps", 10)).unwrap()),
        );
    }
    group.finish();
}

fn bench_recall_window(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = seeded_store(&rt, 1_000);

    c.bench_function("recall_time_window", |b| {
        b.iter(|| rt.block_on(store.recall(None, Some((200.0, 800.0)), 20)).unwrap())
    });

    c.bench_function("recall_query_and_window", |b| {
        b.iter(|| rt.block_on(store.recall(Some("lazy dog"), Some((0.0, 1_000.0)), 20)).unwrap())
    });
}

criterion_group!(benches, bench_retrieve, bench_recall_window);
criterion_main!(benches);

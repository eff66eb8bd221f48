//! Core storage operation benchmarks: store, retrieve-by-hash via recall,
//! and tag search against the embedded sqlite backend.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use memsynth::embedding::HashingEmbedder;
use memsynth::model::Memory;
use memsynth::storage::sqlite::SqliteStore;
use memsynth::storage::{MemoryStore, TagMatch};
use tokio::runtime::Runtime;

fn new_store(rt: &Runtime) -> Arc<SqliteStore> {
    let embedder = Arc::new(HashingEmbedder::new(64));
    let store = SqliteStore::new(":memory:", embedder, 5_000, 2_000, 4).unwrap();
    rt.block_on(store.initialize()).unwrap();
    Arc::new(store)
}

fn bench_store(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = new_store(&rt);

    let mut group = c.benchmark_group("memory_store");
    group.throughput(Throughput::Elements(1));

    let mut i = 0u64;
    group.bench_function("new_memory", |b| {
        b.iter(|| {
            i += 1;
            let memory = Memory::new(
                format!("benchmark content number {i}"),
                "note",
                [format!("tag{}", i % 10)],
                Default::default(),
                i as f64,
            )
            .unwrap();
            rt.block_on(store.store(memory)).unwrap()
        })
    });

    group.finish();
}

fn bench_search_by_tag(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = new_store(&rt);

    for i in 0..1000u64 {
        let memory = Memory::new(
            format!("seeded content {i}"),
            "note",
            [format!("tag{}", i % 10)],
            Default::default(),
            i as f64,
        )
        .unwrap();
        rt.block_on(store.store(memory)).unwrap();
    }

    let mut group = c.benchmark_group("search_by_tag");
    for mode in [TagMatch::Any, TagMatch::All] {
        let label = match mode {
            TagMatch::Any => "any",
            TagMatch::All => "all",
        };
        group.bench_with_input(BenchmarkId::new("mode", label), &mode, |b, &mode| {
            b.iter(|| rt.block_on(store.search_by_tag(&["tag5".to_string()], mode)).unwrap())
        });
    }
    group.finish();
}

fn bench_get_recent(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = new_store(&rt);

    for i in 0..1000u64 {
        let memory =
            Memory::new(format!("seeded content {i}"), "note", [], Default::default(), i as f64).unwrap();
        rt.block_on(store.store(memory)).unwrap();
    }

    let mut group = c.benchmark_group("get_recent");
    for limit in [10, 50, 100] {
        group.throughput(Throughput::Elements(limit as u64));
        group.bench_with_input(BenchmarkId::new("limit", limit), &limit, |b, &limit| {
            b.iter(|| rt.block_on(store.get_recent(limit)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_store, bench_search_by_tag, bench_get_recent);
criterion_main!(benches);

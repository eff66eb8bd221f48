//! Consolidation stage benchmarks: decay and associations run over
//! corpora of increasing size, plus a full scheduled pass.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use memsynth::consolidation::{associations::AssociationsConfig, decay, ConsolidationConfig, Scheduler};
use memsynth::embedding::HashingEmbedder;
use memsynth::model::Memory;
use memsynth::storage::sqlite::SqliteStore;
use memsynth::storage::{MaintenanceStore, MemoryStore};
use tokio::runtime::Runtime;

fn seeded_store(rt: &Runtime, count: u64) -> Arc<SqliteStore> {
    let embedder = Arc::new(HashingEmbedder::new(32));
    let store = SqliteStore::new(":memory:", embedder, 5_000, 2_000, 4).unwrap();
    rt.block_on(store.initialize()).unwrap();
    for i in 0..count {
        let memory = Memory::new(
            format!("consolidation candidate {i} about topic {}", i % 12),
            if i % 8 == 0 { "temporary" } else { "note" },
            [format!("topic{}", i % 12)],
            Default::default(),
            i as f64,
        )
        .unwrap();
        rt.block_on(store.store(memory)).unwrap();
    }
    Arc::new(store)
}

fn bench_decay(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("decay_stage");
    let retention = decay::RetentionConfig::default();
    for corpus_size in [100u64, 1_000] {
        let store = seeded_store(&rt, corpus_size);
        let now = corpus_size as f64 + 30.0 * 86_400.0;
        group.bench_with_input(BenchmarkId::new("corpus_size", corpus_size), &corpus_size, |b, _| {
            b.iter(|| rt.block_on(decay::run(store.as_ref() as &dyn MaintenanceStore, now, &retention)))
        });
    }
    group.finish();
}

fn bench_associations(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = seeded_store(&rt, 300);
    let config = AssociationsConfig::default();
    let now = 300.0;

    c.bench_function("associations_stage", |b| {
        b.iter(|| rt.block_on(memsynth::consolidation::associations::run(store.as_ref() as &dyn MaintenanceStore, now, &config)))
    });
}

fn bench_full_pass(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let store = seeded_store(&rt, 300);
    let scheduler = Scheduler::new(store, ConsolidationConfig::default());
    let now = 300.0 + 30.0 * 86_400.0;

    c.bench_function("scheduled_consolidation_pass", |b| {
        b.iter(|| rt.block_on(scheduler.run_consolidation(now)))
    });
}

criterion_group!(benches, bench_decay, bench_associations, bench_full_pass);
criterion_main!(benches);

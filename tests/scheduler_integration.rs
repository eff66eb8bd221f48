//! Exercises the `Scheduler`'s `run_consolidation` as a whole: every
//! enabled stage fires once, in order, and a stage reported as disabled in
//! the config produces no report for that slot.

use std::sync::Arc;

use memsynth::consolidation::{ConsolidationConfig, Scheduler};
use memsynth::embedding::{Embedder, HashingEmbedder};
use memsynth::model::Memory;
use memsynth::storage::sqlite::SqliteStore;
use memsynth::storage::{MaintenanceStore, MemoryStore};

async fn seeded_store(dir: &std::path::Path) -> SqliteStore {
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(16));
    let store = SqliteStore::new(dir.join("t.db"), embedder, 5_000, 2_000, 4).unwrap();
    store.initialize().await.unwrap();
    for i in 0..30 {
        let memory = Memory::new(
            format!("note about project {} written on day {i}", i % 4),
            if i % 6 == 0 { "temporary" } else { "note" },
            [format!("project{}", i % 4)],
            Default::default(),
            i as f64,
        )
        .unwrap();
        store.store(memory).await.unwrap();
    }
    store
}

#[tokio::test]
async fn full_pass_runs_every_enabled_stage() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(seeded_store(dir.path()).await);
    let scheduler = Scheduler::new(store.clone() as Arc<dyn MaintenanceStore>, ConsolidationConfig::default());

    let now = 400.0 * 86_400.0;
    let report = scheduler.run_consolidation(now).await;

    assert!(report.decay.is_some());
    assert!(report.associations.is_some());
    assert!(report.clustering.is_some());
    assert!(report.compression.is_some());
    assert!(report.forgetting.is_some());
    assert!(report.decay.as_ref().unwrap().error.is_none());
}

#[tokio::test]
async fn disabled_stages_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(seeded_store(dir.path()).await);
    let config = ConsolidationConfig {
        associations_enabled: false,
        clustering_enabled: false,
        compression_enabled: false,
        forgetting_enabled: false,
        ..ConsolidationConfig::default()
    };
    let scheduler = Scheduler::new(store.clone() as Arc<dyn MaintenanceStore>, config);

    let report = scheduler.run_consolidation(10.0).await;
    assert!(report.decay.is_some());
    assert!(report.associations.is_none());
    assert!(report.clustering.is_none());
    assert!(report.compression.is_none());
    assert!(report.forgetting.is_none());
}

#[tokio::test]
async fn concurrent_runs_are_serialized_by_the_run_lock() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(seeded_store(dir.path()).await);
    let scheduler = Arc::new(Scheduler::new(store.clone() as Arc<dyn MaintenanceStore>, ConsolidationConfig::default()));

    let a = scheduler.clone();
    let b = scheduler.clone();
    let (report_a, report_b) = tokio::join!(a.run_consolidation(100.0), b.run_consolidation(100.0));

    assert!(report_a.decay.is_some());
    assert!(report_b.decay.is_some());
}

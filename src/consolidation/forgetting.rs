//! Controlled forgetting (spec §4.H stage 5), monthly by default. Memories
//! with `relevance < relevance_threshold` and no access in
//! `access_threshold_days` are soft-archived first; only archived memories
//! past a further grace window are hard-deleted, so a run always has two
//! effects in flight: new archivals this run, and hard deletes of
//! previously-archived memories whose grace window has since elapsed.

use crate::storage::MaintenanceStore;

use super::types::StageReport;

pub struct ForgettingConfig {
    pub relevance_threshold: f64,
    pub access_threshold_days: f64,
    pub grace_period_days: f64,
}

impl Default for ForgettingConfig {
    fn default() -> Self {
        Self { relevance_threshold: 0.1, access_threshold_days: 90.0, grace_period_days: 30.0 }
    }
}

pub async fn run(store: &dyn MaintenanceStore, now: f64, config: &ForgettingConfig) -> StageReport {
    let mut report = StageReport::default();

    let access_cutoff = now - config.access_threshold_days * 86_400.0;
    let candidates = match store
        .list_forgetting_candidates(config.relevance_threshold, access_cutoff)
        .await
    {
        Ok(c) => c,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };

    for hash in &candidates {
        report.items_processed += 1;
        match store.archive(hash).await {
            Ok(()) => report.items_changed += 1,
            Err(e) => tracing::warn!(hash = %hash, error = %e, "forgetting: failed to archive"),
        }
        tokio::task::yield_now().await;
    }

    let grace_cutoff = now - config.grace_period_days * 86_400.0;
    match store.hard_delete_archived_before(grace_cutoff).await {
        Ok(hard_deleted) => report.items_changed += hard_deleted,
        Err(e) => {
            if report.error.is_none() {
                report.error = Some(e.to_string());
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, HashingEmbedder};
    use crate::model::Memory;
    use crate::storage::MemoryStore;
    use crate::storage::sqlite::SqliteStore;
    use std::sync::Arc;

    async fn new_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(16));
        let store = SqliteStore::new(dir.path().join("t.db"), embedder, 5000, 2000, 4).unwrap();
        store.initialize().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn archives_low_relevance_untouched_memories() {
        let (store, _dir) = new_store().await;
        let memory = Memory::new("ancient note", "temporary", [], Default::default(), 0.0).unwrap();
        let hash = memory.content_hash.clone();
        store.store(memory).await.unwrap();
        store.set_relevance(&hash, 0.01).await.unwrap();

        let now = 200.0 * 86_400.0;
        let report = run(&store, now, &ForgettingConfig::default()).await;
        assert_eq!(report.items_changed, 1);
        assert!(!store.get_recent(10).await.unwrap().iter().any(|m| m.content_hash == hash));
    }

    #[tokio::test]
    async fn high_relevance_memories_are_untouched() {
        let (store, _dir) = new_store().await;
        let memory = Memory::new("fresh note", "critical", [], Default::default(), 0.0).unwrap();
        store.store(memory).await.unwrap();
        let report = run(&store, 1.0, &ForgettingConfig::default()).await;
        assert_eq!(report.items_changed, 0);
    }
}

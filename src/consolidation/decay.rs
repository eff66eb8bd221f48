//! Exponential relevance decay (spec §4.H stage 1). Recomputes
//! `r = base_weight(type) * exp(-age_days / half_life(type))` for every
//! active memory and writes only the `relevance` column — content and
//! timestamps are never touched.

use crate::model::{decay_class, DecayClass};
use crate::storage::MaintenanceStore;

use super::types::StageReport;

/// Overrides the per-class half-lives `DecayClass::half_life_days` ships
/// with, driven by the `RETENTION_*` env vars. Base weights (the relevance
/// a memory starts at) are left alone — only how fast it decays is tunable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionConfig {
    pub critical_days: f64,
    pub reference_days: f64,
    pub standard_days: f64,
    pub temporary_days: f64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            critical_days: DecayClass::Critical.half_life_days(),
            reference_days: DecayClass::Reference.half_life_days(),
            standard_days: DecayClass::Standard.half_life_days(),
            temporary_days: DecayClass::Temporary.half_life_days(),
        }
    }
}

impl RetentionConfig {
    pub fn from_env(config: &crate::config::EngineConfig) -> Self {
        Self {
            critical_days: config.retention_critical_days,
            reference_days: config.retention_reference_days,
            standard_days: config.retention_standard_days,
            temporary_days: config.retention_temporary_days,
        }
    }

    fn half_life_days(&self, class: DecayClass) -> f64 {
        match class {
            DecayClass::Critical => self.critical_days,
            DecayClass::Reference => self.reference_days,
            DecayClass::Standard => self.standard_days,
            DecayClass::Temporary => self.temporary_days,
        }
    }
}

pub async fn run(store: &dyn MaintenanceStore, now: f64, retention: &RetentionConfig) -> StageReport {
    let mut report = StageReport::default();

    let summaries = match store.list_active_summaries().await {
        Ok(s) => s,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };

    for (hash, created_at, memory_type) in summaries {
        report.items_processed += 1;
        let class = decay_class(&memory_type);
        let age_days = ((now - created_at) / 86_400.0).max(0.0);
        let relevance = class.base_weight() * (-age_days / retention.half_life_days(class)).exp();

        if let Err(e) = store.set_relevance(&hash, relevance).await {
            tracing::warn!(hash = %hash, error = %e, "decay: failed to write relevance");
            continue;
        }
        report.items_changed += 1;
        tokio::task::yield_now().await;
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
    async fn older_temporary_memories_decay_below_critical() {
        let (store, _dir) = new_store().await;
        let old = Memory::new("stale todo", "temporary", [], Default::default(), 0.0).unwrap();
        let old_hash = old.content_hash.clone();
        store.store(old).await.unwrap();
        let fresh = Memory::new("active plan", "critical", [], Default::default(), 1_000_000.0).unwrap();
        let fresh_hash = fresh.content_hash.clone();
        store.store(fresh).await.unwrap();

        let now = 1_000_000.0 + 200.0 * 86_400.0;
        let report = run(&store, now, &RetentionConfig::default()).await;
        assert_eq!(report.items_processed, 2);
        assert_eq!(report.items_changed, 2);
        assert!(report.error.is_none());

        let summaries = store.list_active_summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        let _ = (old_hash, fresh_hash);
    }
}

//! Associative discovery (spec §4.H stage 2). Samples recently-touched
//! memories against a random reservoir and emits an [`Association`] for
//! every pair whose cosine similarity falls in the "interesting middle"
//! `0.3..=0.7` — too high is redundant, too low is noise. Capped at
//! `max_pairs` per run to bound cost. Persisted as an ordinary `Memory`
//! tagged `consolidated:association` (spec §3: associations are either
//! system-tagged memories or a side table; this implementation picks the
//! tagged-memory representation so `retrieve`/`recall` surface them without
//! special-casing).

use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::embedding::cosine_similarity;
use crate::model::Memory;
use crate::storage::{MaintenanceStore, MemoryStore};

use super::types::{Association, StageReport};

const SIMILARITY_LOW: f32 = 0.3;
const SIMILARITY_HIGH: f32 = 0.7;
const SAMPLE_SIZE: usize = 50;
const RESERVOIR_SIZE: usize = 50;

pub struct AssociationsConfig {
    pub max_pairs: usize,
    pub seed: u64,
}

impl Default for AssociationsConfig {
    fn default() -> Self {
        Self { max_pairs: 100, seed: 0 }
    }
}

pub async fn run(store: &dyn MaintenanceStore, now: f64, config: &AssociationsConfig) -> StageReport {
    let mut report = StageReport::default();

    let recent = match store.list_embeddings(None, SAMPLE_SIZE).await {
        Ok(v) => v,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };
    let fallback_hashes = match store.list_fallback_embedded_hashes().await {
        Ok(v) => v,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };
    let reservoir: Vec<(String, Vec<f32>)> = {
        let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed);
        let mut pool = recent.clone();
        pool.shuffle(&mut rng);
        pool.into_iter().take(RESERVOIR_SIZE).collect()
    };

    let mut emitted = 0usize;
    'outer: for (hash_a, vec_a) in &recent {
        if fallback_hashes.contains(hash_a) {
            continue;
        }
        for (hash_b, vec_b) in &reservoir {
            if hash_a == hash_b || fallback_hashes.contains(hash_b) {
                continue;
            }
            report.items_processed += 1;
            let sim = cosine_similarity(vec_a, vec_b);
            if sim >= SIMILARITY_LOW && sim <= SIMILARITY_HIGH {
                let (a, b) = if hash_a < hash_b { (hash_a, hash_b) } else { (hash_b, hash_a) };
                let association = Association {
                    hash_a: a.clone(),
                    hash_b: b.clone(),
                    strength: sim,
                    discovered_at: now,
                };
                if let Err(e) = persist_association(store, &association).await {
                    tracing::warn!(error = %e, "associations: failed to persist");
                    continue;
                }
                emitted += 1;
                report.items_changed += 1;
                if emitted >= config.max_pairs {
                    break 'outer;
                }
            }
            tokio::task::yield_now().await;
        }
    }

    report
}

async fn persist_association(store: &dyn MaintenanceStore, assoc: &Association) -> crate::error::Result<()> {
    let content = format!(
        "Association discovered between {} and {} (strength {:.3})",
        &assoc.hash_a[..assoc.hash_a.len().min(12)],
        &assoc.hash_b[..assoc.hash_b.len().min(12)],
        assoc.strength
    );
    let mut metadata = serde_json::Map::new();
    metadata.insert("hash_a".to_string(), serde_json::Value::String(assoc.hash_a.clone()));
    metadata.insert("hash_b".to_string(), serde_json::Value::String(assoc.hash_b.clone()));
    metadata.insert(
        "strength".to_string(),
        serde_json::Number::from_f64(assoc.strength as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
    );

    let memory = Memory::new(
        content,
        "system",
        ["consolidated:association".to_string()],
        metadata,
        assoc.discovered_at,
    )?;
    store.store(memory).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, HashingEmbedder};
    use std::sync::Arc;

    async fn new_store() -> (crate::storage::sqlite::SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(16));
        let store = crate::storage::sqlite::SqliteStore::new(dir.path().join("t.db"), embedder, 5000, 2000, 4).unwrap();
        store.initialize().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn run_never_exceeds_max_pairs() {
        let (store, _dir) = new_store().await;
        for i in 0..20 {
            let memory = Memory::new(format!("memory number {i}"), "note", [], Default::default(), i as f64).unwrap();
            store.store(memory).await.unwrap();
        }
        let config = AssociationsConfig { max_pairs: 3, seed: 1 };
        let report = run(&store, 1000.0, &config).await;
        assert!(report.items_changed <= 3);
    }
}

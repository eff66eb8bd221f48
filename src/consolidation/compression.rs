//! Semantic compression (spec §4.H stage 4). For each cluster at or above
//! `size_threshold`, synthesizes a short (<=500 char) summary `Memory`
//! tagged `consolidated:compressed`, carrying the tag union of its
//! members and a `source_hashes` metadata back-reference (spec §9: broken
//! by a list of hashes rather than a live pointer, to avoid cyclic
//! references between a memory and its consolidation products). Originals
//! are preserved unless `preserve_originals=false`.

use crate::model::Memory;
use crate::storage::{MaintenanceStore, MemoryStore, TagMatch};

use super::types::StageReport;

const SUMMARY_MAX_LEN: usize = 500;
pub const COMPRESSED_TAG: &str = "consolidated:compressed";

pub struct CompressionConfig {
    pub size_threshold: usize,
    pub preserve_originals: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { size_threshold: 5, preserve_originals: true }
    }
}

pub async fn run(store: &dyn MaintenanceStore, now: f64, config: &CompressionConfig) -> StageReport {
    let mut report = StageReport::default();

    let clusters = match store.list_clusters().await {
        Ok(c) => c,
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };

    for cluster in clusters {
        report.items_processed += 1;
        if cluster.member_hashes.len() < config.size_threshold {
            continue;
        }

        // Already compressed clusters are never re-compressed: skip if a
        // summary referencing this exact membership already exists.
        let already_compressed = match store.search_by_tag(&[COMPRESSED_TAG.to_string()], TagMatch::Any).await {
            Ok(existing) => existing.iter().any(|m| {
                m.metadata
                    .get("source_cluster_id")
                    .map(|v| matches!(v, crate::model::MetadataValue::Integer(id) if *id == cluster.id))
                    .unwrap_or(false)
            }),
            Err(_) => false,
        };
        if already_compressed {
            continue;
        }

        let tag_map = match store.tags_for_hashes(&cluster.member_hashes).await {
            Ok(t) => t,
            Err(_) => Default::default(),
        };
        let mut tag_union: std::collections::BTreeSet<String> = tag_map
            .values()
            .flatten()
            .cloned()
            .collect();
        tag_union.insert(COMPRESSED_TAG.to_string());

        let summary_content = synthesize_summary(&cluster.theme, cluster.member_hashes.len());

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "source_hashes".to_string(),
            serde_json::Value::Array(
                cluster.member_hashes.iter().map(|h| serde_json::Value::String(h.clone())).collect(),
            ),
        );
        metadata.insert("source_cluster_id".to_string(), serde_json::Value::Number(cluster.id.into()));

        let summary = match Memory::new(summary_content, "system", tag_union, metadata, now) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(error = %e, "compression: failed to build summary memory");
                continue;
            }
        };

        if let Err(e) = store.store(summary).await {
            tracing::warn!(error = %e, "compression: failed to store summary");
            continue;
        }
        report.items_changed += 1;

        if !config.preserve_originals {
            for hash in &cluster.member_hashes {
                let _ = store.delete(hash).await;
            }
        }
        tokio::task::yield_now().await;
    }

    report
}

fn synthesize_summary(theme: &str, member_count: usize) -> String {
    let mut summary = format!("Consolidated summary of {member_count} memories about '{theme}'.");
    summary.truncate(SUMMARY_MAX_LEN);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidation::types::Cluster;
    use crate::embedding::{Embedder, HashingEmbedder};
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
    async fn compresses_cluster_above_threshold_and_preserves_originals() {
        let (store, _dir) = new_store().await;
        let mut hashes = Vec::new();
        for i in 0..6 {
            let memory = Memory::new(format!("theme memory {i}"), "note", ["proj".to_string()], Default::default(), i as f64).unwrap();
            hashes.push(memory.content_hash.clone());
            store.store(memory).await.unwrap();
        }
        let cluster = Cluster { id: 1, member_hashes: hashes.clone(), centroid: vec![0.0; 4], theme: "proj".to_string(), created_at: 0.0 };
        store.create_cluster(&cluster).await.unwrap();

        let config = CompressionConfig::default();
        let report = run(&store, 100.0, &config).await;
        assert_eq!(report.items_changed, 1);

        let summaries = store.search_by_tag(&[COMPRESSED_TAG.to_string()], TagMatch::Any).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].content.len() <= SUMMARY_MAX_LEN);

        for hash in &hashes {
            assert!(store.retrieve("theme memory", 10).await.unwrap().iter().any(|(m, _)| &m.content_hash == hash)
                || store.get_recent(20).await.unwrap().iter().any(|m| &m.content_hash == hash));
        }
    }

    #[tokio::test]
    async fn skips_clusters_below_threshold() {
        let (store, _dir) = new_store().await;
        let cluster = Cluster { id: 1, member_hashes: vec!["a".to_string()], centroid: vec![], theme: "x".to_string(), created_at: 0.0 };
        store.create_cluster(&cluster).await.unwrap();
        let report = run(&store, 0.0, &CompressionConfig::default()).await;
        assert_eq!(report.items_changed, 0);
    }
}

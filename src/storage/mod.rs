//! The async storage interface every backend implements, plus the result
//! and status types shared across backends.

#[cfg(feature = "cloud")]
pub mod cloud;
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Memory, MetadataValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagMatch {
    Any,
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutcome {
    Stored(Memory),
    Duplicate { existing_hash: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated(Memory),
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageStats {
    pub total_memories: u64,
    pub storage_bytes: u64,
    pub backend: String,
    pub tag_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy { details: String },
    Degraded { reason: String },
    Unhealthy { reason: String },
}

/// A callback sink for long-running batch operations to report progress.
/// Invoked at roughly decile boundaries (0.1, 0.2, ..., 1.0).
pub trait ProgressSink: Send + Sync {
    fn report(&self, fraction: f64, message: &str);
}

impl<F: Fn(f64, &str) + Send + Sync> ProgressSink for F {
    fn report(&self, fraction: f64, message: &str) {
        self(fraction, message)
    }
}

/// The only contract the query planner, consolidation pipeline, and
/// `commands` facade depend on. Every method is a suspension point; pure
/// transforms (hashing, scoring) stay synchronous and are called from
/// inside these methods, never exposed as `async fn` themselves.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn initialize(&self) -> Result<()>;

    async fn store(&self, memory: Memory) -> Result<StoreOutcome>;

    /// Ordered descending by the composite score (see `query::planner`).
    async fn retrieve(&self, query: &str, n: usize) -> Result<Vec<(Memory, f32)>>;

    async fn search_by_tag(&self, tags: &[String], mode: TagMatch) -> Result<Vec<Memory>>;

    /// With both `query` and `window` absent, equivalent to `get_recent(n)`.
    async fn recall(
        &self,
        query: Option<&str>,
        window: Option<(f64, f64)>,
        n: usize,
    ) -> Result<Vec<Memory>>;

    async fn delete(&self, hash: &str) -> Result<DeleteOutcome>;

    async fn delete_by_tag(&self, tag: &str) -> Result<usize>;

    async fn delete_by_tags(
        &self,
        tags: &[String],
        progress: Option<&(dyn ProgressSink)>,
    ) -> Result<usize>;

    /// With `preserve_timestamps=true`, `created_at`/`updated_at` are left
    /// untouched.
    async fn update_metadata(
        &self,
        hash: &str,
        updates: HashMap<String, MetadataValue>,
        preserve_timestamps: bool,
    ) -> Result<UpdateOutcome>;

    async fn cleanup_duplicates(&self) -> Result<usize>;

    async fn get_all_tags(&self) -> Result<Vec<(String, usize)>>;

    async fn get_recent(&self, n: usize) -> Result<Vec<Memory>>;

    async fn get_stats(&self) -> Result<StorageStats>;

    async fn health(&self) -> Result<HealthStatus>;
}

/// Extra, consolidation-only surface a backend exposes so the pipeline in
/// `consolidation::` can do its work without reaching around the storage
/// interface (spec §4.H: "the pipeline acquires only the normal storage
/// interface"). Kept separate from [`MemoryStore`] because these are not
/// part of the external-facing operation table in spec §4.D.
#[async_trait]
pub trait MaintenanceStore: MemoryStore {
    /// All active memories' hash, creation time, and type — the decay
    /// stage's input.
    async fn list_active_summaries(&self) -> Result<Vec<(String, f64, String)>>;

    async fn set_relevance(&self, hash: &str, relevance: f64) -> Result<()>;

    /// Hash + embedding pairs for memories touched since `since` (or all,
    /// if `since` is `None`), capped at `limit`.
    async fn list_embeddings(&self, since: Option<f64>, limit: usize) -> Result<Vec<(String, Vec<f32>)>>;

    async fn archive(&self, hash: &str) -> Result<()>;

    /// Hard-deletes archived memories whose `updated_at` (the time they
    /// were archived) precedes `cutoff`. Returns the count removed.
    async fn hard_delete_archived_before(&self, cutoff: f64) -> Result<usize>;

    async fn create_cluster(&self, cluster: &crate::consolidation::types::Cluster) -> Result<i64>;

    async fn list_clusters(&self) -> Result<Vec<crate::consolidation::types::Cluster>>;

    /// Memories with `relevance < threshold` and no access since `cutoff`
    /// — the forgetting stage's candidate set.
    async fn list_forgetting_candidates(&self, relevance_threshold: f64, access_cutoff: f64) -> Result<Vec<String>>;

    /// Tags for each of `hashes`, keyed by hash — the clustering stage's
    /// input to the majority-shared-tag theme heuristic.
    async fn tags_for_hashes(&self, hashes: &[String]) -> Result<HashMap<String, Vec<String>>>;

    /// Hashes tagged with [`crate::model::EMBEDDING_PROVIDER_METADATA_KEY`]
    /// = fallback (spec §4.C) — the associative discovery stage's exclusion
    /// set, so it never builds an association out of a low-quality fallback
    /// embedding.
    async fn list_fallback_embedded_hashes(&self) -> Result<std::collections::HashSet<String>>;
}

//! Derived consolidation entities and the per-run report shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Association {
    pub hash_a: String,
    pub hash_b: String,
    pub strength: f32,
    pub discovered_at: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: i64,
    pub member_hashes: Vec<String>,
    pub centroid: Vec<f32>,
    pub theme: String,
    pub created_at: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressedSummary {
    pub content_hash: String,
    pub source_hashes: Vec<String>,
    pub cluster_id: i64,
}

/// Per-stage outcome. A stage that fails records its error here rather
/// than aborting the remaining stages (spec: "errors in one stage do not
/// abort later stages").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageReport {
    pub items_processed: usize,
    pub items_changed: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub decay: Option<StageReport>,
    pub associations: Option<StageReport>,
    pub clustering: Option<StageReport>,
    pub compression: Option<StageReport>,
    pub forgetting: Option<StageReport>,
}

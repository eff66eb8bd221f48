//! The core `Memory` entity, its content hasher, and the closed metadata
//! value type.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{MemoryError, Result};

/// A single stored scalar of memory metadata. Deliberately non-nested:
/// arrays and objects are rejected at the construction boundary so every
/// backend can index metadata columns without a JSON path engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Null => Ok(MetadataValue::Null),
            serde_json::Value::Bool(b) => Ok(MetadataValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(MetadataValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(MetadataValue::Float(f))
                } else {
                    Err(MemoryError::InvalidInput(format!("unrepresentable number: {n}")))
                }
            }
            serde_json::Value::String(s) => Ok(MetadataValue::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(
                MemoryError::InvalidInput("metadata values may not be nested".to_string()),
            ),
        }
    }
}

/// Consolidation decay bucket. `memory_type` itself is a free-form string
/// (see below); this is the coarse classification the decay stage uses to
/// pick a half-life, derived from the string via [`decay_class`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecayClass {
    Critical,
    Reference,
    Standard,
    Temporary,
}

impl DecayClass {
    pub fn half_life_days(self) -> f64 {
        match self {
            DecayClass::Critical => 365.0,
            DecayClass::Reference => 180.0,
            DecayClass::Standard => 30.0,
            DecayClass::Temporary => 7.0,
        }
    }

    pub fn base_weight(self) -> f64 {
        match self {
            DecayClass::Critical => 1.0,
            DecayClass::Reference => 0.8,
            DecayClass::Standard => 0.6,
            DecayClass::Temporary => 0.3,
        }
    }
}

/// Map a free-form `memory_type` string onto a decay bucket. Unrecognized
/// types default to `Standard`.
pub fn decay_class(memory_type: &str) -> DecayClass {
    match memory_type {
        "critical" => DecayClass::Critical,
        "decision" | "architecture" | "reference" => DecayClass::Reference,
        "todo" | "temporary" => DecayClass::Temporary,
        _ => DecayClass::Standard,
    }
}

/// Additive ranking bonus for `type_bonus(memory_type)` in the composite
/// recall score (spec §4.G). Unknown types score 0.
pub fn type_bonus(memory_type: &str) -> f32 {
    match memory_type {
        "decision" => 0.30,
        "architecture" => 0.30,
        "reference" => 0.20,
        "insight" => 0.20,
        "session" => 0.15,
        "bug-fix" => 0.15,
        "feature" => 0.10,
        "note" => 0.05,
        "todo" => 0.05,
        "temporary" => -0.10,
        _ => 0.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Active,
    Archived,
    Deleted,
}

impl Default for LifecycleState {
    fn default() -> Self {
        LifecycleState::Active
    }
}

/// The unit of storage: one piece of content, its embedding, and the
/// bookkeeping fields consolidation and recall operate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub content_hash: String,
    pub content: String,
    /// Short, free-form classifier (e.g. `note`, `decision`, `reference`,
    /// `session`) used only for ranking bonuses and decay bucketing.
    pub memory_type: String,
    pub tags: BTreeSet<String>,
    pub metadata: std::collections::HashMap<String, MetadataValue>,

    #[serde(skip)]
    pub embedding: Vec<f32>,

    pub created_at: f64,
    pub created_at_iso: String,
    pub updated_at: f64,
    pub updated_at_iso: String,

    pub relevance: f64,
    pub lifecycle_state: LifecycleState,
    pub access_count: u64,
    pub last_accessed_at: Option<f64>,
}

fn normalize_tags(tags: impl IntoIterator<Item = String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

impl Memory {
    /// Construct a new memory at `now` (seconds since epoch), hashing its
    /// content and rejecting metadata that doesn't fit [`MetadataValue`].
    /// Trims `content`, normalizes tags (trim, drop empties, dedupe via the
    /// `BTreeSet`), and fails with `InvalidInput` on empty content.
    pub fn new(
        content: impl Into<String>,
        memory_type: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
        metadata: serde_json::Map<String, serde_json::Value>,
        now: f64,
    ) -> Result<Self> {
        let content = content.into().trim().to_string();
        if content.is_empty() {
            return Err(MemoryError::InvalidInput("content must not be empty".to_string()));
        }

        let mut parsed_metadata = std::collections::HashMap::with_capacity(metadata.len());
        for (k, v) in metadata {
            parsed_metadata.insert(k, MetadataValue::from_json(&v)?);
        }

        let memory_type = memory_type.into();
        let content_hash = content_hash(&content);
        let iso = iso_from_seconds(now);
        let base_weight = decay_class(&memory_type).base_weight();

        Ok(Self {
            content_hash,
            content,
            memory_type,
            tags: normalize_tags(tags),
            metadata: parsed_metadata,
            embedding: Vec::new(),
            created_at: now,
            created_at_iso: iso.clone(),
            updated_at: now,
            updated_at_iso: iso,
            relevance: base_weight,
            lifecycle_state: LifecycleState::default(),
            access_count: 0,
            last_accessed_at: None,
        })
    }

    /// Apply a metadata patch, bumping `updated_at` unless the caller
    /// explicitly asked to preserve timestamps (e.g. a backfill import).
    pub fn apply_metadata_update(
        &mut self,
        updates: std::collections::HashMap<String, MetadataValue>,
        preserve_timestamps: bool,
        now: f64,
    ) {
        self.metadata.extend(updates);
        if !preserve_timestamps {
            self.updated_at = now;
            self.updated_at_iso = iso_from_seconds(now);
        }
    }

    pub fn record_access(&mut self, now: f64) {
        self.access_count += 1;
        self.last_accessed_at = Some(now);
    }
}

/// Reserved metadata key a store sets on a memory whose embedding came from
/// the deterministic hashing fallback rather than the configured model
/// (spec §4.C), so associative discovery can exclude it.
pub const EMBEDDING_PROVIDER_METADATA_KEY: &str = "_embedding_provider";
/// Value `EMBEDDING_PROVIDER_METADATA_KEY` is set to for fallback-embedded
/// memories.
pub const FALLBACK_EMBEDDING_PROVIDER_TAG: &str = "fallback";

/// `LIKE` pattern matching a `metadata_json` blob carrying the fallback
/// provider tag, for backends that filter on the serialized column rather
/// than a typed one.
pub fn fallback_metadata_like_pattern() -> String {
    format!("%\"{EMBEDDING_PROVIDER_METADATA_KEY}\":\"{FALLBACK_EMBEDDING_PROVIDER_TAG}\"%")
}

/// SHA-256 of the raw content bytes, lowercase hex. The primary key every
/// backend dedups on (invariant: identical content always hashes identically
/// and never collides with distinct content in practice).
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn iso_from_seconds(seconds: f64) -> String {
    let millis = (seconds * 1000.0).round() as i64;
    chrono::DateTime::from_timestamp_millis(millis)
        .unwrap_or_default()
        .to_rfc3339()
}

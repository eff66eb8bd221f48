//! Table definitions for schema version 1 (see `migrations` for the
//! version ladder). Timestamps are stored as floating-point seconds; the
//! `_iso` columns are read-only RFC 3339 mirrors for human inspection.

pub const CREATE_MEMORIES: &str = "
CREATE TABLE IF NOT EXISTS memories (
    content_hash      TEXT PRIMARY KEY,
    content           TEXT NOT NULL,
    memory_type       TEXT NOT NULL,
    metadata_json     TEXT NOT NULL DEFAULT '{}',
    created_at        REAL NOT NULL,
    created_at_iso    TEXT NOT NULL,
    updated_at        REAL NOT NULL,
    updated_at_iso    TEXT NOT NULL,
    relevance         REAL NOT NULL DEFAULT 1.0,
    lifecycle_state   TEXT NOT NULL DEFAULT 'active',
    access_count      INTEGER NOT NULL DEFAULT 0,
    last_accessed_at  REAL,
    vector_missing    INTEGER NOT NULL DEFAULT 0
);";

pub const CREATE_TAGS: &str = "
CREATE TABLE IF NOT EXISTS tags (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);";

pub const CREATE_MEMORY_TAGS: &str = "
CREATE TABLE IF NOT EXISTS memory_tags (
    content_hash TEXT NOT NULL REFERENCES memories(content_hash) ON DELETE CASCADE,
    tag_id       INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (content_hash, tag_id)
);";

pub const CREATE_MEMORY_TAGS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag_id);";

pub const CREATE_MEMORIES_UPDATED_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_memories_updated_at ON memories(updated_at DESC);";

pub const CREATE_MEMORIES_LIFECYCLE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_memories_lifecycle ON memories(lifecycle_state);";

/// sqlite-vec virtual table mapping a rowid to an embedding; `vectors_map`
/// bridges rowid back to content_hash, since vec0 tables key on rowid only.
pub const CREATE_VECTORS_MAP: &str = "
CREATE TABLE IF NOT EXISTS vectors_map (
    content_hash TEXT PRIMARY KEY REFERENCES memories(content_hash) ON DELETE CASCADE,
    rowid        INTEGER NOT NULL UNIQUE
);";

pub fn create_vectors_vtab(dimension: u32) -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vectors USING vec0(embedding float[{dimension}]);"
    )
}

/// Derived consolidation bookkeeping: clusters are not independently
/// retrievable content, so they live in a dedicated side table rather
/// than as tagged memories (associations and summaries, by contrast, are
/// persisted as ordinary tagged memories — see model.rs / consolidation).
pub const CREATE_CLUSTERS: &str = "
CREATE TABLE IF NOT EXISTS clusters (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    theme         TEXT NOT NULL,
    centroid_json TEXT NOT NULL,
    created_at    REAL NOT NULL
);";

pub const CREATE_CLUSTER_MEMBERS: &str = "
CREATE TABLE IF NOT EXISTS cluster_members (
    cluster_id   INTEGER NOT NULL REFERENCES clusters(id) ON DELETE CASCADE,
    content_hash TEXT NOT NULL REFERENCES memories(content_hash) ON DELETE CASCADE,
    PRIMARY KEY (cluster_id, content_hash)
);";

pub const CREATE_SCHEMA_META: &str = "
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);";

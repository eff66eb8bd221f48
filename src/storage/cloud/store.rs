//! `CloudStore`: the managed-backend `MemoryStore` implementation,
//! composing an authoritative sqlite metadata table (the "managed SQL
//! service"), a remote [`VectorIndexClient`], and an object store for
//! over-threshold content (spec §4.F).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::concurrency::KeyedLocks;
use crate::consolidation::types::Cluster;
use crate::embedding::Embedder;
use crate::error::{MemoryError, Result};
use crate::model::{iso_from_seconds, LifecycleState, Memory, MetadataValue};
use crate::query::planner::{score_candidates, ScoreWeights};
use crate::storage::sqlite::connection::{configure_cloud_safe, SqliteConnectionManager};
use crate::storage::{
    DeleteOutcome, HealthStatus, MaintenanceStore, MemoryStore, ProgressSink, StorageStats,
    StoreOutcome, TagMatch, UpdateOutcome,
};

use super::object_store::{object_key_for, ObjectStore, OBJECT_KEY_PREFIX};
use super::vector_index::VectorIndexClient;

pub struct CloudStore {
    conn: Arc<SqliteConnectionManager>,
    embedder: Arc<dyn Embedder>,
    vector_index: Arc<dyn VectorIndexClient>,
    object_store: Arc<ObjectStore>,
    locks: KeyedLocks,
    overfetch_factor: usize,
    weights: ScoreWeights,
    large_content_threshold_bytes: u64,
}

impl CloudStore {
    pub fn new(
        db_path: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
        vector_index: Arc<dyn VectorIndexClient>,
        object_store: Arc<ObjectStore>,
        busy_timeout_ms: u64,
        cache_pages: i64,
        overfetch_factor: usize,
        large_content_threshold_bytes: u64,
    ) -> Result<Self> {
        let conn = SqliteConnectionManager::open(db_path, busy_timeout_ms, cache_pages)?;
        Ok(Self {
            conn: Arc::new(conn),
            embedder,
            vector_index,
            object_store,
            locks: KeyedLocks::new(),
            overfetch_factor: overfetch_factor.max(1),
            weights: ScoreWeights::default(),
            large_content_threshold_bytes,
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        use crate::storage::sqlite::schema::*;
        configure_cloud_safe(conn)?;
        conn.execute_batch(CREATE_SCHEMA_META)?;
        conn.execute_batch(CREATE_MEMORIES)?;
        conn.execute_batch(CREATE_TAGS)?;
        conn.execute_batch(CREATE_MEMORY_TAGS)?;
        conn.execute_batch(CREATE_MEMORY_TAGS_INDEX)?;
        conn.execute_batch(CREATE_MEMORIES_UPDATED_INDEX)?;
        conn.execute_batch(CREATE_MEMORIES_LIFECYCLE_INDEX)?;
        conn.execute_batch(CREATE_CLUSTERS)?;
        conn.execute_batch(CREATE_CLUSTER_MEMBERS)?;
        conn.execute(
            "INSERT INTO schema_meta(key, value) VALUES ('version', '1')
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [],
        )?;
        Ok(())
    }

    fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
        let metadata_json: String = row.get("metadata_json")?;
        let metadata: HashMap<String, MetadataValue> = serde_json::from_str(&metadata_json).unwrap_or_default();
        let lifecycle_str: String = row.get("lifecycle_state")?;

        Ok(Memory {
            content_hash: row.get("content_hash")?,
            content: row.get("content")?,
            memory_type: row.get("memory_type")?,
            tags: Default::default(),
            metadata,
            embedding: Vec::new(),
            created_at: row.get("created_at")?,
            created_at_iso: row.get("created_at_iso")?,
            updated_at: row.get("updated_at")?,
            updated_at_iso: row.get("updated_at_iso")?,
            relevance: row.get("relevance")?,
            lifecycle_state: parse_lifecycle(&lifecycle_str),
            access_count: row.get::<_, i64>("access_count")? as u64,
            last_accessed_at: row.get("last_accessed_at")?,
        })
    }

    fn load_tags(conn: &Connection, hash: &str) -> Result<std::collections::BTreeSet<String>> {
        let mut stmt = conn.prepare(
            "SELECT t.name FROM tags t JOIN memory_tags mt ON mt.tag_id = t.id WHERE mt.content_hash = ?1",
        )?;
        let names = stmt.query_map([hash], |r| r.get::<_, String>(0))?.filter_map(|r| r.ok()).collect();
        Ok(names)
    }

    fn write_tags(conn: &Connection, hash: &str, tags: &std::collections::BTreeSet<String>) -> Result<()> {
        conn.execute("DELETE FROM memory_tags WHERE content_hash = ?1", [hash])?;
        for tag in tags {
            conn.execute("INSERT INTO tags(name) VALUES (?1) ON CONFLICT(name) DO NOTHING", [tag])?;
            conn.execute(
                "INSERT INTO memory_tags(content_hash, tag_id) SELECT ?1, id FROM tags WHERE name = ?2",
                params![hash, tag],
            )?;
        }
        Ok(())
    }

    fn load_by_hash(&self, conn: &Connection, hash: &str) -> Result<Option<Memory>> {
        let memory: Option<Memory> = conn
            .query_row("SELECT * FROM memories WHERE content_hash = ?1", [hash], Self::row_to_memory)
            .optional()?;
        match memory {
            Some(mut m) => {
                m.tags = Self::load_tags(conn, hash)?;
                Ok(Some(m))
            }
            None => Ok(None),
        }
    }

    /// Replaces offloaded content (`cloud-object:<hash>`) with the real
    /// text fetched from the object store. A no-op for inline content.
    async fn hydrate(&self, mut memory: Memory) -> Result<Memory> {
        if let Some(hash) = memory.content.strip_prefix(OBJECT_KEY_PREFIX) {
            let bytes = self.object_store.get(&object_key_for(hash)).await?;
            memory.content = String::from_utf8_lossy(&bytes).into_owned();
        }
        Ok(memory)
    }

    fn offload_marker(hash: &str) -> String {
        format!("{OBJECT_KEY_PREFIX}{hash}")
    }
}

fn parse_lifecycle(s: &str) -> LifecycleState {
    match s {
        "archived" => LifecycleState::Archived,
        "deleted" => LifecycleState::Deleted,
        _ => LifecycleState::Active,
    }
}

fn lifecycle_str(s: LifecycleState) -> &'static str {
    match s {
        LifecycleState::Active => "active",
        LifecycleState::Archived => "archived",
        LifecycleState::Deleted => "deleted",
    }
}

fn now_seconds() -> f64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[async_trait]
impl MemoryStore for CloudStore {
    async fn initialize(&self) -> Result<()> {
        let conn = self.conn.writer.lock().await;
        Self::migrate(&conn)
    }

    async fn store(&self, mut memory: Memory) -> Result<StoreOutcome> {
        let _guard = self.locks.lock(&memory.content_hash).await;

        if memory.embedding.is_empty() {
            memory.embedding = self.embedder.embed(&memory.content).await?;
            if self.embedder.model_id() == crate::embedding::FALLBACK_MODEL_ID {
                memory.metadata.insert(
                    crate::model::EMBEDDING_PROVIDER_METADATA_KEY.to_string(),
                    MetadataValue::Text(crate::model::FALLBACK_EMBEDDING_PROVIDER_TAG.to_string()),
                );
            }
        }

        let offloaded = memory.content.len() as u64 > self.large_content_threshold_bytes;
        if offloaded {
            self.object_store.put(&object_key_for(&memory.content_hash), memory.content.as_bytes()).await?;
        }
        let stored_content = if offloaded { Self::offload_marker(&memory.content_hash) } else { memory.content.clone() };

        let conn = self.conn.writer.lock().await;
        let existing: Option<String> = conn
            .query_row("SELECT content_hash FROM memories WHERE content_hash = ?1", [&memory.content_hash], |r| r.get(0))
            .optional()?;
        if existing.is_some() {
            return Ok(StoreOutcome::Duplicate { existing_hash: memory.content_hash });
        }

        let metadata_json = serde_json::to_string(&memory.metadata)?;
        conn.execute(
            "INSERT INTO memories (
                content_hash, content, memory_type, metadata_json,
                created_at, created_at_iso, updated_at, updated_at_iso,
                relevance, lifecycle_state, access_count, last_accessed_at, vector_missing
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
            params![
                memory.content_hash,
                stored_content,
                memory.memory_type,
                metadata_json,
                memory.created_at,
                memory.created_at_iso,
                memory.updated_at,
                memory.updated_at_iso,
                memory.relevance,
                lifecycle_str(memory.lifecycle_state),
                memory.access_count as i64,
                memory.last_accessed_at,
                0,
            ],
        )?;
        Self::write_tags(&conn, &memory.content_hash, &memory.tags)?;
        drop(conn);

        // Metadata row is authoritative and already committed; a vector
        // write failure here only marks the row for the reconciler, it
        // never fails the store operation itself (spec §4.F consistency
        // model).
        if let Err(e) = self.vector_index.upsert(&memory.content_hash, &memory.embedding).await {
            tracing::warn!(hash = %memory.content_hash, error = %e, "store: vector upsert failed, marking for reconciliation");
            let conn = self.conn.writer.lock().await;
            conn.execute(
                "UPDATE memories SET vector_missing = 1 WHERE content_hash = ?1",
                [&memory.content_hash],
            )?;
        }

        Ok(StoreOutcome::Stored(memory))
    }

    async fn retrieve(&self, query: &str, n: usize) -> Result<Vec<(Memory, f32)>> {
        let query_vector = self.embedder.embed(query).await?;
        let k = (n * self.overfetch_factor).max(n);
        let neighbors = self.vector_index.query_top_k(&query_vector, k).await?;

        let conn = self.conn.open_reader()?;
        let mut candidates = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            if let Some(mut memory) = self.load_by_hash(&conn, &neighbor.content_hash)? {
                if memory.lifecycle_state != LifecycleState::Active {
                    continue;
                }
                memory = self.hydrate(memory).await?;
                let similarity = 1.0 - (neighbor.distance / 2.0).min(1.0);
                candidates.push((memory, similarity));
            }
        }

        let now = now_seconds();
        let scored = score_candidates(candidates, query, now, &self.weights);
        Ok(scored.into_iter().take(n).collect())
    }

    async fn search_by_tag(&self, tags: &[String], mode: TagMatch) -> Result<Vec<Memory>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.open_reader()?;
        let placeholders: Vec<String> = tags.iter().map(|_| "?".to_string()).collect();
        let params_vec: Vec<&dyn rusqlite::ToSql> = tags.iter().map(|t| t as &dyn rusqlite::ToSql).collect();
        let having = match mode {
            TagMatch::Any => "HAVING COUNT(DISTINCT t.name) >= 1".to_string(),
            TagMatch::All => format!("HAVING COUNT(DISTINCT t.name) = {}", tags.len()),
        };
        let sql = format!(
            "SELECT m.* FROM memories m
             JOIN memory_tags mt ON mt.content_hash = m.content_hash
             JOIN tags t ON t.id = mt.tag_id
             WHERE t.name IN ({}) AND m.lifecycle_state = 'active'
             GROUP BY m.content_hash
             {}
             ORDER BY m.updated_at DESC",
            placeholders.join(","),
            having
        );
        let mut stmt = conn.prepare(&sql)?;
        let memories: Vec<Memory> = stmt.query_map(params_vec.as_slice(), Self::row_to_memory)?.filter_map(|r| r.ok()).collect();
        drop(stmt);

        let mut out = Vec::with_capacity(memories.len());
        for mut memory in memories {
            memory.tags = Self::load_tags(&conn, &memory.content_hash)?;
            out.push(self.hydrate(memory).await?);
        }
        Ok(out)
    }

    async fn recall(&self, query: Option<&str>, window: Option<(f64, f64)>, n: usize) -> Result<Vec<Memory>> {
        match (query, window) {
            (None, None) => self.get_recent(n).await,
            (Some(q), None) => Ok(self.retrieve(q, n).await?.into_iter().map(|(m, _)| m).collect()),
            (q_opt, Some((start, end))) => {
                let conn = self.conn.open_reader()?;
                let mut stmt = conn.prepare(
                    "SELECT * FROM memories WHERE created_at BETWEEN ?1 AND ?2
                     AND lifecycle_state = 'active' ORDER BY created_at DESC",
                )?;
                let rows: Vec<Memory> = stmt.query_map(params![start, end], Self::row_to_memory)?.filter_map(|r| r.ok()).collect();
                drop(stmt);

                let mut memories = Vec::with_capacity(rows.len());
                for mut memory in rows {
                    memory.tags = Self::load_tags(&conn, &memory.content_hash)?;
                    memories.push(self.hydrate(memory).await?);
                }
                drop(conn);

                if let Some(q) = q_opt {
                    let query_vector = self.embedder.embed(q).await?;
                    let mut scored: Vec<(f32, Memory)> = Vec::with_capacity(memories.len());
                    for memory in memories {
                        let embedding = self.embedder.embed(&memory.content).await.unwrap_or_default();
                        let sim = crate::embedding::cosine_similarity(&query_vector, &embedding);
                        scored.push((sim, memory));
                    }
                    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
                    memories = scored.into_iter().map(|(_, m)| m).collect();
                }
                memories.truncate(n);
                Ok(memories)
            }
        }
    }

    async fn delete(&self, hash: &str) -> Result<DeleteOutcome> {
        let _guard = self.locks.lock(hash).await;
        let conn = self.conn.writer.lock().await;
        let offloaded: Option<String> = conn
            .query_row("SELECT content FROM memories WHERE content_hash = ?1", [hash], |r| r.get(0))
            .optional()?;
        let deleted = conn.execute("DELETE FROM memories WHERE content_hash = ?1", [hash])?;
        drop(conn);

        if deleted > 0 {
            if let Err(e) = self.vector_index.delete(hash).await {
                tracing::warn!(hash = %hash, error = %e, "delete: failed to remove vector, will remain stale remotely");
            }
            if let Some(content) = offloaded {
                if content.starts_with(OBJECT_KEY_PREFIX) {
                    let _ = self.object_store.delete(&object_key_for(hash)).await;
                }
            }
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::NotFound)
        }
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<usize> {
        let hashes: Vec<String> = {
            let conn = self.conn.writer.lock().await;
            let mut stmt = conn.prepare(
                "SELECT m.content_hash FROM memories m
                 JOIN memory_tags mt ON mt.content_hash = m.content_hash
                 JOIN tags t ON t.id = mt.tag_id WHERE t.name = ?1",
            )?;
            stmt.query_map([tag], |r| r.get(0))?.filter_map(|r| r.ok()).collect()
        };
        let mut removed = 0usize;
        for hash in &hashes {
            if matches!(self.delete(hash).await?, DeleteOutcome::Deleted) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Resolves the full hash set across all of `tags` first, then deletes
    /// one memory at a time so progress can be reported at decile
    /// boundaries of the whole set (spec §4.D), rather than once per tag.
    async fn delete_by_tags(&self, tags: &[String], progress: Option<&(dyn ProgressSink)>) -> Result<usize> {
        if tags.is_empty() {
            return Ok(0);
        }
        let hashes: Vec<String> = {
            let conn = self.conn.writer.lock().await;
            let placeholders: Vec<String> = tags.iter().map(|_| "?".to_string()).collect();
            let params_vec: Vec<&dyn rusqlite::ToSql> = tags.iter().map(|t| t as &dyn rusqlite::ToSql).collect();
            let sql = format!(
                "SELECT DISTINCT m.content_hash FROM memories m
                 JOIN memory_tags mt ON mt.content_hash = m.content_hash
                 JOIN tags t ON t.id = mt.tag_id WHERE t.name IN ({})",
                placeholders.join(",")
            );
            let mut stmt = conn.prepare(&sql)?;
            stmt.query_map(params_vec.as_slice(), |r| r.get(0))?.filter_map(|r| r.ok()).collect()
        };

        let total = hashes.len();
        let mut removed = 0usize;
        let mut last_decile = 0usize;
        for (i, hash) in hashes.iter().enumerate() {
            if matches!(self.delete(hash).await?, DeleteOutcome::Deleted) {
                removed += 1;
            }
            if let Some(sink) = progress {
                let decile = ((i + 1) * 10 / total.max(1)).min(10);
                if decile > last_decile {
                    last_decile = decile;
                    sink.report(decile as f64 / 10.0, &format!("deleted {}/{total}", i + 1));
                }
            }
        }
        Ok(removed)
    }

    async fn update_metadata(
        &self,
        hash: &str,
        updates: HashMap<String, MetadataValue>,
        preserve_timestamps: bool,
    ) -> Result<UpdateOutcome> {
        let _guard = self.locks.lock(hash).await;
        let conn = self.conn.writer.lock().await;
        let existing_json: Option<String> = conn
            .query_row("SELECT metadata_json FROM memories WHERE content_hash = ?1", [hash], |r| r.get(0))
            .optional()?;
        let Some(existing_json) = existing_json else {
            return Ok(UpdateOutcome::NotFound);
        };
        let mut metadata: HashMap<String, MetadataValue> = serde_json::from_str(&existing_json).unwrap_or_default();
        metadata.extend(updates);
        let metadata_json = serde_json::to_string(&metadata)?;

        if preserve_timestamps {
            conn.execute("UPDATE memories SET metadata_json = ?1 WHERE content_hash = ?2", params![metadata_json, hash])?;
        } else {
            let now = now_seconds();
            conn.execute(
                "UPDATE memories SET metadata_json = ?1, updated_at = ?2, updated_at_iso = ?3 WHERE content_hash = ?4",
                params![metadata_json, now, iso_from_seconds(now), hash],
            )?;
        }

        let memory = self.load_by_hash(&conn, hash)?.ok_or_else(|| MemoryError::NotFound { hash: hash.to_string() })?;
        drop(conn);
        Ok(UpdateOutcome::Updated(self.hydrate(memory).await?))
    }

    async fn cleanup_duplicates(&self) -> Result<usize> {
        let duplicate_groups: Vec<String> = {
            let conn = self.conn.open_reader()?;
            let mut stmt = conn.prepare("SELECT content FROM memories GROUP BY content HAVING COUNT(*) > 1")?;
            stmt.query_map([], |r| r.get(0))?.filter_map(|r| r.ok()).collect()
        };

        let mut removed = 0usize;
        for content in duplicate_groups {
            let hashes: Vec<String> = {
                let conn = self.conn.open_reader()?;
                let mut stmt = conn.prepare("SELECT content_hash FROM memories WHERE content = ?1 ORDER BY created_at ASC")?;
                stmt.query_map([&content], |r| r.get(0))?.filter_map(|r| r.ok()).collect()
            };
            for hash in hashes.iter().skip(1) {
                if matches!(self.delete(hash).await?, DeleteOutcome::Deleted) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn get_all_tags(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.conn.open_reader()?;
        let mut stmt =
            conn.prepare("SELECT t.name, COUNT(*) FROM tags t JOIN memory_tags mt ON mt.tag_id = t.id GROUP BY t.name ORDER BY t.name ASC")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as usize)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    async fn get_recent(&self, n: usize) -> Result<Vec<Memory>> {
        let conn = self.conn.open_reader()?;
        let mut stmt = conn.prepare("SELECT * FROM memories WHERE lifecycle_state = 'active' ORDER BY created_at DESC LIMIT ?1")?;
        let rows: Vec<Memory> = stmt.query_map([n as i64], Self::row_to_memory)?.filter_map(|r| r.ok()).collect();
        drop(stmt);

        let mut memories = Vec::with_capacity(rows.len());
        for mut memory in rows {
            memory.tags = Self::load_tags(&conn, &memory.content_hash)?;
            memories.push(self.hydrate(memory).await?);
        }
        Ok(memories)
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        let conn = self.conn.open_reader()?;
        let total_memories: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
        let tag_count: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))?;
        let storage_bytes = self.conn.db_size_bytes().await.unwrap_or(0);
        Ok(StorageStats { total_memories: total_memories as u64, storage_bytes, backend: "cloud".to_string(), tag_count: tag_count as u64 })
    }

    async fn health(&self) -> Result<HealthStatus> {
        let conn = match self.conn.open_reader() {
            Ok(c) => c,
            Err(e) => return Ok(HealthStatus::Unhealthy { reason: e.to_string() }),
        };
        if conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)).is_err() {
            return Ok(HealthStatus::Degraded { reason: "metadata store unreachable".to_string() });
        }
        let missing: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories WHERE vector_missing = 1", [], |r| r.get(0))
            .unwrap_or(0);
        if missing > 0 {
            Ok(HealthStatus::Degraded { reason: format!("{missing} memories awaiting vector reconciliation") })
        } else {
            Ok(HealthStatus::Healthy { details: "metadata store reachable, vector index current".to_string() })
        }
    }
}

#[async_trait]
impl MaintenanceStore for CloudStore {
    async fn list_active_summaries(&self) -> Result<Vec<(String, f64, String)>> {
        let conn = self.conn.open_reader()?;
        let mut stmt = conn.prepare("SELECT content_hash, created_at, memory_type FROM memories WHERE lifecycle_state = 'active'")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    async fn set_relevance(&self, hash: &str, relevance: f64) -> Result<()> {
        let conn = self.conn.writer.lock().await;
        conn.execute("UPDATE memories SET relevance = ?1 WHERE content_hash = ?2", params![relevance, hash])?;
        Ok(())
    }

    /// The generic vector-index HTTP contract (spec §4.F) has no bulk
    /// export endpoint, so embeddings for consolidation sampling are
    /// recomputed from hydrated content rather than fetched from the
    /// remote index — documented as a known cost trade-off in DESIGN.md.
    async fn list_embeddings(&self, since: Option<f64>, limit: usize) -> Result<Vec<(String, Vec<f32>)>> {
        let rows: Vec<(String, String)> = {
            let conn = self.conn.open_reader()?;
            let sql = match since {
                Some(_) => "SELECT content_hash, content FROM memories WHERE updated_at >= ?1 AND lifecycle_state = 'active' ORDER BY updated_at DESC LIMIT ?2",
                None => "SELECT content_hash, content FROM memories WHERE lifecycle_state = 'active' ORDER BY updated_at DESC LIMIT ?2",
            };
            let mut stmt = conn.prepare(sql)?;
            match since {
                Some(s) => stmt.query_map(params![s, limit as i64], |r| Ok((r.get(0)?, r.get(1)?)))?.filter_map(|r| r.ok()).collect(),
                None => stmt.query_map(params![limit as i64], |r| Ok((r.get(0)?, r.get(1)?)))?.filter_map(|r| r.ok()).collect(),
            }
        };

        let mut out = Vec::with_capacity(rows.len());
        for (hash, content) in rows {
            let text = if let Some(object_hash) = content.strip_prefix(OBJECT_KEY_PREFIX) {
                match self.object_store.get(&object_key_for(object_hash)).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(_) => continue,
                }
            } else {
                content
            };
            if let Ok(embedding) = self.embedder.embed(&text).await {
                out.push((hash, embedding));
            }
        }
        Ok(out)
    }

    async fn archive(&self, hash: &str) -> Result<()> {
        let _guard = self.locks.lock(hash).await;
        let conn = self.conn.writer.lock().await;
        let now = now_seconds();
        conn.execute(
            "UPDATE memories SET lifecycle_state = 'archived', updated_at = ?1, updated_at_iso = ?2 WHERE content_hash = ?3",
            params![now, iso_from_seconds(now), hash],
        )?;
        Ok(())
    }

    async fn hard_delete_archived_before(&self, cutoff: f64) -> Result<usize> {
        let hashes: Vec<String> = {
            let conn = self.conn.open_reader()?;
            let mut stmt = conn.prepare("SELECT content_hash FROM memories WHERE lifecycle_state = 'archived' AND updated_at < ?1")?;
            stmt.query_map([cutoff], |r| r.get(0))?.filter_map(|r| r.ok()).collect()
        };
        for hash in &hashes {
            let conn = self.conn.writer.lock().await;
            let content: Option<String> = conn
                .query_row("SELECT content FROM memories WHERE content_hash = ?1", [hash], |r| r.get(0))
                .optional()?;
            conn.execute("DELETE FROM memories WHERE content_hash = ?1", [hash])?;
            drop(conn);
            let _ = self.vector_index.delete(hash).await;
            if let Some(content) = content {
                if content.starts_with(OBJECT_KEY_PREFIX) {
                    let _ = self.object_store.delete(&object_key_for(hash)).await;
                }
            }
        }
        Ok(hashes.len())
    }

    async fn create_cluster(&self, cluster: &Cluster) -> Result<i64> {
        let conn = self.conn.writer.lock().await;
        let centroid_json = serde_json::to_string(&cluster.centroid)?;
        conn.execute(
            "INSERT INTO clusters(theme, centroid_json, created_at) VALUES (?1, ?2, ?3)",
            params![cluster.theme, centroid_json, cluster.created_at],
        )?;
        let id = conn.last_insert_rowid();
        for hash in &cluster.member_hashes {
            conn.execute(
                "INSERT INTO cluster_members(cluster_id, content_hash) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
                params![id, hash],
            )?;
        }
        Ok(id)
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let conn = self.conn.open_reader()?;
        let mut stmt = conn.prepare("SELECT id, theme, centroid_json, created_at FROM clusters")?;
        let rows: Vec<(i64, String, String, f64)> =
            stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?.filter_map(|r| r.ok()).collect();
        drop(stmt);

        let mut clusters = Vec::with_capacity(rows.len());
        for (id, theme, centroid_json, created_at) in rows {
            let centroid: Vec<f32> = serde_json::from_str(&centroid_json).unwrap_or_default();
            let mut member_stmt = conn.prepare("SELECT content_hash FROM cluster_members WHERE cluster_id = ?1")?;
            let member_hashes = member_stmt.query_map([id], |r| r.get(0))?.filter_map(|r| r.ok()).collect();
            clusters.push(Cluster { id, member_hashes, centroid, theme, created_at });
        }
        Ok(clusters)
    }

    async fn list_forgetting_candidates(&self, relevance_threshold: f64, access_cutoff: f64) -> Result<Vec<String>> {
        let conn = self.conn.open_reader()?;
        let mut stmt = conn.prepare(
            "SELECT content_hash FROM memories
             WHERE lifecycle_state = 'active' AND relevance < ?1
               AND (last_accessed_at IS NULL OR last_accessed_at < ?2) AND created_at < ?2",
        )?;
        let rows = stmt.query_map(params![relevance_threshold, access_cutoff], |r| r.get(0))?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    async fn tags_for_hashes(&self, hashes: &[String]) -> Result<HashMap<String, Vec<String>>> {
        let conn = self.conn.open_reader()?;
        let mut out = HashMap::with_capacity(hashes.len());
        for hash in hashes {
            let tags = Self::load_tags(&conn, hash)?;
            out.insert(hash.clone(), tags.into_iter().collect());
        }
        Ok(out)
    }

    async fn list_fallback_embedded_hashes(&self) -> Result<std::collections::HashSet<String>> {
        let conn = self.conn.open_reader()?;
        let pattern = crate::model::fallback_metadata_like_pattern();
        let mut stmt = conn.prepare("SELECT content_hash FROM memories WHERE metadata_json LIKE ?1")?;
        let rows = stmt
            .query_map([&pattern], |r| r.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

impl CloudStore {
    /// Re-embeds and re-upserts every row still marked `vector_missing`,
    /// clearing the flag on success. The `Reconciler`'s sweep body.
    pub async fn reconcile_missing_vectors(&self) -> Result<usize> {
        let rows: Vec<(String, String)> = {
            let conn = self.conn.open_reader()?;
            let mut stmt = conn.prepare("SELECT content_hash, content FROM memories WHERE vector_missing = 1")?;
            stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?.filter_map(|r| r.ok()).collect()
        };

        let mut reconciled = 0usize;
        for (hash, content) in rows {
            let text = if let Some(object_hash) = content.strip_prefix(OBJECT_KEY_PREFIX) {
                match self.object_store.get(&object_key_for(object_hash)).await {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(_) => continue,
                }
            } else {
                content
            };

            let embedding = match self.embedder.embed(&text).await {
                Ok(e) => e,
                Err(_) => continue,
            };
            if self.vector_index.upsert(&hash, &embedding).await.is_ok() {
                let conn = self.conn.writer.lock().await;
                conn.execute("UPDATE memories SET vector_missing = 0 WHERE content_hash = ?1", [&hash])?;
                reconciled += 1;
            }
            tokio::task::yield_now().await;
        }
        Ok(reconciled)
    }
}

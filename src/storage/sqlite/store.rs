//! `SqliteStore`: the embedded backend's `MemoryStore` implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::concurrency::KeyedLocks;
use crate::embedding::Embedder;
use crate::error::{MemoryError, Result};
use crate::model::{iso_from_seconds, LifecycleState, Memory, MetadataValue};
use crate::query::planner::{score_candidates, ScoreWeights};

use super::connection::SqliteConnectionManager;
use super::migrations::run_migrations;

use crate::consolidation::types::Cluster;
use crate::storage::{
    DeleteOutcome, HealthStatus, MaintenanceStore, MemoryStore, ProgressSink, StorageStats,
    StoreOutcome, TagMatch, UpdateOutcome,
};

pub struct SqliteStore {
    conn: Arc<SqliteConnectionManager>,
    embedder: Arc<dyn Embedder>,
    locks: KeyedLocks,
    overfetch_factor: usize,
    weights: ScoreWeights,
}

impl SqliteStore {
    pub fn new(
        db_path: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
        busy_timeout_ms: u64,
        cache_pages: i64,
        overfetch_factor: usize,
    ) -> Result<Self> {
        let conn = SqliteConnectionManager::open(db_path, busy_timeout_ms, cache_pages)?;
        Ok(Self {
            conn: Arc::new(conn),
            embedder,
            locks: KeyedLocks::new(),
            overfetch_factor: overfetch_factor.max(1),
            weights: ScoreWeights::default(),
        })
    }

    fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
        let metadata_json: String = row.get("metadata_json")?;
        let metadata: HashMap<String, MetadataValue> =
            serde_json::from_str(&metadata_json).unwrap_or_default();
        let lifecycle_str: String = row.get("lifecycle_state")?;

        Ok(Memory {
            content_hash: row.get("content_hash")?,
            content: row.get("content")?,
            memory_type: row.get("memory_type")?,
            tags: Default::default(), // populated by caller via a join
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
            "SELECT t.name FROM tags t
             JOIN memory_tags mt ON mt.tag_id = t.id
             WHERE mt.content_hash = ?1",
        )?;
        let names = stmt
            .query_map([hash], |r| r.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }

    fn write_tags(conn: &Connection, hash: &str, tags: &std::collections::BTreeSet<String>) -> Result<()> {
        conn.execute("DELETE FROM memory_tags WHERE content_hash = ?1", [hash])?;
        for tag in tags {
            conn.execute("INSERT INTO tags(name) VALUES (?1) ON CONFLICT(name) DO NOTHING", [tag])?;
            conn.execute(
                "INSERT INTO memory_tags(content_hash, tag_id)
                 SELECT ?1, id FROM tags WHERE name = ?2",
                params![hash, tag],
            )?;
        }
        Ok(())
    }

    fn write_vector(conn: &Connection, hash: &str, embedding: &[f32]) -> Result<()> {
        let rowid: Option<i64> = conn
            .query_row("SELECT rowid FROM vectors_map WHERE content_hash = ?1", [hash], |r| r.get(0))
            .optional()?;
        let bytes = bytemuck_cast(embedding);
        match rowid {
            Some(id) => {
                conn.execute("UPDATE vectors SET embedding = ?1 WHERE rowid = ?2", params![bytes, id])?;
            }
            None => {
                conn.execute("INSERT INTO vectors(embedding) VALUES (?1)", params![bytes])?;
                let new_id = conn.last_insert_rowid();
                conn.execute(
                    "INSERT INTO vectors_map(content_hash, rowid) VALUES (?1, ?2)",
                    params![hash, new_id],
                )?;
            }
        }
        Ok(())
    }
}

fn bytemuck_cast(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
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
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn initialize(&self) -> Result<()> {
        let conn = self.conn.writer.lock().await;
        super::migrations::migrate_legacy_timestamps(&conn)?;
        super::migrations::migrate_legacy_tags(&conn)?;
        run_migrations(&conn, self.embedder.dimension())?;
        Ok(())
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

        let conn = self.conn.writer.lock().await;
        let tx = conn.unchecked_transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT content_hash FROM memories WHERE content_hash = ?1",
                [&memory.content_hash],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(StoreOutcome::Duplicate { existing_hash: memory.content_hash });
        }

        let metadata_json = serde_json::to_string(&memory.metadata)?;
        tx.execute(
            "INSERT INTO memories (
                content_hash, content, memory_type, metadata_json,
                created_at, created_at_iso, updated_at, updated_at_iso,
                relevance, lifecycle_state, access_count, last_accessed_at
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                memory.content_hash,
                memory.content,
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
            ],
        )?;
        Self::write_tags(&tx, &memory.content_hash, &memory.tags)?;
        Self::write_vector(&tx, &memory.content_hash, &memory.embedding)?;
        tx.commit()?;

        Ok(StoreOutcome::Stored(memory))
    }

    async fn retrieve(&self, query: &str, n: usize) -> Result<Vec<(Memory, f32)>> {
        let query_vector = self.embedder.embed(query).await?;
        let k = (n * self.overfetch_factor).max(n);
        let bytes = bytemuck_cast(&query_vector);

        let conn = self.conn.open_reader()?;
        let mut stmt = conn.prepare(
            "SELECT vm.content_hash, v.distance
             FROM (SELECT rowid, distance FROM vectors WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2) v
             JOIN vectors_map vm ON vm.rowid = v.rowid",
        )?;
        let neighbors: Vec<(String, f64)> = stmt
            .query_map(params![bytes, k as i64], |r| Ok((r.get(0)?, r.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut candidates = Vec::with_capacity(neighbors.len());
        for (hash, distance) in neighbors {
            if let Some(memory) = self.load_by_hash(&conn, &hash)? {
                if memory.lifecycle_state != LifecycleState::Active {
                    continue;
                }
                let similarity = 1.0 - (distance as f32 / 2.0).min(1.0);
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
        let mut memories: Vec<Memory> = stmt
            .query_map(params_vec.as_slice(), Self::row_to_memory)?
            .filter_map(|r| r.ok())
            .collect();
        for memory in &mut memories {
            memory.tags = Self::load_tags(&conn, &memory.content_hash)?;
        }
        Ok(memories)
    }

    async fn recall(
        &self,
        query: Option<&str>,
        window: Option<(f64, f64)>,
        n: usize,
    ) -> Result<Vec<Memory>> {
        match (query, window) {
            (None, None) => self.get_recent(n).await,
            (Some(q), None) => Ok(self.retrieve(q, n).await?.into_iter().map(|(m, _)| m).collect()),
            (q_opt, Some((start, end))) => {
                let conn = self.conn.open_reader()?;
                let mut stmt = conn.prepare(
                    "SELECT * FROM memories WHERE created_at BETWEEN ?1 AND ?2
                     AND lifecycle_state = 'active' ORDER BY created_at DESC",
                )?;
                let mut memories: Vec<Memory> = stmt
                    .query_map(params![start, end], Self::row_to_memory)?
                    .filter_map(|r| r.ok())
                    .collect();
                for memory in &mut memories {
                    memory.tags = Self::load_tags(&conn, &memory.content_hash)?;
                }
                drop(stmt);
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
        let rowid: Option<i64> = conn
            .query_row("SELECT rowid FROM vectors_map WHERE content_hash = ?1", [hash], |r| r.get(0))
            .optional()?;
        let deleted = conn.execute("DELETE FROM memories WHERE content_hash = ?1", [hash])?;
        if let Some(id) = rowid {
            conn.execute("DELETE FROM vectors WHERE rowid = ?1", [id])?;
        }
        Ok(if deleted > 0 { DeleteOutcome::Deleted } else { DeleteOutcome::NotFound })
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<usize> {
        let conn = self.conn.writer.lock().await;
        let hashes: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT m.content_hash FROM memories m
                 JOIN memory_tags mt ON mt.content_hash = m.content_hash
                 JOIN tags t ON t.id = mt.tag_id WHERE t.name = ?1",
            )?;
            stmt.query_map([tag], |r| r.get(0))?.filter_map(|r| r.ok()).collect()
        };
        for hash in &hashes {
            let rowid: Option<i64> = conn
                .query_row("SELECT rowid FROM vectors_map WHERE content_hash = ?1", [hash], |r| r.get(0))
                .optional()?;
            if let Some(id) = rowid {
                conn.execute("DELETE FROM vectors WHERE rowid = ?1", [id])?;
            }
        }
        conn.execute(
            "DELETE FROM memories WHERE content_hash IN (
                SELECT m.content_hash FROM memories m
                JOIN memory_tags mt ON mt.content_hash = m.content_hash
                JOIN tags t ON t.id = mt.tag_id WHERE t.name = ?1
            )",
            [tag],
        )?;
        Ok(hashes.len())
    }

    /// Resolves the full hash set across all of `tags` first, then deletes
    /// one memory at a time so progress can be reported at decile
    /// boundaries of the whole set (spec §4.D: "emit progress updates at
    /// roughly decile boundaries"), rather than once per tag.
    async fn delete_by_tags(&self, tags: &[String], progress: Option<&(dyn ProgressSink)>) -> Result<usize> {
        if tags.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.writer.lock().await;
        let placeholders: Vec<String> = tags.iter().map(|_| "?".to_string()).collect();
        let params_vec: Vec<&dyn rusqlite::ToSql> = tags.iter().map(|t| t as &dyn rusqlite::ToSql).collect();
        let hashes: Vec<String> = {
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
        let mut last_decile = 0usize;
        for (i, hash) in hashes.iter().enumerate() {
            let rowid: Option<i64> = conn
                .query_row("SELECT rowid FROM vectors_map WHERE content_hash = ?1", [hash], |r| r.get(0))
                .optional()?;
            conn.execute("DELETE FROM memories WHERE content_hash = ?1", [hash])?;
            if let Some(id) = rowid {
                conn.execute("DELETE FROM vectors WHERE rowid = ?1", [id])?;
            }
            if let Some(sink) = progress {
                let decile = ((i + 1) * 10 / total.max(1)).min(10);
                if decile > last_decile {
                    last_decile = decile;
                    sink.report(decile as f64 / 10.0, &format!("deleted {}/{total}", i + 1));
                }
            }
        }
        Ok(total)
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
        let mut metadata: HashMap<String, MetadataValue> =
            serde_json::from_str(&existing_json).unwrap_or_default();
        metadata.extend(updates);
        let metadata_json = serde_json::to_string(&metadata)?;

        if preserve_timestamps {
            conn.execute(
                "UPDATE memories SET metadata_json = ?1 WHERE content_hash = ?2",
                params![metadata_json, hash],
            )?;
        } else {
            let now = now_seconds();
            conn.execute(
                "UPDATE memories SET metadata_json = ?1, updated_at = ?2, updated_at_iso = ?3 WHERE content_hash = ?4",
                params![metadata_json, now, iso_from_seconds(now), hash],
            )?;
        }

        let memory = self
            .load_by_hash(&conn, hash)?
            .ok_or_else(|| MemoryError::NotFound { hash: hash.to_string() })?;
        Ok(UpdateOutcome::Updated(memory))
    }

    async fn cleanup_duplicates(&self) -> Result<usize> {
        let conn = self.conn.writer.lock().await;
        let duplicate_groups: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT content FROM memories GROUP BY content HAVING COUNT(*) > 1",
            )?;
            stmt.query_map([], |r| r.get(0))?.filter_map(|r| r.ok()).collect()
        };

        let mut removed = 0usize;
        for content in duplicate_groups {
            let hashes: Vec<String> = {
                let mut stmt = conn.prepare(
                    "SELECT content_hash FROM memories WHERE content = ?1 ORDER BY created_at ASC",
                )?;
                stmt.query_map([&content], |r| r.get(0))?.filter_map(|r| r.ok()).collect()
            };
            for hash in hashes.iter().skip(1) {
                let rowid: Option<i64> = conn
                    .query_row("SELECT rowid FROM vectors_map WHERE content_hash = ?1", [hash], |r| r.get(0))
                    .optional()?;
                conn.execute("DELETE FROM memories WHERE content_hash = ?1", [hash])?;
                if let Some(id) = rowid {
                    conn.execute("DELETE FROM vectors WHERE rowid = ?1", [id])?;
                }
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn get_all_tags(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.conn.open_reader()?;
        let mut stmt = conn.prepare(
            "SELECT t.name, COUNT(*) FROM tags t
             JOIN memory_tags mt ON mt.tag_id = t.id
             GROUP BY t.name ORDER BY t.name ASC",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as usize)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    async fn get_recent(&self, n: usize) -> Result<Vec<Memory>> {
        let conn = self.conn.open_reader()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM memories WHERE lifecycle_state = 'active' ORDER BY created_at DESC LIMIT ?1",
        )?;
        let mut memories: Vec<Memory> = stmt
            .query_map([n as i64], Self::row_to_memory)?
            .filter_map(|r| r.ok())
            .collect();
        for memory in &mut memories {
            memory.tags = Self::load_tags(&conn, &memory.content_hash)?;
        }
        Ok(memories)
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        let conn = self.conn.open_reader()?;
        let total_memories: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))?;
        let tag_count: i64 = conn.query_row("SELECT COUNT(*) FROM tags", [], |r| r.get(0))?;
        let storage_bytes = self.conn.db_size_bytes().await.unwrap_or(0);
        Ok(StorageStats {
            total_memories: total_memories as u64,
            storage_bytes,
            backend: "sqlite".to_string(),
            tag_count: tag_count as u64,
        })
    }

    async fn health(&self) -> Result<HealthStatus> {
        let conn = match self.conn.open_reader() {
            Ok(c) => c,
            Err(e) => return Ok(HealthStatus::Unhealthy { reason: e.to_string() }),
        };
        match conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)) {
            Ok(_) => Ok(HealthStatus::Healthy { details: "sqlite reachable".to_string() }),
            Err(e) => Ok(HealthStatus::Degraded { reason: e.to_string() }),
        }
    }
}

impl SqliteStore {
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
}

#[async_trait]
impl MaintenanceStore for SqliteStore {
    async fn list_active_summaries(&self) -> Result<Vec<(String, f64, String)>> {
        let conn = self.conn.open_reader()?;
        let mut stmt = conn.prepare(
            "SELECT content_hash, created_at, memory_type FROM memories WHERE lifecycle_state = 'active'",
        )?;
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    async fn set_relevance(&self, hash: &str, relevance: f64) -> Result<()> {
        let conn = self.conn.writer.lock().await;
        conn.execute(
            "UPDATE memories SET relevance = ?1 WHERE content_hash = ?2",
            params![relevance, hash],
        )?;
        Ok(())
    }

    async fn list_embeddings(&self, since: Option<f64>, limit: usize) -> Result<Vec<(String, Vec<f32>)>> {
        let conn = self.conn.open_reader()?;
        let sql = match since {
            Some(_) => {
                "SELECT vm.content_hash, v.embedding FROM vectors_map vm
                 JOIN vectors v ON v.rowid = vm.rowid
                 JOIN memories m ON m.content_hash = vm.content_hash
                 WHERE m.updated_at >= ?1 AND m.lifecycle_state = 'active'
                 ORDER BY m.updated_at DESC LIMIT ?2"
            }
            None => {
                "SELECT vm.content_hash, v.embedding FROM vectors_map vm
                 JOIN vectors v ON v.rowid = vm.rowid
                 JOIN memories m ON m.content_hash = vm.content_hash
                 WHERE m.lifecycle_state = 'active'
                 ORDER BY m.updated_at DESC LIMIT ?2"
            }
        };
        let mut stmt = conn.prepare(sql)?;
        let rows: Vec<(String, Vec<u8>)> = match since {
            Some(s) => stmt
                .query_map(params![s, limit as i64], |r| Ok((r.get(0)?, r.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect(),
            None => stmt
                .query_map(params![limit as i64], |r| Ok((r.get(0)?, r.get(1)?)))?
                .filter_map(|r| r.ok())
                .collect(),
        };
        Ok(rows.into_iter().map(|(hash, bytes)| (hash, bytes_to_vec_f32(&bytes))).collect())
    }

    async fn archive(&self, hash: &str) -> Result<()> {
        let _guard = self.locks.lock(hash).await;
        let conn = self.conn.writer.lock().await;
        let now = now_seconds();
        conn.execute(
            "UPDATE memories SET lifecycle_state = 'archived', updated_at = ?1, updated_at_iso = ?2
             WHERE content_hash = ?3",
            params![now, iso_from_seconds(now), hash],
        )?;
        Ok(())
    }

    async fn hard_delete_archived_before(&self, cutoff: f64) -> Result<usize> {
        let conn = self.conn.writer.lock().await;
        let hashes: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT content_hash FROM memories WHERE lifecycle_state = 'archived' AND updated_at < ?1",
            )?;
            stmt.query_map([cutoff], |r| r.get(0))?.filter_map(|r| r.ok()).collect()
        };
        for hash in &hashes {
            let rowid: Option<i64> = conn
                .query_row("SELECT rowid FROM vectors_map WHERE content_hash = ?1", [hash], |r| r.get(0))
                .optional()?;
            conn.execute("DELETE FROM memories WHERE content_hash = ?1", [hash])?;
            if let Some(id) = rowid {
                conn.execute("DELETE FROM vectors WHERE rowid = ?1", [id])?;
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
                "INSERT INTO cluster_members(cluster_id, content_hash) VALUES (?1, ?2)
                 ON CONFLICT DO NOTHING",
                params![id, hash],
            )?;
        }
        Ok(id)
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let conn = self.conn.open_reader()?;
        let mut stmt = conn.prepare("SELECT id, theme, centroid_json, created_at FROM clusters")?;
        let rows: Vec<(i64, String, String, f64)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);

        let mut clusters = Vec::with_capacity(rows.len());
        for (id, theme, centroid_json, created_at) in rows {
            let centroid: Vec<f32> = serde_json::from_str(&centroid_json).unwrap_or_default();
            let mut member_stmt =
                conn.prepare("SELECT content_hash FROM cluster_members WHERE cluster_id = ?1")?;
            let member_hashes = member_stmt
                .query_map([id], |r| r.get(0))?
                .filter_map(|r| r.ok())
                .collect();
            clusters.push(Cluster { id, member_hashes, centroid, theme, created_at });
        }
        Ok(clusters)
    }

    async fn list_forgetting_candidates(&self, relevance_threshold: f64, access_cutoff: f64) -> Result<Vec<String>> {
        let conn = self.conn.open_reader()?;
        let mut stmt = conn.prepare(
            "SELECT content_hash FROM memories
             WHERE lifecycle_state = 'active'
               AND relevance < ?1
               AND (last_accessed_at IS NULL OR last_accessed_at < ?2)
               AND created_at < ?2",
        )?;
        let rows = stmt
            .query_map(params![relevance_threshold, access_cutoff], |r| r.get(0))?
            .filter_map(|r| r.ok())
            .collect();
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

fn bytes_to_vec_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;

    async fn new_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(32));
        let store = SqliteStore::new(path, embedder, 5000, 2000, 4).unwrap();
        store.initialize().await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let (store, _dir) = new_store().await;
        let memory = Memory::new(
            "remember the quarterly review",
            "standard",
            ["work".to_string()],
            Default::default(),
            now_seconds(),
        )
        .unwrap();
        let outcome = store.store(memory).await.unwrap();
        assert!(matches!(outcome, StoreOutcome::Stored(_)));

        let results = store.retrieve("quarterly review", 5).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_content_is_rejected() {
        let (store, _dir) = new_store().await;
        let memory = Memory::new("same content", "standard", [], Default::default(), now_seconds()).unwrap();
        store.store(memory.clone()).await.unwrap();
        let outcome = store.store(memory).await.unwrap();
        assert!(matches!(outcome, StoreOutcome::Duplicate { .. }));
    }

    #[tokio::test]
    async fn delete_missing_hash_returns_not_found() {
        let (store, _dir) = new_store().await;
        let outcome = store.delete("nonexistent").await.unwrap();
        assert_eq!(outcome, DeleteOutcome::NotFound);
    }

    #[tokio::test]
    async fn search_by_tag_all_requires_every_tag() {
        let (store, _dir) = new_store().await;
        let now = now_seconds();
        store
            .store(Memory::new("a", "standard", ["x".to_string(), "y".to_string()], Default::default(), now).unwrap())
            .await
            .unwrap();
        store
            .store(Memory::new("b", "standard", ["x".to_string()], Default::default(), now).unwrap())
            .await
            .unwrap();

        let all_match = store.search_by_tag(&["x".to_string(), "y".to_string()], TagMatch::All).await.unwrap();
        assert_eq!(all_match.len(), 1);

        let any_match = store.search_by_tag(&["x".to_string(), "y".to_string()], TagMatch::Any).await.unwrap();
        assert_eq!(any_match.len(), 2);
    }

    #[tokio::test]
    async fn recall_with_no_args_equals_get_recent() {
        let (store, _dir) = new_store().await;
        let now = now_seconds();
        store.store(Memory::new("one", "standard", [], Default::default(), now).unwrap()).await.unwrap();
        let recalled = store.recall(None, None, 10).await.unwrap();
        let recent = store.get_recent(10).await.unwrap();
        assert_eq!(recalled.len(), recent.len());
    }

    #[tokio::test]
    async fn archive_then_forgetting_candidate_then_hard_delete() {
        let (store, _dir) = new_store().await;
        let now = now_seconds();
        let memory = Memory::new("stale note", "temporary", [], Default::default(), now).unwrap();
        let hash = memory.content_hash.clone();
        store.store(memory).await.unwrap();
        store.set_relevance(&hash, 0.01).await.unwrap();

        let candidates = store.list_forgetting_candidates(0.1, now + 1.0).await.unwrap();
        assert!(candidates.contains(&hash));

        store.archive(&hash).await.unwrap();
        assert_eq!(store.get_recent(10).await.unwrap().len(), 0);

        let removed = store.hard_delete_archived_before(now + 86_400.0).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn cluster_round_trips() {
        let (store, _dir) = new_store().await;
        let now = now_seconds();
        let memory = Memory::new("a", "standard", [], Default::default(), now).unwrap();
        let hash = memory.content_hash.clone();
        store.store(memory).await.unwrap();

        let cluster = Cluster {
            id: 0,
            member_hashes: vec![hash],
            centroid: vec![0.1, 0.2, 0.3],
            theme: "work".to_string(),
            created_at: now,
        };
        store.create_cluster(&cluster).await.unwrap();
        let clusters = store.list_clusters().await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].theme, "work");
        assert_eq!(clusters[0].member_hashes.len(), 1);
    }
}

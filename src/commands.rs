//! Stable-named facade over [`MemoryStore`]/[`MaintenanceStore`]. An
//! external protocol layer (MCP, HTTP, ...) binds against these function
//! names rather than the trait methods directly, so the trait can be
//! reshaped without breaking that binding.

use std::collections::HashMap;
use std::sync::Arc;

use crate::consolidation::{ConsolidationReport, Scheduler};
use crate::error::Result;
use crate::model::{Memory, MetadataValue};
use crate::storage::sqlite::{BackupManifest, SqliteConnectionManager};
use crate::storage::{
    DeleteOutcome, HealthStatus, MemoryStore, ProgressSink, StorageStats, StoreOutcome, TagMatch,
    UpdateOutcome,
};

pub async fn store_memory(store: &dyn MemoryStore, memory: Memory) -> Result<StoreOutcome> {
    store.store(memory).await
}

pub async fn retrieve_memory(store: &dyn MemoryStore, query: &str, n: usize) -> Result<Vec<(Memory, f32)>> {
    store.retrieve(query, n).await
}

pub async fn search_by_tag(store: &dyn MemoryStore, tags: &[String], mode: TagMatch) -> Result<Vec<Memory>> {
    store.search_by_tag(tags, mode).await
}

pub async fn recall(
    store: &dyn MemoryStore,
    query: Option<&str>,
    window: Option<(f64, f64)>,
    n: usize,
) -> Result<Vec<Memory>> {
    store.recall(query, window, n).await
}

pub async fn delete_memory(store: &dyn MemoryStore, hash: &str) -> Result<DeleteOutcome> {
    store.delete(hash).await
}

pub async fn delete_by_tag(store: &dyn MemoryStore, tag: &str) -> Result<usize> {
    store.delete_by_tag(tag).await
}

pub async fn delete_by_tags(
    store: &dyn MemoryStore,
    tags: &[String],
    progress: Option<&dyn ProgressSink>,
) -> Result<usize> {
    store.delete_by_tags(tags, progress).await
}

pub async fn update_metadata(
    store: &dyn MemoryStore,
    hash: &str,
    updates: HashMap<String, MetadataValue>,
    preserve_timestamps: bool,
) -> Result<UpdateOutcome> {
    store.update_metadata(hash, updates, preserve_timestamps).await
}

pub async fn cleanup_duplicates(store: &dyn MemoryStore) -> Result<usize> {
    store.cleanup_duplicates().await
}

pub async fn get_all_tags(store: &dyn MemoryStore) -> Result<Vec<(String, usize)>> {
    store.get_all_tags().await
}

pub async fn get_recent(store: &dyn MemoryStore, n: usize) -> Result<Vec<Memory>> {
    store.get_recent(n).await
}

pub async fn get_stats(store: &dyn MemoryStore) -> Result<StorageStats> {
    store.get_stats().await
}

pub async fn health_check(store: &dyn MemoryStore) -> Result<HealthStatus> {
    store.health().await
}

/// Runs every enabled consolidation stage once, right now, outside the
/// scheduler's own cron-like cadence.
pub async fn run_consolidation(scheduler: &Scheduler, now: f64) -> ConsolidationReport {
    scheduler.run_consolidation(now).await
}

/// Starts the scheduler's background polling loop. Returns the handle so
/// the caller can abort it at shutdown.
pub fn schedule_consolidation(scheduler: Arc<Scheduler>) -> tokio::task::JoinHandle<()> {
    scheduler.spawn()
}

/// Only meaningful against the embedded backend: backups copy the sqlite
/// file directly and have no equivalent against a managed cloud store.
pub async fn create_backup(
    conn: &SqliteConnectionManager,
    backups_root: impl AsRef<std::path::Path>,
    backup_id: &str,
) -> Result<BackupManifest> {
    crate::storage::sqlite::create_backup(conn, backups_root, backup_id).await
}

pub async fn list_backups(backups_root: impl AsRef<std::path::Path>) -> Result<Vec<BackupManifest>> {
    crate::storage::sqlite::list_backups(backups_root).await
}

pub async fn restore_backup(
    backups_root: impl AsRef<std::path::Path>,
    backup_id: &str,
    restore_to: impl AsRef<std::path::Path>,
) -> Result<std::path::PathBuf> {
    crate::storage::sqlite::restore_backup(backups_root, backup_id, restore_to).await
}

/// Only meaningful against the embedded backend: `VACUUM` plus a WAL
/// checkpoint, reclaiming space left by deleted rows and fragmentation.
pub async fn optimize_db(conn: &SqliteConnectionManager) -> Result<()> {
    conn.vacuum().await
}

/// `export_metadata` block of the JSON export format (spec §6), plus the
/// flat array of exported memories.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExportMetadata {
    pub source_machine: String,
    pub export_timestamp: String,
    pub total_memories: usize,
    pub database_path: String,
    pub platform: String,
    pub exporter_version: String,
}

/// One memory as it appears in the export. Lossless for every user-visible
/// field; the embedding is never included and is recomputed on import.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExportedMemory {
    pub content: String,
    pub content_hash: String,
    pub tags: Vec<String>,
    pub created_at: f64,
    pub updated_at: f64,
    pub memory_type: String,
    pub metadata: HashMap<String, MetadataValue>,
    pub export_source: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExportBundle {
    pub export_metadata: ExportMetadata,
    pub memories: Vec<ExportedMemory>,
}

/// Dumps every active memory into the JSON export format (spec §6). `n`
/// bounds how many of the most recent memories are pulled; pass
/// `usize::MAX` to export the whole store.
pub async fn export_memories(
    store: &dyn MemoryStore,
    n: usize,
    source_machine: &str,
    database_path: &str,
    now: f64,
) -> Result<ExportBundle> {
    let memories = store.get_recent(n).await?;
    let memories: Vec<ExportedMemory> = memories
        .into_iter()
        .map(|m| ExportedMemory {
            content: m.content,
            content_hash: m.content_hash,
            tags: m.tags.into_iter().collect(),
            created_at: m.created_at,
            updated_at: m.updated_at,
            memory_type: m.memory_type,
            metadata: m.metadata,
            export_source: source_machine.to_string(),
        })
        .collect();

    Ok(ExportBundle {
        export_metadata: ExportMetadata {
            source_machine: source_machine.to_string(),
            export_timestamp: crate::model::iso_from_seconds(now),
            total_memories: memories.len(),
            database_path: database_path.to_string(),
            platform: std::env::consts::OS.to_string(),
            exporter_version: crate::VERSION.to_string(),
        },
        memories,
    })
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

fn metadata_to_json(metadata: &HashMap<String, MetadataValue>) -> serde_json::Map<String, serde_json::Value> {
    metadata
        .iter()
        .filter_map(|(k, v)| serde_json::to_value(v).ok().map(|v| (k.clone(), v)))
        .collect()
}

/// Re-creates each exported memory, preserving its original `content_hash`
/// (via re-hashing the unchanged content), `created_at`, and `updated_at`.
/// A memory whose hash already exists in `store` is counted as skipped
/// rather than failed (spec §6: export/import is idempotent on re-run).
pub async fn import_memories(store: &dyn MemoryStore, bundle: &ExportBundle) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    for item in &bundle.memories {
        let metadata = metadata_to_json(&item.metadata);
        let memory = match Memory::new(
            item.content.clone(),
            item.memory_type.clone(),
            item.tags.clone(),
            metadata,
            item.created_at,
        ) {
            Ok(mut memory) => {
                memory.updated_at = item.updated_at;
                memory.updated_at_iso = crate::model::iso_from_seconds(item.updated_at);
                memory
            }
            Err(e) => {
                report.failed += 1;
                report.errors.push(format!("{}: {e}", item.content_hash));
                continue;
            }
        };

        match store.store(memory).await {
            Ok(StoreOutcome::Stored(_)) => report.imported += 1,
            Ok(StoreOutcome::Duplicate { .. }) => report.skipped += 1,
            Err(e) => {
                report.failed += 1;
                report.errors.push(format!("{}: {e}", item.content_hash));
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::storage::sqlite::SqliteStore;

    async fn new_store() -> SqliteStore {
        let embedder = Arc::new(HashingEmbedder::new(16));
        let store = SqliteStore::new(":memory:", embedder, 5_000, 2_000, 4).unwrap();
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn facade_functions_delegate_to_the_store() {
        let store = new_store().await;
        let memory = Memory::new("facade test content", "note", [], Default::default(), 0.0).unwrap();
        let hash = memory.content_hash.clone();

        let outcome = store_memory(&store, memory).await.unwrap();
        assert!(matches!(outcome, StoreOutcome::Stored(_)));

        let recent = get_recent(&store, 10).await.unwrap();
        assert_eq!(recent.len(), 1);

        let stats = get_stats(&store).await.unwrap();
        assert_eq!(stats.total_memories, 1);

        let deleted = delete_memory(&store, &hash).await.unwrap();
        assert_eq!(deleted, DeleteOutcome::Deleted);
    }

    #[tokio::test]
    async fn export_then_import_round_trips_into_an_empty_store() {
        let source = new_store().await;
        for content in ["first memory", "second memory"] {
            let memory = Memory::new(content, "note", ["work".to_string()], Default::default(), 0.0).unwrap();
            store_memory(&source, memory).await.unwrap();
        }

        let bundle = export_memories(&source, usize::MAX, "laptop-a", "/tmp/sqlite_vec.db", 100.0)
            .await
            .unwrap();
        assert_eq!(bundle.export_metadata.total_memories, 2);
        assert_eq!(bundle.memories.len(), 2);

        let target = new_store().await;
        let report = import_memories(&target, &bundle).await.unwrap();
        assert_eq!(report.imported, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.failed, 0);

        let recent = get_recent(&target, 10).await.unwrap();
        assert_eq!(recent.len(), 2);

        let mut source_hashes: Vec<_> = bundle.memories.iter().map(|m| m.content_hash.clone()).collect();
        let mut target_hashes: Vec<_> = recent.iter().map(|m| m.content_hash.clone()).collect();
        source_hashes.sort();
        target_hashes.sort();
        assert_eq!(source_hashes, target_hashes);
    }

    #[tokio::test]
    async fn reimporting_the_same_bundle_skips_duplicates() {
        let store = new_store().await;
        let memory = Memory::new("dup check", "note", [], Default::default(), 0.0).unwrap();
        store_memory(&store, memory).await.unwrap();

        let bundle = export_memories(&store, usize::MAX, "laptop-a", "/tmp/sqlite_vec.db", 100.0)
            .await
            .unwrap();
        let report = import_memories(&store, &bundle).await.unwrap();
        assert_eq!(report.imported, 0);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn optimize_db_runs_without_error() {
        let embedder = Arc::new(HashingEmbedder::new(16));
        let conn = SqliteConnectionManager::open(":memory:", 5_000, 2_000).unwrap();
        let _ = embedder;
        optimize_db(&conn).await.unwrap();
    }
}

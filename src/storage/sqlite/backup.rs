//! Checkpoint-then-copy backups, matching the file layout the spec's
//! external-interface section documents: a timestamped directory holding
//! the database file plus a JSON manifest.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::connection::SqliteConnectionManager;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_name: String,
    pub timestamp: String,
    pub source_database: String,
    pub backup_path: String,
    pub backup_size: u64,
    pub files_count: u32,
    pub backend: String,
    pub created_at: String,
}

/// Checkpoint the WAL, then copy the main database file plus any
/// `-wal`/`-shm` companions into `backups/sqlite_backup_<id>/`, writing a
/// manifest alongside them.
pub async fn create_backup(
    conn: &SqliteConnectionManager,
    backups_root: impl AsRef<Path>,
    backup_id: &str,
) -> Result<BackupManifest> {
    conn.checkpoint().await?;

    let backup_name = format!("sqlite_backup_{backup_id}");
    let dir = backups_root.as_ref().join(&backup_name);
    tokio::fs::create_dir_all(&dir).await?;

    let mut files_count = 0u32;
    let mut backup_size = 0u64;
    for suffix in ["", "-wal", "-shm"] {
        let src = PathBuf::from(format!("{}{suffix}", conn.db_path.display()));
        if !tokio::fs::try_exists(&src).await.unwrap_or(false) {
            continue;
        }
        let dest_name = format!("memory.db{suffix}");
        let dest = dir.join(&dest_name);
        tokio::fs::copy(&src, &dest).await?;
        backup_size += tokio::fs::metadata(&dest).await?.len();
        files_count += 1;
    }

    let now = crate::model::iso_from_seconds(now_seconds());
    let manifest = BackupManifest {
        backup_name: backup_name.clone(),
        timestamp: now.clone(),
        source_database: conn.db_path.to_string_lossy().to_string(),
        backup_path: dir.to_string_lossy().to_string(),
        backup_size,
        files_count,
        backend: "sqlite".to_string(),
        created_at: now,
    };

    let manifest_json = serde_json::to_string_pretty(&manifest)?;
    tokio::fs::write(dir.join("backup_info.json"), manifest_json).await?;

    Ok(manifest)
}

pub async fn list_backups(backups_root: impl AsRef<Path>) -> Result<Vec<BackupManifest>> {
    let mut manifests = Vec::new();
    let mut entries = match tokio::fs::read_dir(backups_root).await {
        Ok(e) => e,
        Err(_) => return Ok(manifests),
    };
    while let Some(entry) = entries.next_entry().await? {
        let manifest_path = entry.path().join("backup_info.json");
        if let Ok(bytes) = tokio::fs::read(&manifest_path).await {
            if let Ok(manifest) = serde_json::from_slice::<BackupManifest>(&bytes) {
                manifests.push(manifest);
            }
        }
    }
    manifests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(manifests)
}

/// Restores the main database file and any `-wal`/`-shm` companions found
/// alongside it in the backup directory. `restore_to` names the main file;
/// companions land next to it with the matching suffix.
pub async fn restore_backup(
    backups_root: impl AsRef<Path>,
    backup_id: &str,
    restore_to: impl AsRef<Path>,
) -> Result<PathBuf> {
    let dir = backups_root.as_ref().join(format!("sqlite_backup_{backup_id}"));
    for suffix in ["", "-wal", "-shm"] {
        let src = dir.join(format!("memory.db{suffix}"));
        if !tokio::fs::try_exists(&src).await.unwrap_or(false) {
            continue;
        }
        let dest = PathBuf::from(format!("{}{suffix}", restore_to.as_ref().display()));
        tokio::fs::copy(&src, &dest).await?;
    }
    Ok(restore_to.as_ref().to_path_buf())
}

fn now_seconds() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn backup_then_list_round_trips() {
        let db_dir = tempfile::tempdir().unwrap();
        let db_path = db_dir.path().join("memory.db");
        let conn = SqliteConnectionManager::open(&db_path, 5000, 2000).unwrap();
        super::super::migrations::run_migrations(&conn.writer.try_lock().unwrap(), 8).unwrap();

        let backups_dir = tempfile::tempdir().unwrap();
        let manifest = create_backup(&conn, backups_dir.path(), "20260727").await.unwrap();
        assert_eq!(manifest.backup_name, "sqlite_backup_20260727");
        assert_eq!(manifest.files_count, 1);

        let listed = list_backups(backups_dir.path()).await.unwrap();
        assert_eq!(listed.len(), 1);
    }
}

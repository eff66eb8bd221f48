//! Connection setup: WAL journaling, busy timeout, and cache pragmas.
//!
//! A single writer connection is serialized behind an async mutex (the
//! spec's single-event-loop-per-process concurrency model); reader
//! connections are opened on demand since SQLite's WAL mode allows
//! concurrent readers alongside the one writer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::{Connection, OpenFlags};
use tokio::sync::Mutex;

use crate::error::{MemoryError, Result};

static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `:memory:` opened twice gives two *independent* databases in SQLite —
/// fatal for this manager, which always holds a writer connection plus
/// on-demand readers. Callers that pass the literal `:memory:` path get a
/// uniquely-named shared-cache URI instead, so every connection opened
/// against this manager sees the same in-memory database.
fn memory_uri_for(db_path: &Path) -> Option<String> {
    if db_path == Path::new(":memory:") {
        let id = MEMORY_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
        Some(format!("file:memsynth_mem_{id}?mode=memory&cache=shared"))
    } else {
        None
    }
}

fn open_connection(db_path: &Path, memory_uri: &Option<String>) -> Result<Connection> {
    let conn = match memory_uri {
        Some(uri) => Connection::open_with_flags(
            uri,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?,
        None => Connection::open(db_path)?,
    };
    Ok(conn)
}

pub struct SqliteConnectionManager {
    pub db_path: PathBuf,
    /// `Some` when `db_path` was the literal `:memory:`; holds the
    /// shared-cache URI every connection opens instead.
    memory_uri: Option<String>,
    pub writer: Mutex<Connection>,
    busy_timeout_ms: u64,
    cache_pages: i64,
    enable_wal: bool,
    extra_pragmas: Vec<(String, String)>,
}

impl SqliteConnectionManager {
    pub fn open(db_path: impl AsRef<Path>, busy_timeout_ms: u64, cache_pages: i64) -> Result<Self> {
        Self::open_with_options(db_path, busy_timeout_ms, cache_pages, true, &[])
    }

    /// Like [`Self::open`], but lets the caller disable WAL mode
    /// (`MEMORY_ENABLE_WAL=false`) and layer extra pragma overrides
    /// (`MEMORY_SQL_PRAGMAS`) on top of the fixed busy_timeout/cache_size
    /// ones.
    pub fn open_with_options(
        db_path: impl AsRef<Path>,
        busy_timeout_ms: u64,
        cache_pages: i64,
        enable_wal: bool,
        extra_pragmas: &[(String, String)],
    ) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let memory_uri = memory_uri_for(&db_path);
        let conn = open_connection(&db_path, &memory_uri)?;
        configure(&conn, busy_timeout_ms, cache_pages, enable_wal)?;
        apply_extra_pragmas(&conn, extra_pragmas)?;

        #[cfg(feature = "embedded")]
        unsafe {
            conn.load_extension_enable()?;
            sqlite_vec::sqlite3_vec_init();
            conn.load_extension_disable()?;
        }

        Ok(Self {
            db_path,
            memory_uri,
            writer: Mutex::new(conn),
            busy_timeout_ms,
            cache_pages,
            enable_wal,
            extra_pragmas: extra_pragmas.to_vec(),
        })
    }

    pub fn from_config(config: &crate::config::EngineConfig) -> Result<Self> {
        Self::open_with_options(
            &config.db_path,
            config.busy_timeout_ms,
            config.cache_pages,
            config.enable_wal,
            &crate::config::parse_sql_pragmas(&config.sql_pragmas),
        )
    }

    /// Open an additional read-only connection, independent of the writer
    /// lock. WAL mode lets this proceed concurrently with writes.
    pub fn open_reader(&self) -> Result<Connection> {
        let conn = open_connection(&self.db_path, &self.memory_uri)?;
        configure(&conn, self.busy_timeout_ms, self.cache_pages, self.enable_wal)?;
        apply_extra_pragmas(&conn, &self.extra_pragmas)?;
        Ok(conn)
    }

    pub async fn checkpoint(&self) -> Result<()> {
        let conn = self.writer.lock().await;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(MemoryError::Database)?;
        Ok(())
    }

    /// Reclaim space from deleted rows and fragmentation, then checkpoint
    /// the WAL. `optimize_db`'s full implementation (spec §6).
    pub async fn vacuum(&self) -> Result<()> {
        let conn = self.writer.lock().await;
        conn.execute_batch("VACUUM;").map_err(MemoryError::Database)?;
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .map_err(MemoryError::Database)?;
        Ok(())
    }

    pub async fn db_size_bytes(&self) -> Result<u64> {
        if self.memory_uri.is_some() {
            return Ok(0);
        }
        let metadata = tokio::fs::metadata(&self.db_path).await?;
        Ok(metadata.len())
    }
}

fn configure(conn: &Connection, busy_timeout_ms: u64, cache_pages: i64, enable_wal: bool) -> Result<()> {
    conn.pragma_update(None, "journal_mode", if enable_wal { "WAL" } else { "DELETE" })?;
    conn.pragma_update(None, "busy_timeout", busy_timeout_ms)?;
    conn.pragma_update(None, "cache_size", -cache_pages)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

/// Applies `MEMORY_SQL_PRAGMAS` overrides after the fixed pragmas above, so
/// an operator can tune e.g. `mmap_size` without a code change. Unknown
/// pragma names fail the same way an unknown `PRAGMA` statement always does.
fn apply_extra_pragmas(conn: &Connection, pragmas: &[(String, String)]) -> Result<()> {
    for (key, value) in pragmas {
        conn.pragma_update(None, key, value)?;
    }
    Ok(())
}

/// Configure a connection for single-file "cloud-safe" portability: plain
/// rollback journal instead of WAL, so the database can be copied to
/// object storage without companion `-wal`/`-shm` files.
pub fn configure_cloud_safe(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "DELETE")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_path_reader_sees_writer_writes() {
        let manager = SqliteConnectionManager::open(":memory:", 5_000, 2_000).unwrap();
        {
            let writer = manager.writer.blocking_lock();
            writer.execute_batch("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1);").unwrap();
        }
        let reader = manager.open_reader().unwrap();
        let count: i64 = reader.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn distinct_memory_managers_do_not_share_state() {
        let a = SqliteConnectionManager::open(":memory:", 5_000, 2_000).unwrap();
        let b = SqliteConnectionManager::open(":memory:", 5_000, 2_000).unwrap();
        {
            let writer = a.writer.blocking_lock();
            writer.execute_batch("CREATE TABLE t (x INTEGER);").unwrap();
        }
        let reader = b.open_reader().unwrap();
        let result = reader.query_row("SELECT COUNT(*) FROM t", [], |r| r.get::<_, i64>(0));
        assert!(result.is_err());
    }
}

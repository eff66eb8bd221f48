//! Additive, idempotent schema migrations, gated on a version stamp in
//! `schema_meta`. Each `migrate_vN` only ever adds columns/tables — it
//! never rewrites existing ones, so a partially-applied migration can be
//! safely re-run.

use rusqlite::Connection;

use crate::error::{MemoryError, Result};

use super::schema::*;

pub const SCHEMA_VERSION: u32 = 1;

pub fn run_migrations(conn: &Connection, vector_dimension: u32) -> Result<()> {
    conn.execute_batch(CREATE_SCHEMA_META)?;

    let current: u32 = conn
        .query_row("SELECT value FROM schema_meta WHERE key = 'version'", [], |r| r.get::<_, String>(0))
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if current > SCHEMA_VERSION {
        return Err(MemoryError::SchemaIncompatible { found: current, expected: SCHEMA_VERSION });
    }

    if current < 1 {
        migrate_v1(conn, vector_dimension)?;
        conn.execute(
            "INSERT INTO schema_meta(key, value) VALUES ('vector_dimension', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [vector_dimension.to_string()],
        )?;
    } else {
        assert_vector_dimension(conn, vector_dimension)?;
    }

    conn.execute(
        "INSERT INTO schema_meta(key, value) VALUES ('version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Fails with `Misconfigured` if the configured embedder's dimension
/// doesn't match the dimension the `vectors` vtab was created with — a
/// mismatch means every `MATCH` query against it would silently return
/// garbage distances instead of an error.
fn assert_vector_dimension(conn: &Connection, vector_dimension: u32) -> Result<()> {
    let Some(recorded): Option<String> = conn
        .query_row("SELECT value FROM schema_meta WHERE key = 'vector_dimension'", [], |r| r.get(0))
        .ok()
    else {
        return Ok(());
    };
    let recorded: u32 = recorded.parse().unwrap_or(vector_dimension);
    if recorded != vector_dimension {
        return Err(MemoryError::Misconfigured(format!(
            "embedder dimension {vector_dimension} does not match the store's existing dimension {recorded}"
        )));
    }
    Ok(())
}

fn migrate_v1(conn: &Connection, vector_dimension: u32) -> Result<()> {
    conn.execute_batch(CREATE_MEMORIES)?;
    conn.execute_batch(CREATE_TAGS)?;
    conn.execute_batch(CREATE_MEMORY_TAGS)?;
    conn.execute_batch(CREATE_MEMORY_TAGS_INDEX)?;
    conn.execute_batch(CREATE_MEMORIES_UPDATED_INDEX)?;
    conn.execute_batch(CREATE_MEMORIES_LIFECYCLE_INDEX)?;
    conn.execute_batch(CREATE_VECTORS_MAP)?;
    conn.execute_batch(&create_vectors_vtab(vector_dimension))?;
    conn.execute_batch(CREATE_CLUSTERS)?;
    conn.execute_batch(CREATE_CLUSTER_MEMBERS)?;
    Ok(())
}

/// One-shot repair for a legacy layout that stored `created_at`/`updated_at`
/// as RFC 3339 TEXT instead of floating seconds. No-op if the columns are
/// already numeric.
pub fn migrate_legacy_timestamps(conn: &Connection) -> Result<()> {
    let column_type: Option<String> = conn
        .query_row(
            "SELECT type FROM pragma_table_info('memories') WHERE name = 'created_at'",
            [],
            |r| r.get(0),
        )
        .ok();

    if column_type.as_deref() == Some("TEXT") {
        tracing::info!("migrating legacy TEXT timestamps to floating seconds");
        conn.execute_batch(
            "ALTER TABLE memories RENAME COLUMN created_at TO created_at_legacy_text;
             ALTER TABLE memories ADD COLUMN created_at REAL;
             UPDATE memories SET created_at = strftime('%s', created_at_legacy_text);
             ALTER TABLE memories RENAME COLUMN updated_at TO updated_at_legacy_text;
             ALTER TABLE memories ADD COLUMN updated_at REAL;
             UPDATE memories SET updated_at = strftime('%s', updated_at_legacy_text);",
        )?;
    }
    Ok(())
}

/// One-shot repair for a legacy layout that stored tags as a delimited
/// blob column instead of the normalized `tags`/`memory_tags` tables.
pub fn migrate_legacy_tags(conn: &Connection) -> Result<()> {
    let has_legacy_column: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info('memories') WHERE name = 'tags_blob'",
            [],
            |r| r.get::<_, i64>(0),
        )
        .unwrap_or(0)
        > 0;

    if !has_legacy_column {
        return Ok(());
    }

    tracing::info!("migrating legacy delimited tags_blob into normalized tag tables");
    let mut stmt = conn.prepare("SELECT content_hash, tags_blob FROM memories WHERE tags_blob IS NOT NULL")?;
    let rows: Vec<(String, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .filter_map(|r| r.ok())
        .collect();
    drop(stmt);

    for (hash, blob) in rows {
        for tag in blob.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
            conn.execute(
                "INSERT INTO tags(name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
                [tag],
            )?;
            conn.execute(
                "INSERT INTO memory_tags(content_hash, tag_id)
                 SELECT ?1, id FROM tags WHERE name = ?2
                 ON CONFLICT DO NOTHING",
                rusqlite::params![hash, tag],
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::connection::SqliteConnectionManager;

    fn open() -> (SqliteConnectionManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let conn = SqliteConnectionManager::open(dir.path().join("t.db"), 5000, 2000).unwrap();
        (conn, dir)
    }

    #[test]
    fn reopening_with_the_same_dimension_succeeds() {
        let (conn, _dir) = open();
        let guard = conn.writer.try_lock().unwrap();
        run_migrations(&guard, 32).unwrap();
        run_migrations(&guard, 32).unwrap();
    }

    #[test]
    fn reopening_with_a_different_dimension_is_misconfigured() {
        let (conn, _dir) = open();
        let guard = conn.writer.try_lock().unwrap();
        run_migrations(&guard, 32).unwrap();
        let result = run_migrations(&guard, 64);
        assert!(matches!(result, Err(MemoryError::Misconfigured(_))));
    }

    #[test]
    fn future_schema_version_is_incompatible() {
        let (conn, _dir) = open();
        let guard = conn.writer.try_lock().unwrap();
        guard.execute_batch(CREATE_SCHEMA_META).unwrap();
        guard
            .execute(
                "INSERT INTO schema_meta(key, value) VALUES ('version', ?1)",
                [(SCHEMA_VERSION + 1).to_string()],
            )
            .unwrap();
        let result = run_migrations(&guard, 32);
        assert!(matches!(result, Err(MemoryError::SchemaIncompatible { .. })));
    }
}

//! Environment-driven configuration, read once at startup into a plain
//! struct so the rest of the crate never touches `std::env` directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_str_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `MEMORY_STORAGE_BACKEND` — "embedded" or "cloud".
    pub storage_backend: String,
    /// `MEMORY_EMBEDDED_PATH` — path to the sqlite database file.
    pub db_path: String,
    /// `MEMORY_BACKUPS_PATH` — directory `create_backup`/`list_backups` use.
    pub backups_path: String,
    /// `MEMORY_SQL_PRAGMAS` — comma-separated `key=value` pragma overrides
    /// layered on top of the fixed WAL/busy_timeout/cache_size pragmas, e.g.
    /// `busy_timeout=15000,cache_size=20000`.
    pub sql_pragmas: String,
    /// `MEMORY_ENABLE_WAL` — default true; false only makes sense for a
    /// single-process embedded deployment that wants the simpler rollback
    /// journal instead.
    pub enable_wal: bool,
    /// `MEMORY_SQL_BUSY_TIMEOUT_MS`
    pub busy_timeout_ms: u64,
    /// `MEMORY_SQL_CACHE_PAGES`
    pub cache_pages: i64,
    /// `MEMORY_EMBEDDING_PROVIDER` — "remote" or "hashing" (default).
    pub embedding_provider: String,
    /// `MEMORY_EMBEDDING_MODEL`
    pub embedding_model: String,
    /// `MEMORY_EMBEDDING_DIMENSIONS`
    pub embedding_dimensions: u32,
    /// `MEMORY_EMBEDDING_CACHE_SIZE`
    pub embedding_cache_entries: usize,
    /// `MEMORY_RETRIEVE_OVERFETCH`
    pub overfetch_factor: usize,
    /// `MEMORY_RELEVANCE_THRESHOLD`
    pub relevance_threshold: f64,
    /// `MEMORY_ACCESS_THRESHOLD_DAYS`
    pub access_threshold_days: f64,
    /// `LOG_LEVEL` — one of `DEBUG`, `INFO`, `WARNING`, `ERROR`.
    pub log_level: String,
    /// `MEMORY_REQUEST_TIMEOUT_MS`
    pub request_timeout: Duration,

    /// `CLOUD_OBJECT_BUCKET` — object store bucket for over-threshold content.
    pub cloud_object_bucket: String,
    /// `CLOUD_VECTOR_INDEX` — base URL of the managed vector index.
    pub cloud_vector_index: String,
    /// `CLOUD_API_TOKEN` — bearer token for the vector index and any
    /// remote embedding provider.
    pub cloud_api_token: Option<String>,
    /// `CLOUD_ACCOUNT_ID` — tenant/account scope for the managed backend.
    pub cloud_account_id: Option<String>,
    /// `CLOUD_SQL_DATABASE_ID` — managed SQL database identifier.
    pub cloud_sql_database_id: Option<String>,
    /// `CLOUD_EMBEDDING_MODEL` — model id the remote embedding provider uses.
    pub cloud_embedding_model: String,
    /// `CLOUD_LARGE_CONTENT_THRESHOLD` — content over this many bytes is
    /// offloaded to the object store instead of stored inline.
    pub cloud_large_content_threshold_bytes: u64,
    /// `CLOUD_MAX_RETRIES` — attempts for the vector index/object store
    /// before a 429/5xx/timeout gives up.
    pub cloud_max_retries: u32,
    /// `CLOUD_BASE_DELAY` — first backoff delay in milliseconds; doubles
    /// each retry.
    pub cloud_base_delay_ms: u64,
    /// `CLOUD_ENCRYPT_OBJECTS` — AES-256-GCM-encrypt offloaded content.
    pub cloud_encrypt_objects: bool,
    /// `CLOUD_RECONCILE_INTERVAL_SECS`
    pub cloud_reconcile_interval_secs: u64,

    /// `CONSOLIDATION_ENABLED` — master switch for the scheduler.
    pub consolidation_enabled: bool,
    /// `DECAY_ENABLED`
    pub decay_enabled: bool,
    /// `ASSOCIATIONS_ENABLED`
    pub associations_enabled: bool,
    /// `CLUSTERING_ENABLED`
    pub clustering_enabled: bool,
    /// `COMPRESSION_ENABLED`
    pub compression_enabled: bool,
    /// `FORGETTING_ENABLED`
    pub forgetting_enabled: bool,
    /// `RETENTION_CRITICAL` — half-life in days for the `critical` decay class.
    pub retention_critical_days: f64,
    /// `RETENTION_REFERENCE`
    pub retention_reference_days: f64,
    /// `RETENTION_STANDARD`
    pub retention_standard_days: f64,
    /// `RETENTION_TEMPORARY`
    pub retention_temporary_days: f64,
    /// `SCHEDULE_DAILY` — `HH:MM` local time for the decay/associations pass.
    pub schedule_daily: String,
    /// `SCHEDULE_WEEKLY` — `D:HH:MM` (0=Sunday) for clustering/compression.
    pub schedule_weekly: String,
    /// `SCHEDULE_MONTHLY` — `D:HH:MM` day-of-month for forgetting.
    pub schedule_monthly: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_backend: env_str_or("MEMORY_STORAGE_BACKEND", "embedded"),
            db_path: env_str_or("MEMORY_EMBEDDED_PATH", "memory.db"),
            backups_path: env_str_or("MEMORY_BACKUPS_PATH", "backups"),
            sql_pragmas: env_str_or("MEMORY_SQL_PRAGMAS", ""),
            enable_wal: env_or("MEMORY_ENABLE_WAL", true),
            busy_timeout_ms: env_or("MEMORY_SQL_BUSY_TIMEOUT_MS", 15_000),
            cache_pages: env_or("MEMORY_SQL_CACHE_PAGES", 20_000),
            embedding_provider: env_str_or("MEMORY_EMBEDDING_PROVIDER", "hashing"),
            embedding_model: env_str_or("MEMORY_EMBEDDING_MODEL", "hashing-384"),
            embedding_dimensions: env_or("MEMORY_EMBEDDING_DIMENSIONS", 384),
            embedding_cache_entries: env_or("MEMORY_EMBEDDING_CACHE_SIZE", 1_000),
            overfetch_factor: env_or("MEMORY_RETRIEVE_OVERFETCH", 4),
            relevance_threshold: env_or("MEMORY_RELEVANCE_THRESHOLD", 0.1),
            access_threshold_days: env_or("MEMORY_ACCESS_THRESHOLD_DAYS", 90.0),
            log_level: env_str_or("LOG_LEVEL", "INFO"),
            request_timeout: Duration::from_millis(env_or("MEMORY_REQUEST_TIMEOUT_MS", 30_000)),

            cloud_object_bucket: env_str_or("CLOUD_OBJECT_BUCKET", "memsynth"),
            cloud_vector_index: env_str_or("CLOUD_VECTOR_INDEX", "http://localhost:8080"),
            cloud_api_token: std::env::var("CLOUD_API_TOKEN").ok(),
            cloud_account_id: std::env::var("CLOUD_ACCOUNT_ID").ok(),
            cloud_sql_database_id: std::env::var("CLOUD_SQL_DATABASE_ID").ok(),
            cloud_embedding_model: env_str_or("CLOUD_EMBEDDING_MODEL", "remote-embedding"),
            cloud_large_content_threshold_bytes: env_or(
                "CLOUD_LARGE_CONTENT_THRESHOLD",
                1024 * 1024,
            ),
            cloud_max_retries: env_or("CLOUD_MAX_RETRIES", 3),
            cloud_base_delay_ms: env_or("CLOUD_BASE_DELAY", 1_000),
            cloud_encrypt_objects: env_or("CLOUD_ENCRYPT_OBJECTS", true),
            cloud_reconcile_interval_secs: env_or("CLOUD_RECONCILE_INTERVAL_SECS", 60),

            consolidation_enabled: env_or("CONSOLIDATION_ENABLED", true),
            decay_enabled: env_or("DECAY_ENABLED", true),
            associations_enabled: env_or("ASSOCIATIONS_ENABLED", true),
            clustering_enabled: env_or("CLUSTERING_ENABLED", true),
            compression_enabled: env_or("COMPRESSION_ENABLED", true),
            forgetting_enabled: env_or("FORGETTING_ENABLED", true),
            retention_critical_days: env_or("RETENTION_CRITICAL", 365.0),
            retention_reference_days: env_or("RETENTION_REFERENCE", 180.0),
            retention_standard_days: env_or("RETENTION_STANDARD", 30.0),
            retention_temporary_days: env_or("RETENTION_TEMPORARY", 7.0),
            schedule_daily: env_str_or("SCHEDULE_DAILY", "02:00"),
            schedule_weekly: env_str_or("SCHEDULE_WEEKLY", "0:03:00"),
            schedule_monthly: env_str_or("SCHEDULE_MONTHLY", "1:04:00"),
        }
    }
}

/// Parses `MEMORY_SQL_PRAGMAS`'s `key=value,key=value` format. Entries that
/// don't contain exactly one `=` are skipped rather than rejected outright.
pub fn parse_sql_pragmas(s: &str) -> Vec<(String, String)> {
    s.split(',')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let (key, value) = pair.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Parses a `D:HH:MM` schedule string (day-of-week or day-of-month, hour,
/// minute) into the tuple `consolidation::Scheduler` expects. Falls back to
/// `fallback` on any malformed input rather than erroring at startup over a
/// cosmetic config typo.
pub fn parse_day_time_schedule(s: &str, fallback: (u32, u32, u32)) -> (u32, u32, u32) {
    let parts: Vec<&str> = s.splitn(3, ':').collect();
    if parts.len() != 3 {
        return fallback;
    }
    match (parts[0].parse(), parts[1].parse(), parts[2].parse()) {
        (Ok(d), Ok(h), Ok(m)) => (d, h, m),
        _ => fallback,
    }
}

/// Parses an `HH:MM` schedule string into `(hour, minute)`.
pub fn parse_daily_schedule(s: &str, fallback: (u32, u32)) -> (u32, u32) {
    let parts: Vec<&str> = s.splitn(2, ':').collect();
    if parts.len() != 2 {
        return fallback;
    }
    match (parts[0].parse(), parts[1].parse()) {
        (Ok(h), Ok(m)) => (h, m),
        _ => fallback,
    }
}

/// Install a `tracing` subscriber driven by [`EngineConfig::log_level`].
/// Idempotent: safe to call more than once (subsequent calls are no-ops).
pub fn init_tracing(config: &EngineConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert!(cfg.embedding_dimensions > 0);
        assert!(cfg.overfetch_factor >= 1);
        assert!(cfg.consolidation_enabled);
    }

    #[test]
    fn parses_day_time_schedule() {
        assert_eq!(parse_day_time_schedule("0:03:00", (9, 9, 9)), (0, 3, 0));
        assert_eq!(parse_day_time_schedule("garbage", (1, 4, 0)), (1, 4, 0));
    }

    #[test]
    fn parses_daily_schedule() {
        assert_eq!(parse_daily_schedule("02:00", (9, 9)), (2, 0));
        assert_eq!(parse_daily_schedule("nope", (2, 0)), (2, 0));
    }

    #[test]
    fn parses_sql_pragmas() {
        let parsed = parse_sql_pragmas("busy_timeout=15000, cache_size=20000");
        assert_eq!(
            parsed,
            vec![
                ("busy_timeout".to_string(), "15000".to_string()),
                ("cache_size".to_string(), "20000".to_string()),
            ]
        );
        assert!(parse_sql_pragmas("").is_empty());
        assert!(parse_sql_pragmas("garbage").is_empty());
    }
}

//! Persistent semantic memory engine: a content-addressed store with
//! hybrid (vector + recency + tag + keyword) recall and a scheduled
//! consolidation pipeline (decay, association discovery, clustering,
//! compression, controlled forgetting).
//!
//! The embedded backend ([`storage::sqlite::SqliteStore`], default) runs
//! against a single sqlite file with an adjacent `sqlite-vec` index. The
//! `cloud` feature adds [`storage::cloud::CloudStore`], which splits the
//! same responsibilities across a managed metadata table, a remote vector
//! index, and an object store for oversized content.

pub mod commands;
pub mod concurrency;
pub mod config;
pub mod consolidation;
pub mod embedding;
pub mod error;
pub mod model;
pub mod query;
pub mod storage;
pub mod time_parser;

pub use config::EngineConfig;
pub use error::{MemoryError, Result};
pub use model::Memory;
pub use storage::{MaintenanceStore, MemoryStore};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

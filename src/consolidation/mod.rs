//! Scheduled consolidation: decay, associative discovery, clustering,
//! compression, and controlled forgetting. Every stage goes through the
//! normal `MemoryStore` interface — it never bypasses it — and runs are
//! serialized per store via [`Scheduler`]'s run-lock.

pub mod associations;
pub mod clustering;
pub mod compression;
pub mod decay;
pub mod forgetting;
mod scheduler;
pub mod types;

pub use decay::RetentionConfig;
pub use scheduler::{ConsolidationConfig, Scheduler};
pub use types::ConsolidationReport;

//! Crate-wide error taxonomy.
//!
//! Every public operation returns `Result<T>`. Variants map 1:1 onto the
//! error kinds an external protocol layer (MCP, HTTP, ...) needs to surface:
//! each carries enough context to satisfy the "(a) kind, (b) identifier,
//! (c) next-step hint" contract via [`MemoryError::hint`].

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("memory not found: {hash}")]
    NotFound { hash: String },

    #[error("duplicate content (existing hash {hash})")]
    Duplicate { hash: String },

    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("embedding failed permanently: {0}")]
    EmbeddingFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("misconfigured: {0}")]
    Misconfigured(String),

    #[error("schema incompatible: on-disk version {found}, expected {expected}")]
    SchemaIncompatible { found: u32, expected: u32 },

    #[error("store busy, retry later")]
    Busy,

    #[error("operation cancelled")]
    Cancelled,

    #[error("cloud storage error: {0}")]
    CloudStorage(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("http error: {0}")]
    #[cfg(any(feature = "cloud", feature = "remote-embeddings"))]
    Http(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MemoryError {
    /// Whether a caller should retry the same operation after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoryError::EmbeddingUnavailable(_) | MemoryError::Busy | MemoryError::CloudStorage(_)
        )
    }

    /// Stable numeric code for protocol-level mapping (JSON-RPC style).
    pub fn code(&self) -> i32 {
        match self {
            MemoryError::InvalidInput(_) => -32602,
            MemoryError::NotFound { .. } => -32001,
            MemoryError::Duplicate { .. } => -32002,
            MemoryError::EmbeddingUnavailable(_) => -32003,
            MemoryError::EmbeddingFailed(_) => -32004,
            MemoryError::Misconfigured(_) => -32005,
            MemoryError::SchemaIncompatible { .. } => -32006,
            MemoryError::Busy => -32007,
            MemoryError::Cancelled => -32008,
            _ => -32000,
        }
    }

    /// A short, user-facing hint about what to do next.
    pub fn hint(&self) -> &'static str {
        match self {
            MemoryError::InvalidInput(_) => "fix the request payload and retry",
            MemoryError::NotFound { .. } => "verify the content hash and retry",
            MemoryError::Duplicate { .. } => "the content already exists; use the existing hash",
            MemoryError::EmbeddingUnavailable(_) => "retry after a short backoff",
            MemoryError::EmbeddingFailed(_) => "do not retry; inspect the input content",
            MemoryError::Misconfigured(_) => "check embedder/backend configuration",
            MemoryError::SchemaIncompatible { .. } => "run the store's migration before retrying",
            MemoryError::Busy => "retry shortly; another writer holds the lock",
            MemoryError::Cancelled => "the caller's deadline elapsed",
            _ => "see error details",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_and_embedding_unavailable_are_retryable() {
        assert!(MemoryError::Busy.is_retryable());
        assert!(MemoryError::EmbeddingUnavailable("timeout".to_string()).is_retryable());
        assert!(MemoryError::CloudStorage("503".to_string()).is_retryable());
    }

    #[test]
    fn misconfigured_and_invalid_input_are_not_retryable() {
        assert!(!MemoryError::Misconfigured("bad key".to_string()).is_retryable());
        assert!(!MemoryError::InvalidInput("empty content".to_string()).is_retryable());
        assert!(!MemoryError::EmbeddingFailed("malformed input".to_string()).is_retryable());
    }

    #[test]
    fn codes_are_stable_for_protocol_mapping() {
        assert_eq!(MemoryError::NotFound { hash: "x".to_string() }.code(), -32001);
        assert_eq!(MemoryError::Duplicate { hash: "x".to_string() }.code(), -32002);
        assert_eq!(MemoryError::Busy.code(), -32007);
    }

    #[test]
    fn every_variant_has_a_non_empty_hint() {
        assert!(!MemoryError::Busy.hint().is_empty());
        assert!(!MemoryError::NotFound { hash: "x".to_string() }.hint().is_empty());
        assert!(!MemoryError::Internal("oops".to_string()).hint().is_empty());
    }
}

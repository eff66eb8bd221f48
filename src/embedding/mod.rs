//! Embedding provider contract: `Embedder`, the LRU text→vector cache, the
//! deterministic hashing fallback, and (feature-gated) a remote HTTP
//! provider with retry/backoff.

mod cache;
mod hashing;
mod queue;
#[cfg(feature = "remote-embeddings")]
mod remote;

pub use cache::EmbeddingCache;
pub use hashing::HashingEmbedder;
pub use queue::{EmbeddingQueue, EmbeddingRequest, EmbeddingStatus};
#[cfg(feature = "remote-embeddings")]
pub use remote::RemoteEmbedder;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;

/// `model_id()` of [`HashingEmbedder`], the zero-network fallback. Stores
/// check against this to tag fallback-embedded memories (spec §4.C).
pub const FALLBACK_MODEL_ID: &str = "hashing-fallback";

/// A text embedding provider. Implementations must be deterministic for
/// identical inputs and safe to call concurrently.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> u32;
    fn model_id(&self) -> &str;
}

/// Wraps an inner embedder with a text→vector LRU cache, so repeated
/// queries (and repeated consolidation passes over the same content) skip
/// re-embedding.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: EmbeddingCache,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self { inner, cache: EmbeddingCache::new(capacity) }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.get(text) {
            return Ok(hit.to_vec());
        }
        let vector = self.inner.embed(text).await?;
        self.cache.insert(text, vector.clone());
        Ok(vector)
    }

    fn dimension(&self) -> u32 {
        self.inner.dimension()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

/// Cosine similarity between two equal-length vectors. Returns 0.0 for
/// mismatched lengths or zero-magnitude vectors rather than panicking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_length_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}

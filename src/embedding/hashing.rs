//! Deterministic hashing-trick embedder: the fallback that keeps the
//! service usable with zero configuration and no network dependency.
//!
//! Tokens (unigrams + bigrams) are hashed into a fixed-width vector, then
//! L2-normalized. Not semantically rich, but stable, fast, and always
//! available — memories embedded this way are flagged so the associative
//! discovery stage of consolidation can skip them.

use async_trait::async_trait;

use crate::error::Result;

use super::Embedder;

pub struct HashingEmbedder {
    dimensions: u32,
}

impl HashingEmbedder {
    pub fn new(dimensions: u32) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    fn hash_token(token: &str) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        token.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let dim = self.dimensions as usize;
        let mut vector = vec![0.0f32; dim];

        for window in tokens.windows(2) {
            let bigram = format!("{} {}", window[0], window[1]);
            let idx = (Self::hash_token(&bigram) as usize) % dim;
            vector[idx] += 0.5;
        }
        for token in &tokens {
            let idx = (Self::hash_token(token) as usize) % dim;
            vector[idx] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> u32 {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        super::FALLBACK_MODEL_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deterministic_for_identical_input() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("remember the meeting").await.unwrap();
        let b = embedder.embed("remember the meeting").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn empty_input_yields_zero_vector() {
        let embedder = HashingEmbedder::new(32);
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn output_is_l2_normalized() {
        let embedder = HashingEmbedder::new(32);
        let v = embedder.embed("some reasonably long sentence of text").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_text_is_more_similar_than_unrelated() {
        let embedder = HashingEmbedder::new(128);
        let a = embedder.embed("the quick brown fox jumps").await.unwrap();
        let b = embedder.embed("the quick brown fox leaps").await.unwrap();
        let c = embedder.embed("quarterly tax filing deadline").await.unwrap();
        let sim_ab = super::super::cosine_similarity(&a, &b);
        let sim_ac = super::super::cosine_similarity(&a, &c);
        assert!(sim_ab > sim_ac);
    }
}

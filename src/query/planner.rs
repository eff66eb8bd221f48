//! The composite recall score: similarity, recency decay, tag overlap,
//! keyword overlap, and a type bonus, combined with configurable weights.

use crate::model::{type_bonus, Memory};

#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub similarity: f32,
    pub recency: f32,
    pub tag_overlap: f32,
    pub keyword_overlap: f32,
    pub type_bonus: f32,
    pub recency_lambda: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: 0.55,
            recency: 0.20,
            tag_overlap: 0.15,
            keyword_overlap: 0.05,
            type_bonus: 0.05,
            recency_lambda: 0.1,
        }
    }
}

fn query_terms(query: &str) -> std::collections::HashSet<String> {
    query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn tag_overlap_ratio(memory: &Memory, query_terms: &std::collections::HashSet<String>) -> f32 {
    if memory.tags.is_empty() || query_terms.is_empty() {
        return 0.0;
    }
    let matched = memory.tags.iter().filter(|t| query_terms.contains(&t.to_lowercase())).count();
    matched as f32 / memory.tags.len() as f32
}

fn keyword_overlap_ratio(memory: &Memory, query_terms: &std::collections::HashSet<String>) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms = query_terms_from_content(&memory.content);
    if content_terms.is_empty() {
        return 0.0;
    }
    let matched = query_terms.intersection(&content_terms).count();
    matched as f32 / query_terms.len() as f32
}

fn query_terms_from_content(content: &str) -> std::collections::HashSet<String> {
    content
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Score a set of `(memory, cosine_similarity)` candidates against `query`
/// at time `now`, returning them sorted descending by composite score.
pub fn score_candidates(
    candidates: Vec<(Memory, f32)>,
    query: &str,
    now: f64,
    weights: &ScoreWeights,
) -> Vec<(Memory, f32)> {
    let terms = query_terms(query);
    let mut scored: Vec<(Memory, f32)> = candidates
        .into_iter()
        .map(|(memory, similarity)| {
            let score = composite_score(&memory, similarity, &terms, now, weights);
            (memory, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

pub fn composite_score(
    memory: &Memory,
    similarity: f32,
    query_terms_set: &std::collections::HashSet<String>,
    now: f64,
    weights: &ScoreWeights,
) -> f32 {
    let age_days = ((now - memory.created_at) / 86400.0).max(0.0) as f32;
    let recency = (-weights.recency_lambda * age_days).exp();
    let tag_overlap = tag_overlap_ratio(memory, query_terms_set);
    let keyword_overlap = keyword_overlap_ratio(memory, query_terms_set);
    let bonus = type_bonus(&memory.memory_type);

    weights.similarity * similarity
        + weights.recency * recency
        + weights.tag_overlap * tag_overlap
        + weights.keyword_overlap * keyword_overlap
        + weights.type_bonus * bonus
}

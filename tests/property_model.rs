//! Property tests for the content hashing and composite scoring
//! invariants that the rest of the crate leans on.

use memsynth::model::Memory;
use memsynth::query::planner::{score_candidates, ScoreWeights};
use proptest::prelude::*;

proptest! {
    #[test]
    fn content_hash_is_deterministic_and_injective_over_ascii(a in "[a-zA-Z0-9 ]{1,80}", b in "[a-zA-Z0-9 ]{1,80}") {
        let hash_a1 = memsynth::model::content_hash(&a);
        let hash_a2 = memsynth::model::content_hash(&a);
        prop_assert_eq!(&hash_a1, &hash_a2);
        if a.trim() != b.trim() {
            let hash_b = memsynth::model::content_hash(&b);
            prop_assert_ne!(hash_a1, hash_b);
        }
    }

    #[test]
    fn memory_new_never_produces_untrimmed_content(raw in "[ \\t]{0,3}[a-zA-Z]{1,20}[ \\t]{0,3}") {
        let memory = Memory::new(raw, "note", [], Default::default(), 0.0).unwrap();
        prop_assert_eq!(memory.content.clone(), memory.content.trim().to_string());
    }

    #[test]
    fn tags_are_always_deduped_and_trimmed(tags in prop::collection::vec("[a-z]{1,8}", 0..10)) {
        let memory = Memory::new("content", "note", tags.clone(), Default::default(), 0.0).unwrap();
        let unique: std::collections::BTreeSet<String> = tags.iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
        prop_assert_eq!(memory.tags, unique);
    }

    #[test]
    fn composite_score_is_bounded_for_bounded_similarity(similarity in 0.0f32..=1.0, age_days in 0.0f64..5000.0) {
        let weights = ScoreWeights::default();
        let memory = Memory::new("some content about a project", "note", ["project".to_string()], Default::default(), 0.0).unwrap();
        let now = age_days * 86_400.0;
        let scored = score_candidates(vec![(memory, similarity)], "project", now, &weights);
        let (_, score) = &scored[0];
        let max_possible = weights.similarity + weights.recency + weights.tag_overlap + weights.keyword_overlap + weights.type_bonus.max(0.3);
        prop_assert!(*score <= max_possible);
        prop_assert!(*score >= -weights.type_bonus.abs());
    }
}

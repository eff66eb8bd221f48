//! End-to-end exercises of the embedded backend's public `MemoryStore`
//! surface: storage identity, metadata updates, tag search, recall
//! windows, and duplicate handling.

use std::sync::Arc;

use memsynth::embedding::HashingEmbedder;
use memsynth::model::{Memory, MetadataValue};
use memsynth::storage::sqlite::SqliteStore;
use memsynth::storage::{DeleteOutcome, MemoryStore, StoreOutcome, TagMatch, UpdateOutcome};

async fn new_store() -> SqliteStore {
    let embedder = Arc::new(HashingEmbedder::new(32));
    let store = SqliteStore::new(":memory:", embedder, 5_000, 2_000, 4).unwrap();
    store.initialize().await.unwrap();
    store
}

#[tokio::test]
async fn storing_identical_content_twice_reports_duplicate() {
    let store = new_store().await;
    let first = Memory::new("remember the meeting", "note", [], Default::default(), 0.0).unwrap();
    let second = Memory::new("remember the meeting", "note", [], Default::default(), 10.0).unwrap();

    let outcome_a = store.store(first.clone()).await.unwrap();
    assert!(matches!(outcome_a, StoreOutcome::Stored(_)));

    let outcome_b = store.store(second).await.unwrap();
    match outcome_b {
        StoreOutcome::Duplicate { existing_hash } => assert_eq!(existing_hash, first.content_hash),
        other => panic!("expected duplicate, got {other:?}"),
    }
}

#[tokio::test]
async fn metadata_update_preserves_created_at_when_asked() {
    let store = new_store().await;
    let memory = Memory::new("a decision we made", "decision", [], Default::default(), 1_000.0).unwrap();
    let hash = memory.content_hash.clone();
    store.store(memory).await.unwrap();

    let mut updates = std::collections::HashMap::new();
    updates.insert("reviewed".to_string(), MetadataValue::Bool(true));

    let outcome = store.update_metadata(&hash, updates, true).await.unwrap();
    match outcome {
        UpdateOutcome::Updated(updated) => {
            assert_eq!(updated.created_at, 1_000.0);
            assert_eq!(updated.updated_at, 1_000.0);
            assert_eq!(updated.metadata.get("reviewed"), Some(&MetadataValue::Bool(true)));
        }
        UpdateOutcome::NotFound => panic!("memory should exist"),
    }
}

#[tokio::test]
async fn metadata_update_bumps_updated_at_by_default() {
    let store = new_store().await;
    let memory = Memory::new("a note", "note", [], Default::default(), 1_000.0).unwrap();
    let hash = memory.content_hash.clone();
    store.store(memory).await.unwrap();

    let outcome = store.update_metadata(&hash, Default::default(), false).await.unwrap();
    match outcome {
        UpdateOutcome::Updated(updated) => {
            assert_eq!(updated.created_at, 1_000.0);
            assert!(updated.updated_at >= updated.created_at);
        }
        UpdateOutcome::NotFound => panic!("memory should exist"),
    }
}

#[tokio::test]
async fn update_metadata_on_missing_hash_reports_not_found() {
    let store = new_store().await;
    let outcome = store.update_metadata("no-such-hash", Default::default(), false).await.unwrap();
    assert_eq!(outcome, UpdateOutcome::NotFound);
}

#[tokio::test]
async fn search_by_tag_respects_any_and_all_modes() {
    let store = new_store().await;
    store
        .store(Memory::new("a", "note", ["work".to_string()], Default::default(), 0.0).unwrap())
        .await
        .unwrap();
    store
        .store(
            Memory::new("b", "note", ["work".to_string(), "urgent".to_string()], Default::default(), 1.0)
                .unwrap(),
        )
        .await
        .unwrap();

    let any = store.search_by_tag(&["work".to_string(), "urgent".to_string()], TagMatch::Any).await.unwrap();
    assert_eq!(any.len(), 2);

    let all = store.search_by_tag(&["work".to_string(), "urgent".to_string()], TagMatch::All).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].content, "b");
}

#[tokio::test]
async fn recall_with_no_query_or_window_matches_get_recent() {
    let store = new_store().await;
    for i in 0..5 {
        store
            .store(Memory::new(format!("memory {i}"), "note", [], Default::default(), i as f64).unwrap())
            .await
            .unwrap();
    }

    let recalled = store.recall(None, None, 3).await.unwrap();
    let recent = store.get_recent(3).await.unwrap();
    let recalled_hashes: Vec<_> = recalled.iter().map(|m| &m.content_hash).collect();
    let recent_hashes: Vec<_> = recent.iter().map(|m| &m.content_hash).collect();
    assert_eq!(recalled_hashes, recent_hashes);
}

#[tokio::test]
async fn recall_with_window_excludes_memories_outside_range() {
    let store = new_store().await;
    store.store(Memory::new("too early", "note", [], Default::default(), 0.0).unwrap()).await.unwrap();
    store.store(Memory::new("in range", "note", [], Default::default(), 500.0).unwrap()).await.unwrap();
    store.store(Memory::new("too late", "note", [], Default::default(), 2_000.0).unwrap()).await.unwrap();

    let recalled = store.recall(None, Some((100.0, 1_000.0)), 10).await.unwrap();
    assert_eq!(recalled.len(), 1);
    assert_eq!(recalled[0].content, "in range");
}

#[tokio::test]
async fn delete_then_delete_again_reports_not_found() {
    let store = new_store().await;
    let memory = Memory::new("ephemeral", "temporary", [], Default::default(), 0.0).unwrap();
    let hash = memory.content_hash.clone();
    store.store(memory).await.unwrap();

    assert_eq!(store.delete(&hash).await.unwrap(), DeleteOutcome::Deleted);
    assert_eq!(store.delete(&hash).await.unwrap(), DeleteOutcome::NotFound);
}

#[tokio::test]
async fn retrieve_ranks_tag_matching_memory_above_unrelated_one() {
    let store = new_store().await;
    store
        .store(
            Memory::new(
                "quarterly roadmap planning session",
                "decision",
                ["roadmap".to_string()],
                Default::default(),
                0.0,
            )
            .unwrap(),
        )
        .await
        .unwrap();
    store
        .store(Memory::new("grocery list for the week", "note", [], Default::default(), 0.0).unwrap())
        .await
        .unwrap();

    let results = store.retrieve("roadmap planning", 2).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].0.content, "quarterly roadmap planning session");
}

#[tokio::test]
async fn get_stats_reflects_stored_count_and_tags() {
    let store = new_store().await;
    store
        .store(Memory::new("a", "note", ["work".to_string()], Default::default(), 0.0).unwrap())
        .await
        .unwrap();
    store
        .store(Memory::new("b", "note", ["personal".to_string()], Default::default(), 1.0).unwrap())
        .await
        .unwrap();

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.total_memories, 2);
    assert_eq!(stats.tag_count, 2);
    assert_eq!(stats.backend, "sqlite");
}

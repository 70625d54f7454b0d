//! Integration tests for the storage layer
//!
//! Exercises LanceStore against a real database in a temporary directory.

use chrono::{Duration, Utc};
use recall::RecallError;
use recall::memory::types::{Link, LinkType, MemoryCategory, MemoryItem};
use recall::storage::{LanceStore, MemoryFilter, SearchMode};
use recall::testing::{MOCK_MODEL_VERSION, MockEmbedder};
use tempfile::tempdir;
use uuid::Uuid;

const DIM: usize = 384;

/// Test fixture: a memory whose embedding comes from the mock embedder
fn memory(owner: &str, content: &str) -> MemoryItem {
    let embedding = MockEmbedder::new().embed_sync(content);
    MemoryItem::new(
        owner,
        content,
        embedding,
        MOCK_MODEL_VERSION,
        MemoryCategory::Semantic,
    )
}

/// Test fixture: a store in a temporary directory
async fn create_test_store() -> (LanceStore, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = LanceStore::open(dir.path(), DIM).await.unwrap();
    (store, dir)
}

mod insertion_tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get_roundtrip() {
        let (store, _dir) = create_test_store().await;

        let item = memory("alice", "Alice keeps bees")
            .with_importance(0.7)
            .with_tags(["hobby", "outdoors"]);
        let id = store.insert(&item).await.unwrap();
        assert_eq!(id, item.id);

        let fetched = store.get(id).await.unwrap().expect("memory should exist");
        assert_eq!(fetched.owner_id, "alice");
        assert_eq!(fetched.content, "Alice keeps bees");
        assert_eq!(fetched.embedding_model, MOCK_MODEL_VERSION);
        assert_eq!(fetched.category, MemoryCategory::Semantic);
        assert!((fetched.importance - 0.7).abs() < 1e-6);
        assert!(fetched.tags.contains("hobby"));
        assert!(fetched.tags.contains("outdoors"));
        assert_eq!(fetched.embedding.len(), DIM);
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let (store, _dir) = create_test_store().await;
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_rejected() {
        let (store, _dir) = create_test_store().await;

        let item = MemoryItem::new(
            "alice",
            "short vector",
            vec![0.1; 8],
            MOCK_MODEL_VERSION,
            MemoryCategory::Episodic,
        );
        let err = store.insert(&item).await.unwrap_err();
        assert!(matches!(err, RecallError::EmbeddingMismatch(_)));
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_insert_and_lookup() {
        let (store, _dir) = create_test_store().await;

        let items: Vec<MemoryItem> = (0..5)
            .map(|i| memory("alice", &format!("note number {i}")))
            .collect();
        store.insert_batch(&items).await.unwrap();
        assert_eq!(store.count(Some("alice")).await.unwrap(), 5);

        let wanted = vec![items[1].id, items[3].id, Uuid::new_v4()];
        let mut found: Vec<Uuid> = store
            .get_by_ids(&wanted)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        found.sort();
        let mut expected = vec![items[1].id, items[3].id];
        expected.sort();
        assert_eq!(found, expected);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempdir().unwrap();
        let id = {
            let store = LanceStore::open(dir.path(), DIM).await.unwrap();
            store.insert(&memory("alice", "persisted fact")).await.unwrap()
        };

        let store = LanceStore::open(dir.path(), DIM).await.unwrap();
        assert!(store.get(id).await.unwrap().is_some());
    }
}

mod search_tests {
    use super::*;

    #[tokio::test]
    async fn test_vector_search_respects_owner() {
        let (store, _dir) = create_test_store().await;
        store.insert(&memory("alice", "Alice likes Python")).await.unwrap();
        store.insert(&memory("bob", "Bob likes Python")).await.unwrap();

        let query = MockEmbedder::new().embed_sync("python");
        let filter = MemoryFilter::new().with_owner("alice");
        let results = store.search("python", Some(&query), &filter, 10).await.unwrap();

        assert_eq!(results.mode, SearchMode::Vector);
        assert!(!results.is_degraded());
        assert_eq!(results.memories.len(), 1);
        assert_eq!(results.memories[0].owner_id, "alice");
    }

    #[tokio::test]
    async fn test_search_filters_by_embedding_model() {
        let (store, _dir) = create_test_store().await;
        store.insert(&memory("alice", "current model note")).await.unwrap();
        let old = MemoryItem::new(
            "alice",
            "old model note",
            MockEmbedder::new().embed_sync("old model note"),
            "legacy-v0",
            MemoryCategory::Semantic,
        );
        store.insert(&old).await.unwrap();

        let query = MockEmbedder::new().embed_sync("note");
        let filter = MemoryFilter::new()
            .with_owner("alice")
            .with_embedding_model(MOCK_MODEL_VERSION);
        let results = store.search("note", Some(&query), &filter, 10).await.unwrap();

        assert_eq!(results.memories.len(), 1);
        assert_eq!(results.memories[0].content, "current model note");
    }

    #[tokio::test]
    async fn test_search_respects_time_window() {
        let (store, _dir) = create_test_store().await;
        store.insert(&memory("alice", "fresh note")).await.unwrap();
        store
            .insert(&memory("alice", "stale note").with_created_at(Utc::now() - Duration::days(30)))
            .await
            .unwrap();

        let query = MockEmbedder::new().embed_sync("note");
        let filter = MemoryFilter::new()
            .with_owner("alice")
            .since(Utc::now() - Duration::days(1));
        let results = store.search("note", Some(&query), &filter, 10).await.unwrap();

        assert_eq!(results.memories.len(), 1);
        assert_eq!(results.memories[0].content, "fresh note");
    }

    #[tokio::test]
    async fn test_keyword_fallback_without_embedding() {
        let (store, _dir) = create_test_store().await;
        store
            .insert(&memory("alice", "Alice prefers green tea").with_importance(0.4))
            .await
            .unwrap();
        store
            .insert(&memory("alice", "Alice drinks tea at night").with_importance(0.9))
            .await
            .unwrap();
        store.insert(&memory("alice", "Alice owns a bicycle")).await.unwrap();

        let filter = MemoryFilter::new().with_owner("alice");
        let results = store.search("tea", None, &filter, 10).await.unwrap();

        assert_eq!(results.mode, SearchMode::Keyword);
        assert!(results.is_degraded());
        let contents: Vec<&str> = results.memories.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["Alice drinks tea at night", "Alice prefers green tea"]);
    }

    #[tokio::test]
    async fn test_zero_limit_returns_nothing() {
        let (store, _dir) = create_test_store().await;
        store.insert(&memory("alice", "anything")).await.unwrap();

        let query = MockEmbedder::new().embed_sync("anything");
        let results = store
            .search("anything", Some(&query), &MemoryFilter::new(), 0)
            .await
            .unwrap();
        assert!(results.memories.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_tag() {
        let (store, _dir) = create_test_store().await;
        store
            .insert(&memory("alice", "tagged").with_tags(["subject:alice"]))
            .await
            .unwrap();
        store
            .insert(&memory("alice", "near miss").with_tags(["subject:alice smith"]))
            .await
            .unwrap();
        store
            .insert(&memory("bob", "other owner").with_tags(["subject:alice"]))
            .await
            .unwrap();

        let found = store
            .find_by_tag("alice", "subject:alice", Some(MemoryCategory::Semantic), 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "tagged");
    }
}

mod link_tests {
    use super::*;

    #[tokio::test]
    async fn test_links_are_stored_and_cached() {
        let (store, _dir) = create_test_store().await;
        let a = store.insert(&memory("alice", "a")).await.unwrap();
        let b = store.insert(&memory("alice", "b")).await.unwrap();

        store
            .insert_link(&Link::new(a, b, LinkType::RelatesTo))
            .await
            .unwrap();

        let from_a = store.neighbors(a).await.unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_a[0].link_type, LinkType::RelatesTo);
        // Links are visible from either endpoint
        assert_eq!(store.neighbors(b).await.unwrap().len(), 1);

        let source = store.get(a).await.unwrap().unwrap();
        assert!(source.linked_ids.contains(&b));
    }

    #[tokio::test]
    async fn test_self_loop_is_rejected() {
        let (store, _dir) = create_test_store().await;
        let a = store.insert(&memory("alice", "a")).await.unwrap();

        let err = store
            .insert_link(&Link::new(a, a, LinkType::RelatesTo))
            .await
            .unwrap_err();
        assert!(matches!(err, RecallError::Memory(_)));
        assert!(store.neighbors(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_custom_link_type_roundtrip() {
        let (store, _dir) = create_test_store().await;
        let a = store.insert(&memory("alice", "a")).await.unwrap();
        let b = store.insert(&memory("alice", "b")).await.unwrap();

        let kind = LinkType::Other("inspired_by".to_string());
        store.insert_link(&Link::new(a, b, kind.clone())).await.unwrap();
        assert_eq!(store.neighbors(b).await.unwrap()[0].link_type, kind);
    }

    #[tokio::test]
    async fn test_delete_removes_links() {
        let (store, _dir) = create_test_store().await;
        let a = store.insert(&memory("alice", "a")).await.unwrap();
        let b = store.insert(&memory("alice", "b")).await.unwrap();
        store
            .insert_link(&Link::new(a, b, LinkType::DerivedFrom))
            .await
            .unwrap();

        assert!(store.delete(b).await.unwrap());
        assert!(!store.delete(b).await.unwrap());
        assert!(store.neighbors(a).await.unwrap().is_empty());
    }
}

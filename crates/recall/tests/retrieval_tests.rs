//! Integration tests for two-phase retrieval
//!
//! Semantic search plus link expansion over a real store, using the
//! bag-of-words mock embedder so similarity follows shared words.

use std::sync::Arc;

use recall::RecallError;
use recall::config::RetrievalConfig;
use recall::embedding::Embedder;
use recall::memory::retrieval::RetrievalEngine;
use recall::memory::types::{Link, LinkType, MemoryCategory, MemoryItem};
use recall::storage::{LanceStore, SearchMode};
use recall::testing::{FailingEmbedder, MOCK_MODEL_VERSION, MockEmbedder};
use tempfile::tempdir;
use uuid::Uuid;

struct Fixture {
    store: Arc<LanceStore>,
    _dir: tempfile::TempDir,
}

impl Fixture {
    async fn new() -> Self {
        let dir = tempdir().unwrap();
        let store = Arc::new(LanceStore::open(dir.path(), 384).await.unwrap());
        Self { store, _dir: dir }
    }

    fn engine(&self, embedder: Arc<dyn Embedder>) -> RetrievalEngine {
        let config = RetrievalConfig {
            // Drop candidates that share no words with the query
            min_similarity: 0.1,
            ..RetrievalConfig::default()
        };
        RetrievalEngine::new(self.store.clone(), embedder, config).unwrap()
    }

    async fn add(&self, owner: &str, content: &str, importance: f32) -> Uuid {
        let item = MemoryItem::new(
            owner,
            content,
            MockEmbedder::new().embed_sync(content),
            MOCK_MODEL_VERSION,
            MemoryCategory::Semantic,
        )
        .with_importance(importance);
        self.store.insert(&item).await.unwrap()
    }

    async fn link(&self, from: Uuid, to: Uuid, link_type: LinkType) {
        self.store
            .insert_link(&Link::new(from, to, link_type))
            .await
            .unwrap();
    }
}

fn mock() -> Arc<dyn Embedder> {
    Arc::new(MockEmbedder::new())
}

mod semantic_phase {
    use super::*;

    #[tokio::test]
    async fn test_finds_matching_memory() {
        let fx = Fixture::new().await;
        let a = fx.add("user1", "User likes Python", 0.9).await;
        fx.add("user1", "User owns a bicycle", 0.5).await;

        let result = fx.engine(mock()).retrieve("python", "user1", 2).await.unwrap();

        assert_eq!(result.mode, SearchMode::Vector);
        assert_eq!(result.ids(), vec![a]);
        assert_eq!(result.expanded, 0);
        assert_eq!(result.synthesized_text, "- User likes Python");
    }

    #[tokio::test]
    async fn test_result_limit_follows_focus_level() {
        let fx = Fixture::new().await;
        for i in 0..8 {
            fx.add("user1", &format!("python fact {i}"), 0.5).await;
        }

        let engine = fx.engine(mock());
        let narrow = engine.retrieve("python", "user1", 0).await.unwrap();
        let wide = engine.retrieve("python", "user1", 5).await.unwrap();

        assert_eq!(narrow.items.len(), engine.focus(0).result_limit);
        assert_eq!(wide.items.len(), 8);
    }

    #[tokio::test]
    async fn test_other_owners_are_invisible() {
        let fx = Fixture::new().await;
        fx.add("user2", "User likes Python", 0.9).await;

        let result = fx.engine(mock()).retrieve("python", "user1", 5).await.unwrap();
        assert!(result.is_empty());
        assert!(result.synthesized_text.is_empty());
    }

    #[tokio::test]
    async fn test_other_embedding_models_are_skipped() {
        let fx = Fixture::new().await;
        fx.add("user1", "User likes Python", 0.9).await;

        let engine = fx.engine(Arc::new(MockEmbedder::with_version("mock-v2")));
        let result = engine.retrieve("python", "user1", 5).await.unwrap();
        assert!(result.is_empty());
    }
}

mod expansion_phase {
    use super::*;

    #[tokio::test]
    async fn test_linked_memory_is_pulled_in() {
        let fx = Fixture::new().await;
        let a = fx.add("user1", "User likes Python", 0.9).await;
        let b = fx.add("user1", "User maintains data pipelines", 0.6).await;
        fx.link(a, b, LinkType::RelatesTo).await;

        let result = fx.engine(mock()).retrieve("python", "user1", 3).await.unwrap();

        assert_eq!(result.ids(), vec![a, b]);
        assert_eq!(result.expanded, 1);
        assert!(result.synthesized_text.contains("data pipelines"));
    }

    #[tokio::test]
    async fn test_focus_zero_does_not_expand() {
        let fx = Fixture::new().await;
        let a = fx.add("user1", "User likes Python", 0.9).await;
        let b = fx.add("user1", "User maintains data pipelines", 0.6).await;
        fx.link(a, b, LinkType::RelatesTo).await;

        let result = fx.engine(mock()).retrieve("python", "user1", 0).await.unwrap();
        assert_eq!(result.ids(), vec![a]);
    }

    #[tokio::test]
    async fn test_links_are_followed_against_their_direction() {
        let fx = Fixture::new().await;
        let a = fx.add("user1", "User likes Python", 0.9).await;
        let b = fx.add("user1", "User maintains data pipelines", 0.6).await;
        fx.link(b, a, LinkType::DerivedFrom).await;

        let result = fx.engine(mock()).retrieve("python", "user1", 3).await.unwrap();
        assert!(result.ids().contains(&b));
    }

    #[tokio::test]
    async fn test_semantic_and_expanded_duplicates_collapse() {
        let fx = Fixture::new().await;
        let a = fx.add("user1", "User likes Python", 0.9).await;
        let b = fx.add("user1", "User writes Python scripts", 0.6).await;
        fx.link(a, b, LinkType::RelatesTo).await;
        fx.link(b, a, LinkType::RelatesTo).await;

        let result = fx.engine(mock()).retrieve("python", "user1", 3).await.unwrap();

        let mut ids = result.ids();
        assert_eq!(ids.len(), 2);
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 2);
        assert_eq!(result.expanded, 0);
    }

    #[tokio::test]
    async fn test_expansion_stays_within_owner() {
        let fx = Fixture::new().await;
        let a = fx.add("user1", "User likes Python", 0.9).await;
        let foreign = fx.add("user2", "Someone else entirely", 0.9).await;
        fx.link(a, foreign, LinkType::RelatesTo).await;

        let result = fx.engine(mock()).retrieve("python", "user1", 5).await.unwrap();
        assert_eq!(result.ids(), vec![a]);
    }

    #[tokio::test]
    async fn test_depth_limits_reach() {
        let fx = Fixture::new().await;
        let a = fx.add("user1", "User likes Python", 0.9).await;
        let b = fx.add("user1", "first hop", 0.5).await;
        let c = fx.add("user1", "second hop", 0.5).await;
        let d = fx.add("user1", "third hop", 0.5).await;
        fx.link(a, b, LinkType::RelatesTo).await;
        fx.link(b, c, LinkType::RelatesTo).await;
        fx.link(c, d, LinkType::RelatesTo).await;

        let engine = fx.engine(mock());
        // Level 1 follows one hop, level 3 two hops, level 5 three hops
        assert_eq!(
            engine.retrieve("python", "user1", 1).await.unwrap().ids(),
            vec![a, b]
        );
        let two_hops = engine.retrieve("python", "user1", 3).await.unwrap().ids();
        assert!(two_hops.contains(&c) && !two_hops.contains(&d));
        let three_hops = engine.retrieve("python", "user1", 5).await.unwrap().ids();
        assert!(three_hops.contains(&d));
    }
}

mod degraded_mode {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_embedder_falls_back_to_keywords() {
        let fx = Fixture::new().await;
        let a = fx.add("user1", "User likes Python", 0.9).await;
        fx.add("user1", "User owns a bicycle", 0.5).await;

        let engine = fx.engine(Arc::new(FailingEmbedder));
        let result = engine.retrieve("python", "user1", 2).await.unwrap();

        assert_eq!(result.mode, SearchMode::Keyword);
        assert_eq!(result.ids(), vec![a]);
    }

    /// Claims the store's dimension but returns short vectors
    struct ShortVectorEmbedder;

    #[async_trait::async_trait]
    impl Embedder for ShortVectorEmbedder {
        async fn embed(&self, _text: &str) -> recall::error::Result<Vec<f32>> {
            Ok(vec![0.5; 8])
        }

        fn model_version(&self) -> &str {
            MOCK_MODEL_VERSION
        }

        fn dimension(&self) -> usize {
            384
        }
    }

    #[tokio::test]
    async fn test_mismatched_embedder_is_refused() {
        let fx = Fixture::new().await;
        let embedder: Arc<dyn Embedder> = Arc::new(MockEmbedder::with_dimension(8));
        let result = RetrievalEngine::new(fx.store.clone(), embedder, RetrievalConfig::default());
        assert!(matches!(result, Err(RecallError::EmbeddingMismatch(_))));
    }

    #[tokio::test]
    async fn test_short_vector_falls_back_to_keywords() {
        let fx = Fixture::new().await;
        let a = fx.add("user1", "User likes Python", 0.9).await;

        let engine = fx.engine(Arc::new(ShortVectorEmbedder));
        let result = engine.retrieve("python", "user1", 2).await.unwrap();

        assert_eq!(result.mode, SearchMode::Keyword);
        assert_eq!(result.ids(), vec![a]);
    }
}

//! Text embedding
//!
//! The `Embedder` trait is the seam between the engine and whatever turns
//! text into vectors. `FastEmbedder` runs a local ONNX model through
//! fastembed; tests use the deterministic embedders in `crate::testing`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use tracing::debug;

use crate::error::{RecallError, Result};

pub const EMBEDDING_DIMENSION: usize = 384;

/// Turns text into fixed-dimension vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Version tag stored next to every embedding this embedder produces
    fn model_version(&self) -> &str;

    fn dimension(&self) -> usize;
}

/// Refuse an embedder whose vectors would not fit a store of `expected` dimensions
pub fn ensure_dimension(embedder: &dyn Embedder, expected: usize) -> Result<()> {
    let actual = embedder.dimension();
    if actual != expected {
        return Err(RecallError::EmbeddingMismatch(format!(
            "embedder {} produces {} dimensions, store expects {}",
            embedder.model_version(),
            actual,
            expected
        )));
    }
    Ok(())
}

/// Local multilingual E5 model via fastembed
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    version: String,
}

impl FastEmbedder {
    /// Load the model named in config. Only `multilingual-e5-small` is supported.
    pub fn new(model_name: &str) -> Result<Self> {
        let model = match model_name {
            "multilingual-e5-small" => FastEmbedModel::MultilingualE5Small,
            other => {
                return Err(RecallError::Config(format!(
                    "Unsupported embedding model: {other}"
                )));
            }
        };

        let embedding = TextEmbedding::try_new(InitOptions::new(model))
            .map_err(|e| RecallError::Embedding(e.to_string()))?;

        debug!("Loaded embedding model {model_name}");

        Ok(Self {
            model: Arc::new(Mutex::new(embedding)),
            version: model_name.to_string(),
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();

        // Inference is CPU-bound; keep it off the async workers
        let embeddings = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| RecallError::Embedding("Embedding model lock poisoned".to_string()))?;
            model
                .embed(vec![text], None)
                .map_err(|e| RecallError::Embedding(e.to_string()))
        })
        .await
        .map_err(|e| RecallError::Embedding(format!("Embedding task failed: {e}")))??;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RecallError::Embedding("No embedding returned".to_string()))
    }

    fn model_version(&self) -> &str {
        &self.version
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

/// Cosine similarity of two vectors; zero when either has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

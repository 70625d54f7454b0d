//! Test utilities for recall - deterministic mocks for the collaborators
//!
//! Nothing here loads a model or talks to the network, so unit and
//! integration tests stay fast and reproducible.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::curator::provider::{Extractor, Judge};
use crate::curator::types::CuratorError;
use crate::embedding::{EMBEDDING_DIMENSION, Embedder};
use crate::error::{RecallError, Result};

/// Version tag written by [`MockEmbedder`]
pub const MOCK_MODEL_VERSION: &str = "mock-v1";

/// Bag-of-words embedder: each lowercase word is hashed into one of 384
/// buckets and the vector is L2-normalized. Texts sharing words have a
/// positive cosine similarity; the same text always maps to the same vector.
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dimension: usize,
    version: String,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: EMBEDDING_DIMENSION,
            version: MOCK_MODEL_VERSION.to_string(),
        }
    }

    /// Same vectors under a different version tag
    pub fn with_version(version: &str) -> Self {
        Self {
            version: version.to_string(),
            ..Self::new()
        }
    }

    /// Produce vectors of the wrong size, for dimension checks
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::new()
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn model_version(&self) -> &str {
        &self.version
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder that is always unavailable
#[derive(Debug, Clone, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RecallError::Embedding("embedding service unavailable".to_string()))
    }

    fn model_version(&self) -> &str {
        MOCK_MODEL_VERSION
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

/// Extractor answering from scripted rules.
///
/// The first rule whose needle occurs in the text wins; unmatched text
/// yields an empty array. Queued failures are returned before any rule.
#[derive(Default)]
pub struct ScriptedExtractor {
    rules: Vec<(String, Value)>,
    failures: Mutex<VecDeque<CuratorError>>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `output` for any text containing `needle`
    pub fn respond_to(mut self, needle: &str, output: Value) -> Self {
        self.rules.push((needle.to_string(), output));
        self
    }

    /// Fail the next call with `error`
    pub fn fail_next(self, error: CuratorError) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, text: &str, _format: &str) -> std::result::Result<Value, CuratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.failures.lock().ok().and_then(|mut f| f.pop_front());
        if let Some(error) = failure {
            return Err(error);
        }

        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| Value::Array(Vec::new())))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Judge returning fixed scores per criterion
#[derive(Default)]
pub struct ScriptedJudge {
    scores: HashMap<String, f32>,
    unavailable: bool,
    calls: AtomicUsize,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_score(mut self, criterion: &str, score: f32) -> Self {
        self.scores.insert(criterion.to_string(), score);
        self
    }

    /// A judge whose every call fails
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn evaluate(
        &self,
        _text: &str,
        criteria: &[&str],
    ) -> std::result::Result<HashMap<String, f32>, CuratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(CuratorError::Unavailable("scripted judge is offline".to_string()));
        }
        Ok(criteria
            .iter()
            .filter_map(|c| self.scores.get(*c).map(|s| (c.to_string(), *s)))
            .collect())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

//! Collaborator traits for fact extraction and judgment
//!
//! The consolidation pipeline only sees these traits; the remote API
//! client and the scripted test doubles both implement them.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::curator::types::CuratorError;

/// Output format requested from the extractor for fact extraction
pub const TRIPLES_FORMAT: &str = "triples";

/// Turns raw interaction text into structured output
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract structured data from `text` in the requested `format`.
    ///
    /// Returns the raw JSON the collaborator produced; callers coerce it
    /// into typed values and must tolerate any shape.
    async fn extract(&self, text: &str, format: &str) -> Result<Value, CuratorError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// Scores text against named criteria
#[async_trait]
pub trait Judge: Send + Sync {
    /// Score `text` against each criterion (0.0 - 1.0). Criteria the judge
    /// could not score are absent from the map.
    async fn evaluate(
        &self,
        text: &str,
        criteria: &[&str],
    ) -> Result<HashMap<String, f32>, CuratorError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

//! Two-phase memory retrieval
//!
//! 1. Semantic phase: over-fetching vector search filtered by owner, time
//!    window, and embedding model, cut down to the focus level's limit.
//! 2. Expansion phase: breadth-first link traversal from the top seeds,
//!    hydrated and merged behind the semantic results.
//!
//! The merged set is rendered into a text block ranked by importance and
//! recency under a token budget.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::embedding::{Embedder, cosine_similarity, ensure_dimension};
use crate::error::Result;
use crate::memory::focus::{FocusPreset, FocusTable};
use crate::memory::graph::LinkGraph;
use crate::memory::types::{MemoryItem, estimate_tokens};
use crate::storage::LanceStore;
use crate::storage::filter::MemoryFilter;
use crate::storage::lance::SearchMode;

/// Output of a single retrieval
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// Semantic-phase items first, then expansion items; ids are unique
    pub items: Vec<MemoryItem>,
    /// Budgeted text block, most important first
    pub synthesized_text: String,
    /// Approximate tokens in `synthesized_text`
    pub token_estimate: usize,
    /// Items rendered into `synthesized_text`, in rendered order
    pub synthesized_ids: Vec<Uuid>,
    /// How the semantic phase was answered
    pub mode: SearchMode,
    /// Number of items contributed by link expansion
    pub expanded: usize,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|m| m.id).collect()
    }
}

/// A rendered, budgeted block of memory text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Synthesis {
    pub text: String,
    pub token_estimate: usize,
    /// Items that made it under the budget, in rendered order
    pub ids: Vec<Uuid>,
}

/// Rank by importance then recency and render items until `token_budget`
/// would be exceeded. Nothing past the first item that does not fit is kept.
pub fn synthesize(items: &[MemoryItem], token_budget: usize) -> Synthesis {
    let mut ranked: Vec<&MemoryItem> = items.iter().collect();
    ranked.sort_by(|a, b| rank_importance_then_recency(a, b));

    let mut lines = Vec::new();
    let mut ids = Vec::new();
    let mut tokens = 0;
    for item in ranked {
        let line = format!("- {}", item.content);
        let cost = estimate_tokens(&line);
        if tokens + cost > token_budget {
            break;
        }
        tokens += cost;
        lines.push(line);
        ids.push(item.id);
    }

    Synthesis {
        text: lines.join("\n"),
        token_estimate: tokens,
        ids,
    }
}

/// Importance descending, then newest first
pub fn rank_importance_then_recency(a: &MemoryItem, b: &MemoryItem) -> Ordering {
    b.importance
        .total_cmp(&a.importance)
        .then_with(|| b.created_at.cmp(&a.created_at))
}

/// Vector-plus-graph retrieval over one store
pub struct RetrievalEngine {
    store: Arc<LanceStore>,
    embedder: Arc<dyn Embedder>,
    graph: LinkGraph,
    focus: FocusTable,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    /// Build an engine, validating the configured focus table
    pub fn new(
        store: Arc<LanceStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Result<Self> {
        ensure_dimension(embedder.as_ref(), store.dimensions())?;
        let focus = FocusTable::new(config.focus_levels.clone())?;
        let graph = LinkGraph::new(store.clone());
        Ok(Self {
            store,
            embedder,
            graph,
            focus,
            config,
        })
    }

    pub fn focus(&self, level: usize) -> FocusPreset {
        self.focus.resolve(level)
    }

    /// Retrieve memories for `owner_id` relevant to `query_text`.
    ///
    /// An unavailable embedder or a vector of the wrong dimension degrades
    /// to keyword search. Store failures are returned to the caller.
    pub async fn retrieve(
        &self,
        query_text: &str,
        owner_id: &str,
        focus_level: usize,
    ) -> Result<RetrievalResult> {
        let preset = self.focus.resolve(focus_level);
        let query_embedding = self.embed_query(query_text).await;

        let mut filter = MemoryFilter::new()
            .with_owner(owner_id)
            .with_embedding_model(self.embedder.model_version());
        if let Some(since) = Utc::now().checked_sub_signed(preset.time_window()) {
            filter = filter.since(since);
        }

        let fetch_limit = preset
            .result_limit
            .saturating_mul(self.config.over_fetch_factor);
        let results = self
            .store
            .search(query_text, query_embedding.as_deref(), &filter, fetch_limit)
            .await?;
        let mode = results.mode;
        if results.is_degraded() {
            warn!("Retrieval for owner {owner_id} running in degraded keyword mode");
        }

        let mut semantic = results.memories;
        if let (SearchMode::Vector, Some(query)) = (mode, query_embedding.as_deref()) {
            let floor = self.config.min_similarity;
            semantic.retain(|m| cosine_similarity(query, &m.embedding) >= floor);
        }
        semantic.truncate(preset.result_limit);

        let mut seen: HashSet<Uuid> = HashSet::with_capacity(semantic.len());
        let mut items: Vec<MemoryItem> = Vec::with_capacity(semantic.len());
        for item in semantic {
            if seen.insert(item.id) {
                items.push(item);
            }
        }
        let semantic_count = items.len();

        let expansion_ids = self.expand(&items, preset.link_depth, &seen).await;
        if !expansion_ids.is_empty() {
            match self.store.get_by_ids(&expansion_ids).await {
                Ok(hydrated) => {
                    for item in hydrated {
                        if item.owner_id == owner_id && seen.insert(item.id) {
                            items.push(item);
                        }
                    }
                }
                Err(e) => warn!("Failed to hydrate expanded memories: {e}"),
            }
        }
        let expanded = items.len() - semantic_count;

        let synthesis = synthesize(&items, self.config.synthesis_token_budget);

        debug!(
            "Retrieved {} memories ({} expanded) at focus level {focus_level}, ~{} tokens",
            items.len(),
            expanded,
            synthesis.token_estimate
        );

        Ok(RetrievalResult {
            items,
            synthesized_text: synthesis.text,
            token_estimate: synthesis.token_estimate,
            synthesized_ids: synthesis.ids,
            mode,
            expanded,
        })
    }

    async fn embed_query(&self, query_text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(query_text).await {
            Ok(embedding) if embedding.len() == self.store.dimensions() => Some(embedding),
            Ok(embedding) => {
                warn!(
                    "Query embedding has {} dimensions, store expects {}; using keyword search",
                    embedding.len(),
                    self.store.dimensions()
                );
                None
            }
            Err(e) => {
                warn!("Embedding unavailable, using keyword search: {e}");
                None
            }
        }
    }

    /// Ids reachable from the top seeds, minus `exclude`, capped overall
    async fn expand(&self, seeds: &[MemoryItem], depth: usize, exclude: &HashSet<Uuid>) -> Vec<Uuid> {
        let mut ids = Vec::new();
        if depth == 0 {
            return ids;
        }

        let mut collected: HashSet<Uuid> = HashSet::new();
        for seed in seeds.iter().take(self.config.expansion_seeds) {
            let related = match self
                .graph
                .related(seed.id, depth, self.config.max_expansion_nodes)
                .await
            {
                Ok(related) => related,
                Err(e) => {
                    warn!("Link expansion from {} failed: {e}", seed.id);
                    continue;
                }
            };

            let mut related: Vec<Uuid> = related.into_iter().collect();
            related.sort();
            for id in related {
                if exclude.contains(&id) || !collected.insert(id) {
                    continue;
                }
                ids.push(id);
                if ids.len() >= self.config.max_expansion_total {
                    return ids;
                }
            }
        }

        ids
    }
}

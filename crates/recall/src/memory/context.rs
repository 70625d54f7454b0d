//! Context assembly for the interactive path
//!
//! Builds the block of context offered to the model from three sources:
//! the pinned core identity, retrieved long-term memories, and the
//! session's working memory. After a response, the interaction is
//! appended as a raw episodic memory and background consolidation is
//! enqueued. The interactive path never writes semantic memories.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ContextConfig;
use crate::curator::QuestionBook;
use crate::curator::payload::{ExtractFactsParams, ReflectParams, TaskPayload};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::memory::retrieval::{RetrievalEngine, RetrievalResult};
use crate::memory::types::{MemoryCategory, MemoryItem, estimate_tokens};
use crate::queue::TaskQueue;
use crate::storage::LanceStore;
use crate::storage::lance::SearchMode;

/// Tag applied to raw interaction records
pub const INTERACTION_TAG: &str = "interaction";

/// Importance given to working-memory entries pushed without one
pub const DEFAULT_WORKING_IMPORTANCE: f32 = 0.7;

/// Importance of raw episodic interaction records
const EPISODIC_IMPORTANCE: f32 = 0.5;

/// Speaker of a working-memory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One entry of a session's working memory
#[derive(Debug, Clone)]
pub struct WorkingEntry {
    pub role: Role,
    pub content: String,
    pub importance: f32,
    pub timestamp: DateTime<Utc>,
}

impl WorkingEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            importance: DEFAULT_WORKING_IMPORTANCE,
            timestamp: Utc::now(),
        }
    }

    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    fn render(&self) -> String {
        format!("[{}] {}", self.role.as_str(), self.content)
    }
}

/// Bounded, per-session buffer of recent entries. Not persisted; the oldest
/// entry is evicted once `max_entries` is exceeded.
#[derive(Debug, Clone)]
pub struct WorkingMemory {
    entries: VecDeque<WorkingEntry>,
    max_entries: usize,
}

impl WorkingMemory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(64)),
            max_entries,
        }
    }

    pub fn from_config(config: &ContextConfig) -> Self {
        Self::new(config.working_memory_max_entries)
    }

    pub fn push(&mut self, entry: WorkingEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &WorkingEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Context returned to the interactive caller
#[derive(Debug, Clone, Default)]
pub struct ContextPayload {
    pub text: String,
    pub token_estimate: usize,
    /// Long-term memories rendered into `text`
    pub memory_ids: Vec<Uuid>,
    /// Search mode of the retrieval, `None` when retrieval failed
    pub mode: Option<SearchMode>,
}

impl ContextPayload {
    /// True when memories came from keyword search or could not be fetched
    pub fn is_degraded(&self) -> bool {
        self.mode != Some(SearchMode::Vector)
    }
}

/// Ids of what `record_interaction` wrote and enqueued
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionReceipt {
    /// The episodic memory, absent when the text could not be embedded
    pub memory_id: Option<Uuid>,
    pub extract_task: Uuid,
    pub reflect_task: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Section {
    Identity,
    Memories,
    Working,
}

impl Section {
    fn heading(&self) -> &'static str {
        match self {
            Section::Identity => "## Core identity",
            Section::Memories => "## Relevant memories",
            Section::Working => "## Working memory",
        }
    }
}

struct Segment {
    section: Section,
    text: String,
    importance: f32,
    timestamp: DateTime<Utc>,
    memory_id: Option<Uuid>,
}

/// Front door of the interactive path
pub struct ContextAssembler {
    retrieval: Arc<RetrievalEngine>,
    store: Arc<LanceStore>,
    embedder: Arc<dyn Embedder>,
    queue: TaskQueue,
    questions: QuestionBook,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        store: Arc<LanceStore>,
        embedder: Arc<dyn Embedder>,
        queue: TaskQueue,
        config: ContextConfig,
    ) -> Self {
        let questions = QuestionBook::new(store.clone());
        Self {
            retrieval,
            store,
            embedder,
            queue,
            questions,
            config,
        }
    }

    /// A fresh working-memory buffer sized from configuration
    pub fn working_memory(&self) -> WorkingMemory {
        WorkingMemory::from_config(&self.config)
    }

    /// Assemble context for `query`. Never fails: a retrieval error leaves
    /// the memory section empty.
    pub async fn build_context(
        &self,
        query: &str,
        owner_id: &str,
        focus_level: usize,
        working: &WorkingMemory,
        token_budget: usize,
    ) -> ContextPayload {
        let retrieved = match self.retrieval.retrieve(query, owner_id, focus_level).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Retrieval failed for owner {owner_id}, continuing without memories: {e}");
                None
            }
        };

        let mut segments = Vec::new();
        let identity = self.config.core_identity.trim();
        if !identity.is_empty() {
            segments.push(Segment {
                section: Section::Identity,
                text: identity.to_string(),
                importance: 1.0,
                timestamp: Utc::now(),
                memory_id: None,
            });
        }
        if let Some(result) = &retrieved {
            segments.extend(memory_segments(result));
        }
        segments.extend(working.entries().map(|entry| Segment {
            section: Section::Working,
            text: entry.render(),
            importance: entry.importance,
            timestamp: entry.timestamp,
            memory_id: None,
        }));

        let mut payload = assemble(segments, token_budget);
        payload.mode = retrieved.map(|r| r.mode);
        debug!(
            "Built context for owner {owner_id}: {} memories, ~{} tokens",
            payload.memory_ids.len(),
            payload.token_estimate
        );
        payload
    }

    /// Append `text` as a raw episodic memory and enqueue its consolidation
    pub async fn record_interaction(&self, owner_id: &str, text: &str) -> Result<InteractionReceipt> {
        let memory_id = match self.embedder.embed(text).await {
            Ok(embedding) => {
                let memory = MemoryItem::new(
                    owner_id,
                    text,
                    embedding,
                    self.embedder.model_version(),
                    MemoryCategory::Episodic,
                )
                .with_importance(EPISODIC_IMPORTANCE)
                .with_tags([INTERACTION_TAG]);
                Some(self.store.insert(&memory).await?)
            }
            Err(e) => {
                warn!("Could not embed interaction for owner {owner_id}, skipping episodic record: {e}");
                None
            }
        };
        let interaction_id = memory_id.unwrap_or_else(Uuid::new_v4);

        let extract = TaskPayload::ExtractFacts(ExtractFactsParams {
            owner_id: Some(owner_id.to_string()),
            text: text.to_string(),
            source_id: memory_id,
            interaction_id: Some(interaction_id.to_string()),
        });
        let extract_task = self.queue.enqueue(extract.kind(), extract.to_value(), None).await?;

        let mut reflect_task = None;
        if self.config.enqueue_reflect && self.questions.has_open(owner_id).await? {
            let reflect = TaskPayload::Reflect(ReflectParams {
                owner_id: Some(owner_id.to_string()),
                text: Some(text.to_string()),
                source_id: memory_id,
            });
            reflect_task = Some(self.queue.enqueue(reflect.kind(), reflect.to_value(), None).await?);
        }

        info!(
            "Recorded interaction for owner {owner_id} (extract task {extract_task}{})",
            if reflect_task.is_some() { ", reflect queued" } else { "" }
        );
        Ok(InteractionReceipt {
            memory_id,
            extract_task,
            reflect_task,
        })
    }

    /// Run `record_interaction` in the background
    pub fn schedule_consolidation(
        self: &Arc<Self>,
        owner_id: &str,
        text: &str,
    ) -> JoinHandle<Option<InteractionReceipt>> {
        let assembler = Arc::clone(self);
        let owner_id = owner_id.to_string();
        let text = text.to_string();
        tokio::spawn(async move {
            match assembler.record_interaction(&owner_id, &text).await {
                Ok(receipt) => Some(receipt),
                Err(e) => {
                    warn!("Failed to record interaction for owner {owner_id}: {e}");
                    None
                }
            }
        })
    }
}

/// Join a user message and the assistant's reply into one interaction record
pub fn format_exchange(user: &str, assistant: &str) -> String {
    format!("User: {}\nAssistant: {}", user.trim(), assistant.trim())
}

fn memory_segments(result: &RetrievalResult) -> Vec<Segment> {
    result
        .synthesized_ids
        .iter()
        .filter_map(|id| result.items.iter().find(|m| m.id == *id))
        .map(|item| Segment {
            section: Section::Memories,
            text: format!("- {}", item.content),
            importance: item.importance,
            timestamp: item.created_at,
            memory_id: Some(item.id),
        })
        .collect()
}

/// Keep segments by importance then recency until the budget is spent,
/// then render the kept ones grouped by section.
fn assemble(mut segments: Vec<Segment>, token_budget: usize) -> ContextPayload {
    segments.sort_by(|a, b| {
        b.importance
            .total_cmp(&a.importance)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
    });

    // Rendered length in bytes: every line plus its newline, and for each
    // section its heading and the blank line separating it from the previous one
    let mut kept: Vec<Segment> = Vec::new();
    let mut rendered = 0;
    for segment in segments {
        let mut cost = segment.text.len() + 1;
        if !kept.iter().any(|s| s.section == segment.section) {
            cost += segment.section.heading().len();
            if !kept.is_empty() {
                cost += 2;
            }
        }
        if (rendered + cost).div_ceil(4) > token_budget {
            break;
        }
        rendered += cost;
        kept.push(segment);
    }

    // Stable sort keeps the ranking inside each section
    kept.sort_by_key(|s| s.section);
    // Working memory reads in conversation order
    if let Some(start) = kept.iter().position(|s| s.section == Section::Working) {
        kept[start..].sort_by_key(|s| s.timestamp);
    }

    let mut text = String::new();
    let mut current = None;
    for segment in &kept {
        if current != Some(segment.section) {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(segment.section.heading());
            current = Some(segment.section);
        }
        text.push('\n');
        text.push_str(&segment.text);
    }

    ContextPayload {
        token_estimate: estimate_tokens(&text),
        text,
        memory_ids: kept.iter().filter_map(|s| s.memory_id).collect(),
        mode: None,
    }
}

//! Memory types for the Recall system
//!
//! Defines the stored memory record, its category, and the typed links
//! that connect memories into a graph.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single memory record stored in the Recall system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique identifier, assigned once at creation
    pub id: Uuid,
    /// Owner (user or agent) this memory belongs to
    pub owner_id: String,
    /// The actual content of the memory
    pub content: String,
    /// Vector embedding of `content`
    pub embedding: Vec<f32>,
    /// Version tag of the model that produced `embedding`
    pub embedding_model: String,
    /// Classification of what kind of memory this is
    pub category: MemoryCategory,
    /// Importance score (0.0 - 1.0)
    pub importance: f32,
    /// Optional emotional valence annotation (-1.0 - 1.0)
    pub emotion_valence: Option<f32>,
    /// Optional emotional intensity annotation (0.0 - 1.0)
    pub emotion_intensity: Option<f32>,
    /// When this memory was created
    pub created_at: DateTime<Utc>,
    /// Free-form tags
    pub tags: BTreeSet<String>,
    /// Outgoing link targets (cache of the links table)
    pub linked_ids: BTreeSet<Uuid>,
}

impl MemoryItem {
    /// Create a new memory with default annotations
    pub fn new(
        owner_id: impl Into<String>,
        content: impl Into<String>,
        embedding: Vec<f32>,
        embedding_model: impl Into<String>,
        category: MemoryCategory,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            content: content.into(),
            embedding,
            embedding_model: embedding_model.into(),
            category,
            importance: 0.5,
            emotion_valence: None,
            emotion_intensity: None,
            created_at: Utc::now(),
            tags: BTreeSet::new(),
            linked_ids: BTreeSet::new(),
        }
    }

    /// Set the importance, clamped to 0.0 - 1.0
    pub fn with_importance(mut self, importance: f32) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    /// Add tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Attach emotion annotations
    pub fn with_emotion(mut self, valence: f32, intensity: f32) -> Self {
        self.emotion_valence = Some(valence.clamp(-1.0, 1.0));
        self.emotion_intensity = Some(intensity.clamp(0.0, 1.0));
        self
    }

    /// Override the creation timestamp (imports, tests)
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Rough token estimate of the content (chars / 4)
    pub fn estimate_tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

/// Approximate token count using the chars/4 heuristic
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Closed set of memory categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// What happened (raw interactions)
    Episodic,
    /// Validated facts and knowledge
    Semantic,
    /// A persisted snapshot of working memory
    WorkingSnapshot,
}

impl MemoryCategory {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryCategory::Episodic => "episodic",
            MemoryCategory::Semantic => "semantic",
            MemoryCategory::WorkingSnapshot => "working_snapshot",
        }
    }

    /// Parse the storage representation
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "episodic" => Some(MemoryCategory::Episodic),
            "semantic" => Some(MemoryCategory::Semantic),
            "working_snapshot" => Some(MemoryCategory::WorkingSnapshot),
            _ => None,
        }
    }
}

/// Relationship carried by a link
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkType {
    RelatesTo,
    Contradicts,
    Resolves,
    DerivedFrom,
    Other(String),
}

impl LinkType {
    pub fn as_str(&self) -> &str {
        match self {
            LinkType::RelatesTo => "relates_to",
            LinkType::Contradicts => "contradicts",
            LinkType::Resolves => "resolves",
            LinkType::DerivedFrom => "derived_from",
            LinkType::Other(name) => name.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "relates_to" => LinkType::RelatesTo,
            "contradicts" => LinkType::Contradicts,
            "resolves" => LinkType::Resolves,
            "derived_from" => LinkType::DerivedFrom,
            other => LinkType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed, typed edge between two memories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from_id: Uuid,
    pub to_id: Uuid,
    pub link_type: LinkType,
    pub created_at: DateTime<Utc>,
}

impl Link {
    pub fn new(from_id: Uuid, to_id: Uuid, link_type: LinkType) -> Self {
        Self {
            from_id,
            to_id,
            link_type,
            created_at: Utc::now(),
        }
    }

    /// The endpoint opposite to `id`, if `id` is one of the endpoints
    pub fn other_end(&self, id: Uuid) -> Option<Uuid> {
        if self.from_id == id {
            Some(self.to_id)
        } else if self.to_id == id {
            Some(self.from_id)
        } else {
            None
        }
    }

    pub fn is_self_loop(&self) -> bool {
        self.from_id == self.to_id
    }
}

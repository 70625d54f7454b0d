//! Unresolved questions tracked per owner
//!
//! Questions are raised by the application (something the agent could not
//! answer yet) and resolved by `reflect` tasks once new information
//! answers them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::storage::LanceStore;
use crate::storage::records::RecordFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Open,
    Resolved,
}

impl QuestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionStatus::Open => "open",
            QuestionStatus::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenQuestion {
    pub id: Uuid,
    pub owner_id: String,
    pub question: String,
    /// Memory the question was raised in, if any
    pub source_id: Option<Uuid>,
    pub status: QuestionStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Summary memory written on resolution
    pub resolution_id: Option<Uuid>,
    pub resolution_score: Option<f32>,
}

/// Question records in the store's `questions` table
#[derive(Clone)]
pub struct QuestionBook {
    store: Arc<LanceStore>,
}

impl QuestionBook {
    pub fn new(store: Arc<LanceStore>) -> Self {
        Self { store }
    }

    /// Record a new open question
    pub async fn add(
        &self,
        owner_id: &str,
        question: &str,
        source_id: Option<Uuid>,
    ) -> Result<OpenQuestion> {
        let record = OpenQuestion {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            question: question.trim().to_string(),
            source_id,
            status: QuestionStatus::Open,
            created_at: Utc::now(),
            resolved_at: None,
            resolution_id: None,
            resolution_score: None,
        };
        self.save(&record).await?;
        Ok(record)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<OpenQuestion>> {
        self.store.questions().get(&id.to_string()).await
    }

    /// Unresolved questions for `owner_id`, oldest first
    pub async fn open(&self, owner_id: &str) -> Result<Vec<OpenQuestion>> {
        let filter = RecordFilter::new()
            .with_owner(owner_id)
            .with_statuses([QuestionStatus::Open.as_str()]);
        let mut questions: Vec<OpenQuestion> = self.store.questions().list(&filter).await?;
        questions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(questions)
    }

    pub async fn has_open(&self, owner_id: &str) -> Result<bool> {
        Ok(!self.open(owner_id).await?.is_empty())
    }

    /// Mark `question` resolved by the summary memory `resolution_id`
    pub async fn resolve(
        &self,
        question: &OpenQuestion,
        resolution_id: Uuid,
        score: f32,
    ) -> Result<OpenQuestion> {
        let mut resolved = question.clone();
        resolved.status = QuestionStatus::Resolved;
        resolved.resolved_at = Some(Utc::now());
        resolved.resolution_id = Some(resolution_id);
        resolved.resolution_score = Some(score);
        self.save(&resolved).await?;
        Ok(resolved)
    }

    async fn save(&self, question: &OpenQuestion) -> Result<()> {
        self.store
            .questions()
            .upsert(
                &question.id.to_string(),
                &question.owner_id,
                question.status.as_str(),
                question,
            )
            .await
    }
}

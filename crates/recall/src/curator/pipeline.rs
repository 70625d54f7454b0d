//! Background consolidation
//!
//! Handles the `extract_facts`, `consolidate`, and `reflect` tasks. This is
//! the only writer of semantic memories and of the links between them.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConsolidationConfig;
use crate::curator::gate::{QualityGate, StagedFact, StagedStatus};
use crate::curator::payload::{ExtractFactsParams, ReflectParams, TaskPayload};
use crate::curator::provider::{Extractor, Judge, TRIPLES_FORMAT};
use crate::curator::questions::{OpenQuestion, QuestionBook, QuestionStatus};
use crate::curator::types::{Triple, coerce_triples};
use crate::embedding::Embedder;
use crate::error::{RecallError, Result};
use crate::memory::types::{Link, LinkType, MemoryCategory, MemoryItem};
use crate::queue::{Task, TaskHandler};
use crate::storage::LanceStore;
use crate::storage::records::RecordFilter;

/// Tag carried by summaries written when a question is resolved
pub const RESOLVED_QUESTION_TAG: &str = "resolved_question";
/// Tag carried by every promoted fact
pub const FACT_TAG: &str = "fact";

const PLAUSIBILITY: &str = "plausibility";
const ANSWERED: &str = "answered";
/// Promoted facts used as reflection input when a task carries no text
const REFLECT_CONTEXT_FACTS: usize = 20;
/// Characters of new information quoted in a resolution summary
const SUMMARY_ANSWER_CHARS: usize = 500;

/// Counts from one `extract_facts` run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionReport {
    pub extracted: usize,
    pub staged: usize,
    pub promoted: usize,
}

pub struct ConsolidationPipeline {
    store: Arc<LanceStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    judge: Arc<dyn Judge>,
    questions: QuestionBook,
    gate: QualityGate,
    config: ConsolidationConfig,
    // Serializes read-modify-write of staged facts and question records
    staging: Mutex<()>,
}

impl ConsolidationPipeline {
    pub fn new(
        store: Arc<LanceStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
        judge: Arc<dyn Judge>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            questions: QuestionBook::new(store.clone()),
            gate: QualityGate::from_config(&config),
            store,
            embedder,
            extractor,
            judge,
            config,
            staging: Mutex::new(()),
        }
    }

    pub fn gate(&self) -> QualityGate {
        self.gate
    }

    pub fn questions(&self) -> &QuestionBook {
        &self.questions
    }

    /// Staged facts for `owner_id`, optionally only those in `status`
    pub async fn staged_facts(
        &self,
        owner_id: &str,
        status: Option<StagedStatus>,
    ) -> Result<Vec<StagedFact>> {
        let mut filter = RecordFilter::new().with_owner(owner_id);
        if let Some(status) = status {
            filter = filter.with_statuses([status.as_str()]);
        }
        self.store.staged_facts().list(&filter).await
    }

    fn owner_or_default(&self, owner_id: Option<String>) -> String {
        owner_id.unwrap_or_else(|| self.config.default_owner_id.clone())
    }

    /// Extract triples from interaction text, stage them, and promote any
    /// that pass the quality gate.
    pub async fn extract_facts(
        &self,
        params: ExtractFactsParams,
        fallback_interaction: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractionReport> {
        let mut report = ExtractionReport::default();
        if params.text.trim().is_empty() {
            debug!("Nothing to extract from empty interaction");
            return Ok(report);
        }

        check_cancelled(cancel)?;
        let raw = self.extractor.extract(&params.text, TRIPLES_FORMAT).await?;
        let triples = coerce_triples(&raw, self.config.fallback_confidence);
        report.extracted = triples.len();
        if triples.is_empty() {
            debug!("Extractor {} found no triples", self.extractor.name());
            return Ok(report);
        }

        let owner_id = self.owner_or_default(params.owner_id);
        let interaction = params
            .interaction_id
            .or_else(|| params.source_id.map(|id| id.to_string()))
            .unwrap_or_else(|| fallback_interaction.to_string());

        for triple in &triples {
            check_cancelled(cancel)?;
            let _guard = self.staging.lock().await;

            let mut fact = self.load_or_stage(&owner_id, triple).await?;
            fact.observe(triple, &interaction, params.source_id);
            report.staged += 1;

            if !fact.is_promoted() && self.gate.passes(&fact) {
                self.promote(&mut fact).await?;
                report.promoted += 1;
            } else {
                self.save_fact(&fact).await?;
            }
        }

        info!(
            "Extracted {} triples for {owner_id}: {} staged, {} promoted",
            report.extracted, report.staged, report.promoted
        );
        Ok(report)
    }

    /// Re-check pending facts, asking the judge for a plausibility score
    /// that may lift their confidence over the gate. Returns promotions.
    pub async fn consolidate(&self, owner_id: &str, cancel: &CancellationToken) -> Result<usize> {
        let pending = self
            .staged_facts(owner_id, Some(StagedStatus::Pending))
            .await?;
        let mut promoted = 0;

        for candidate in pending {
            check_cancelled(cancel)?;
            let plausibility = if self.gate.passes(&candidate) {
                None
            } else {
                let scores = self
                    .judge
                    .evaluate(&candidate.statement(), &[PLAUSIBILITY])
                    .await?;
                match scores.get(PLAUSIBILITY) {
                    Some(score) => Some(*score),
                    None => {
                        warn!(
                            "Judge {} returned no plausibility for '{}'",
                            self.judge.name(),
                            candidate.statement()
                        );
                        continue;
                    }
                }
            };

            let _guard = self.staging.lock().await;
            let Some(mut fact) = self
                .store
                .staged_facts()
                .get::<StagedFact>(&candidate.key)
                .await?
            else {
                continue;
            };
            if fact.is_promoted() {
                continue;
            }
            if let Some(score) = plausibility {
                fact.max_confidence = fact.max_confidence.max(score);
            }

            if self.gate.passes(&fact) {
                self.promote(&mut fact).await?;
                promoted += 1;
            } else {
                self.save_fact(&fact).await?;
            }
        }

        if promoted > 0 {
            info!("Consolidation promoted {promoted} facts for {owner_id}");
        }
        Ok(promoted)
    }

    /// Test open questions against new information and resolve those the
    /// judge considers answered. Returns how many were resolved.
    pub async fn reflect(&self, params: ReflectParams, cancel: &CancellationToken) -> Result<usize> {
        let owner_id = self.owner_or_default(params.owner_id);
        let questions = self.questions.open(&owner_id).await?;
        if questions.is_empty() {
            return Ok(0);
        }

        let information = match params.text.filter(|t| !t.trim().is_empty()) {
            Some(text) => text,
            None => self.recent_fact_summary(&owner_id).await?,
        };
        if information.is_empty() {
            debug!("No new information to reflect on for {owner_id}");
            return Ok(0);
        }

        let mut resolved = 0;
        for question in questions {
            check_cancelled(cancel)?;
            let prompt = format!(
                "Question: {}\n\nNew information:\n{}",
                question.question, information
            );
            let scores = self.judge.evaluate(&prompt, &[ANSWERED]).await?;
            let Some(score) = scores.get(ANSWERED).copied() else {
                warn!(
                    "Judge {} returned no answered score for question {}",
                    self.judge.name(),
                    question.id
                );
                continue;
            };

            if score < self.config.reflect_threshold {
                debug!("Question {} still open (score {score:.2})", question.id);
                continue;
            }

            check_cancelled(cancel)?;
            if self
                .resolve_question(&question, &information, score, params.source_id)
                .await?
            {
                resolved += 1;
            }
        }

        Ok(resolved)
    }

    async fn resolve_question(
        &self,
        question: &OpenQuestion,
        information: &str,
        score: f32,
        source_id: Option<Uuid>,
    ) -> Result<bool> {
        let _guard = self.staging.lock().await;
        let current = self.questions.get(question.id).await?;
        if current.is_none_or(|q| q.status != QuestionStatus::Open) {
            return Ok(false);
        }

        let answer: String = information.chars().take(SUMMARY_ANSWER_CHARS).collect();
        let content = format!("Q: {}\nA: {}", question.question, answer);
        let embedding = self.embedder.embed(&content).await?;
        let summary = MemoryItem::new(
            &question.owner_id,
            content,
            embedding,
            self.embedder.model_version(),
            MemoryCategory::Semantic,
        )
        .with_importance(score)
        .with_tags([RESOLVED_QUESTION_TAG]);

        self.store.insert(&summary).await?;
        self.questions.resolve(question, summary.id, score).await?;

        if let Some(asked_in) = question.source_id {
            self.link_best_effort(Link::new(summary.id, asked_in, LinkType::Resolves))
                .await;
        }
        if let Some(source_id) = source_id {
            self.link_best_effort(Link::new(summary.id, source_id, LinkType::DerivedFrom))
                .await;
        }

        info!(
            "Resolved question {} for {} (score {score:.2})",
            question.id, question.owner_id
        );
        Ok(true)
    }

    async fn recent_fact_summary(&self, owner_id: &str) -> Result<String> {
        let mut facts = self
            .staged_facts(owner_id, Some(StagedStatus::Promoted))
            .await?;
        facts.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(facts
            .iter()
            .take(REFLECT_CONTEXT_FACTS)
            .map(StagedFact::statement)
            .collect::<Vec<_>>()
            .join("\n"))
    }

    async fn load_or_stage(&self, owner_id: &str, triple: &Triple) -> Result<StagedFact> {
        let key = StagedFact::key_for(owner_id, triple);
        let existing = self.store.staged_facts().get::<StagedFact>(&key).await?;
        Ok(existing.unwrap_or_else(|| StagedFact::new(owner_id, triple)))
    }

    async fn save_fact(&self, fact: &StagedFact) -> Result<()> {
        self.store
            .staged_facts()
            .upsert(&fact.key, &fact.owner_id, fact.status.as_str(), fact)
            .await
    }

    /// Write the fact as a semantic memory and link it into the graph.
    ///
    /// The staged record is marked promoted right after the memory insert so
    /// a retried task never promotes it twice; link failures are logged.
    async fn promote(&self, fact: &mut StagedFact) -> Result<Uuid> {
        let subject_tag = fact.subject_tag();
        let predicate_tag = fact.predicate_tag();

        let related = self
            .store
            .find_by_tag(
                &fact.owner_id,
                &subject_tag,
                Some(MemoryCategory::Semantic),
                self.config.max_related_links,
            )
            .await?;

        let content = fact.statement();
        let embedding = self.embedder.embed(&content).await?;
        let memory = MemoryItem::new(
            &fact.owner_id,
            content,
            embedding,
            self.embedder.model_version(),
            MemoryCategory::Semantic,
        )
        .with_importance(fact.max_confidence)
        .with_tags([FACT_TAG.to_string(), subject_tag, predicate_tag.clone()]);

        let id = self.store.insert(&memory).await?;
        fact.status = StagedStatus::Promoted;
        fact.promoted_id = Some(id);
        self.save_fact(fact).await?;

        for source_id in &fact.source_ids {
            self.link_best_effort(Link::new(id, *source_id, LinkType::DerivedFrom))
                .await;
        }
        for other in related {
            let link_type = if other.tags.contains(&predicate_tag) {
                LinkType::Contradicts
            } else {
                LinkType::RelatesTo
            };
            self.link_best_effort(Link::new(id, other.id, link_type)).await;
        }

        info!("Promoted fact '{}' for {}", fact.statement(), fact.owner_id);
        Ok(id)
    }

    async fn link_best_effort(&self, link: Link) {
        if let Err(e) = self.store.insert_link(&link).await {
            warn!(
                "Failed to link {} -[{}]-> {}: {e}",
                link.from_id, link.link_type, link.to_id
            );
        }
    }
}

#[async_trait]
impl TaskHandler for ConsolidationPipeline {
    async fn run(&self, task: &Task, cancel: &CancellationToken) -> Result<()> {
        let payload = TaskPayload::from_value(&task.name, &task.parameters);
        if matches!(payload, TaskPayload::Legacy { .. }) {
            warn!("Task {} ({}) has legacy string parameters", task.id, task.name);
        }

        match payload.upgrade_legacy() {
            TaskPayload::ExtractFacts(params) => {
                self.extract_facts(params, &task.id.to_string(), cancel)
                    .await?;
            }
            TaskPayload::Reflect(params) => {
                self.reflect(params, cancel).await?;
            }
            TaskPayload::Consolidate(params) => {
                let owner_id = self.owner_or_default(params.owner_id);
                self.consolidate(&owner_id, cancel).await?;
            }
            TaskPayload::Malformed { kind, reason } => {
                warn!("Skipping task {} ({kind}) with unreadable parameters: {reason}", task.id);
            }
            TaskPayload::Legacy { kind, .. } => {
                warn!("Skipping task {} ({kind}): no legacy conversion", task.id);
            }
        }
        Ok(())
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(RecallError::Cancelled);
    }
    Ok(())
}

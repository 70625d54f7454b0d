//! Staged facts and the promotion quality gate
//!
//! Extracted triples are staged in their own table, keyed by the
//! normalized (owner, subject, predicate, object). They only become
//! semantic memories once the gate passes, so pending facts are invisible
//! to retrieval and link traversal.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ConsolidationConfig;
use crate::curator::types::Triple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagedStatus {
    Pending,
    Promoted,
}

impl StagedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StagedStatus::Pending => "pending",
            StagedStatus::Promoted => "promoted",
        }
    }
}

/// A triple waiting for (or past) promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedFact {
    pub key: String,
    pub owner_id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// Highest confidence seen across extractions and judgments
    pub max_confidence: f32,
    /// Distinct interactions the triple was extracted from
    pub interactions: BTreeSet<String>,
    /// Episodic memories the triple was extracted from
    pub source_ids: BTreeSet<Uuid>,
    pub status: StagedStatus,
    pub promoted_id: Option<Uuid>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl StagedFact {
    pub fn new(owner_id: &str, triple: &Triple) -> Self {
        let now = Utc::now();
        Self {
            key: Self::key_for(owner_id, triple),
            owner_id: owner_id.to_string(),
            subject: triple.subject.clone(),
            predicate: triple.predicate.clone(),
            object: triple.object.clone(),
            max_confidence: triple.confidence,
            interactions: BTreeSet::new(),
            source_ids: BTreeSet::new(),
            status: StagedStatus::Pending,
            promoted_id: None,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Storage key: owner and normalized parts joined by a unit separator
    pub fn key_for(owner_id: &str, triple: &Triple) -> String {
        [
            owner_id.to_string(),
            normalize(&triple.subject),
            normalize(&triple.predicate),
            normalize(&triple.object),
        ]
        .join("\u{1f}")
    }

    /// Record another extraction of the same triple. Re-observing within
    /// one interaction does not raise the occurrence count.
    pub fn observe(&mut self, triple: &Triple, interaction_id: &str, source_id: Option<Uuid>) {
        self.max_confidence = self.max_confidence.max(triple.confidence);
        self.interactions.insert(interaction_id.to_string());
        if let Some(source_id) = source_id {
            self.source_ids.insert(source_id);
        }
        self.last_seen = Utc::now();
    }

    pub fn occurrences(&self) -> u32 {
        u32::try_from(self.interactions.len()).unwrap_or(u32::MAX)
    }

    pub fn is_promoted(&self) -> bool {
        self.status == StagedStatus::Promoted
    }

    pub fn statement(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }

    /// Tag shared by every promoted fact about this subject
    pub fn subject_tag(&self) -> String {
        format!("subject:{}", normalize(&self.subject))
    }

    /// Tag shared by every promoted fact with this subject and predicate
    pub fn predicate_tag(&self) -> String {
        format!(
            "predicate:{}:{}",
            normalize(&self.subject),
            normalize(&self.predicate)
        )
    }
}

/// Lowercase and collapse whitespace
pub fn normalize(part: &str) -> String {
    part.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Promotion rule: a fact passes when either enabled condition holds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityGate {
    pub min_confidence: Option<f32>,
    pub min_occurrences: Option<u32>,
}

impl QualityGate {
    /// A `min_occurrences` of zero or a `min_confidence` above 1.0 disables
    /// that condition.
    pub fn from_config(config: &ConsolidationConfig) -> Self {
        Self {
            min_confidence: config.min_confidence.filter(|c| *c <= 1.0),
            min_occurrences: config.min_occurrences.filter(|n| *n > 0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.min_confidence.is_some() || self.min_occurrences.is_some()
    }

    pub fn passes(&self, fact: &StagedFact) -> bool {
        let confident = self
            .min_confidence
            .is_some_and(|min| fact.max_confidence >= min);
        let repeated = self
            .min_occurrences
            .is_some_and(|min| fact.occurrences() >= min);
        confident || repeated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(confidence: f32) -> Triple {
        Triple::new("User", "likes", "Python", confidence).unwrap()
    }

    fn gate(min_confidence: Option<f32>, min_occurrences: Option<u32>) -> QualityGate {
        QualityGate {
            min_confidence,
            min_occurrences,
        }
    }

    #[test]
    fn test_key_is_normalized() {
        let a = Triple::new("User", "likes", "Python", 0.5).unwrap();
        let b = Triple::new("  user ", "LIKES", "python", 0.9).unwrap();
        assert_eq!(StagedFact::key_for("u1", &a), StagedFact::key_for("u1", &b));
        assert_ne!(StagedFact::key_for("u1", &a), StagedFact::key_for("u2", &a));
    }

    #[test]
    fn test_confidence_gate() {
        let gate = gate(Some(0.8), None);
        let mut fact = StagedFact::new("u1", &triple(0.6));
        fact.observe(&triple(0.6), "i1", None);
        assert!(!gate.passes(&fact));

        fact.observe(&triple(0.85), "i1", None);
        assert!(gate.passes(&fact));
    }

    #[test]
    fn test_occurrence_gate_counts_distinct_interactions() {
        let gate = gate(None, Some(2));
        let mut fact = StagedFact::new("u1", &triple(0.3));
        fact.observe(&triple(0.3), "i1", None);
        fact.observe(&triple(0.3), "i1", None);
        assert_eq!(fact.occurrences(), 1);
        assert!(!gate.passes(&fact));

        fact.observe(&triple(0.3), "i2", Some(Uuid::new_v4()));
        assert!(gate.passes(&fact));
        assert_eq!(fact.source_ids.len(), 1);
    }

    #[test]
    fn test_either_condition_suffices() {
        let gate = gate(Some(0.8), Some(2));
        let mut confident = StagedFact::new("u1", &triple(0.9));
        confident.observe(&triple(0.9), "i1", None);
        assert!(gate.passes(&confident));
    }

    #[test]
    fn test_from_config_disables_out_of_range() {
        let config = ConsolidationConfig {
            min_confidence: Some(1.5),
            min_occurrences: Some(0),
            ..ConsolidationConfig::default()
        };
        let gate = QualityGate::from_config(&config);
        assert!(!gate.is_enabled());
        assert!(!gate.passes(&StagedFact::new("u1", &triple(1.0))));
    }

    #[test]
    fn test_tags() {
        let fact = StagedFact::new("u1", &Triple::new("The  User", "Lives In", "Berlin", 0.5).unwrap());
        assert_eq!(fact.subject_tag(), "subject:the user");
        assert_eq!(fact.predicate_tag(), "predicate:the user:lives in");
    }
}

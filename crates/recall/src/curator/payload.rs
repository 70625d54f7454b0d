//! Typed task parameters for the consolidation pipeline
//!
//! Task parameters are stored as opaque JSON. They are converted into a
//! `TaskPayload` before use, with explicit variants for bare-string legacy
//! payloads and for anything that cannot be read.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const EXTRACT_FACTS: &str = "extract_facts";
pub const REFLECT: &str = "reflect";
pub const CONSOLIDATE: &str = "consolidate";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractFactsParams {
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(alias = "content")]
    pub text: String,
    /// Episodic memory the text was recorded as
    #[serde(default)]
    pub source_id: Option<Uuid>,
    /// Identity of the interaction, for counting independent occurrences
    #[serde(default)]
    pub interaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectParams {
    #[serde(default)]
    pub owner_id: Option<String>,
    /// New information to test open questions against
    #[serde(default, alias = "content")]
    pub text: Option<String>,
    #[serde(default)]
    pub source_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidateParams {
    #[serde(default)]
    pub owner_id: Option<String>,
}

/// Parameters of a consolidation task, by kind
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    ExtractFacts(ExtractFactsParams),
    Reflect(ReflectParams),
    Consolidate(ConsolidateParams),
    /// Parameters given as a bare string instead of a record
    Legacy { kind: String, text: String },
    /// Unreadable parameters or an unknown task kind
    Malformed { kind: String, reason: String },
}

impl TaskPayload {
    /// Convert stored parameters for a task named `kind`. Never fails.
    pub fn from_value(kind: &str, value: &Value) -> Self {
        let malformed = |reason: String| TaskPayload::Malformed {
            kind: kind.to_string(),
            reason,
        };

        match value {
            Value::String(text) => TaskPayload::Legacy {
                kind: kind.to_string(),
                text: text.clone(),
            },
            Value::Object(_) => match kind {
                EXTRACT_FACTS => serde_json::from_value(value.clone())
                    .map(TaskPayload::ExtractFacts)
                    .unwrap_or_else(|e| malformed(e.to_string())),
                REFLECT => serde_json::from_value(value.clone())
                    .map(TaskPayload::Reflect)
                    .unwrap_or_else(|e| malformed(e.to_string())),
                CONSOLIDATE => serde_json::from_value(value.clone())
                    .map(TaskPayload::Consolidate)
                    .unwrap_or_else(|e| malformed(e.to_string())),
                other => malformed(format!("unknown task kind '{other}'")),
            },
            Value::Null if kind == CONSOLIDATE || kind == REFLECT => {
                Self::from_value(kind, &Value::Object(Default::default()))
            }
            other => malformed(format!("expected an object, got {other}")),
        }
    }

    /// Task name this payload is enqueued under
    pub fn kind(&self) -> &str {
        match self {
            TaskPayload::ExtractFacts(_) => EXTRACT_FACTS,
            TaskPayload::Reflect(_) => REFLECT,
            TaskPayload::Consolidate(_) => CONSOLIDATE,
            TaskPayload::Legacy { kind, .. } | TaskPayload::Malformed { kind, .. } => kind,
        }
    }

    /// Stored form, the inverse of `from_value` for the typed variants
    pub fn to_value(&self) -> Value {
        let value = match self {
            TaskPayload::ExtractFacts(params) => serde_json::to_value(params),
            TaskPayload::Reflect(params) => serde_json::to_value(params),
            TaskPayload::Consolidate(params) => serde_json::to_value(params),
            TaskPayload::Legacy { text, .. } => return Value::String(text.clone()),
            TaskPayload::Malformed { .. } => return Value::Null,
        };
        value.unwrap_or(Value::Null)
    }

    /// Upgrade a legacy bare-string payload into the typed variant for its
    /// kind, treating the string as the text to process.
    pub fn upgrade_legacy(self) -> Self {
        match self {
            TaskPayload::Legacy { kind, text } => match kind.as_str() {
                EXTRACT_FACTS => TaskPayload::ExtractFacts(ExtractFactsParams {
                    owner_id: None,
                    text,
                    source_id: None,
                    interaction_id: None,
                }),
                REFLECT => TaskPayload::Reflect(ReflectParams {
                    owner_id: None,
                    text: Some(text),
                    source_id: None,
                }),
                CONSOLIDATE => TaskPayload::Consolidate(ConsolidateParams { owner_id: None }),
                _ => TaskPayload::Malformed {
                    reason: format!("unknown task kind '{kind}'"),
                    kind,
                },
            },
            other => other,
        }
    }
}

//! Curator types: extracted triples, output coercion, and errors
//!
//! Extractor output arrives in whatever shape the model felt like
//! producing. `coerce_triples` accepts the shapes seen in practice and
//! skips (with a warning) anything it cannot read.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A subject-predicate-object relationship with extraction confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// Extraction confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl Triple {
    /// Build a triple, trimming parts and clamping confidence.
    /// Returns `None` if any part is empty.
    pub fn new(
        subject: impl AsRef<str>,
        predicate: impl AsRef<str>,
        object: impl AsRef<str>,
        confidence: f32,
    ) -> Option<Self> {
        let subject = subject.as_ref().trim();
        let predicate = predicate.as_ref().trim();
        let object = object.as_ref().trim();
        if subject.is_empty() || predicate.is_empty() || object.is_empty() {
            return None;
        }

        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Some(Self {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            confidence,
        })
    }

    /// Plain sentence form used as memory content
    pub fn statement(&self) -> String {
        format!("{} {} {}", self.subject, self.predicate, self.object)
    }
}

/// Curator-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CuratorError {
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for curator operations
pub type Result<T> = std::result::Result<T, CuratorError>;

/// Read triples out of raw extractor output.
///
/// Accepted shapes: an array of `{subject, predicate, object, confidence}`
/// objects (short keys `s`/`p`/`o` also work), `{"triples": [...]}`,
/// `[subject, predicate, object(, confidence)]` arrays, JSON embedded in
/// prose or a code fence, and `subject | predicate | object` lines.
/// Missing confidences take `default_confidence`.
pub fn coerce_triples(value: &Value, default_confidence: f32) -> Vec<Triple> {
    let mut triples = Vec::new();
    collect(value, default_confidence, &mut triples, 0);
    triples
}

// Nested wrappers deeper than this are treated as malformed
const MAX_NESTING: usize = 4;

fn collect(value: &Value, default_confidence: f32, out: &mut Vec<Triple>, depth: usize) {
    if depth > MAX_NESTING {
        warn!("Extractor output nested too deeply, skipping");
        return;
    }

    match value {
        Value::Array(items) => {
            if let Some(triple) = triple_from_array(items, default_confidence) {
                out.push(triple);
                return;
            }
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) | Value::String(_) => {
                        collect(item, default_confidence, out, depth + 1)
                    }
                    other => warn!("Skipping malformed triple entry: {other}"),
                }
            }
        }
        Value::Object(map) => {
            if let Some(inner) = map.get("triples").or_else(|| map.get("facts")) {
                collect(inner, default_confidence, out, depth + 1);
            } else if let Some(triple) = triple_from_object(value, default_confidence) {
                out.push(triple);
            } else {
                warn!("Skipping object without subject/predicate/object: {value}");
            }
        }
        Value::String(text) => {
            let embedded = extract_json_from_response(text);
            match serde_json::from_str::<Value>(embedded) {
                Ok(parsed) if !parsed.is_string() && !parsed.is_number() => {
                    collect(&parsed, default_confidence, out, depth + 1)
                }
                _ => {
                    let before = out.len();
                    out.extend(text.lines().filter_map(|l| triple_from_line(l, default_confidence)));
                    if out.len() == before && !text.trim().is_empty() {
                        warn!("Extractor returned unstructured text with no triples");
                    }
                }
            }
        }
        Value::Null => {}
        other => warn!("Skipping malformed extractor output: {other}"),
    }
}

fn triple_from_object(value: &Value, default_confidence: f32) -> Option<Triple> {
    let field = |long: &str, short: &str| -> Option<String> {
        value
            .get(long)
            .or_else(|| value.get(short))
            .and_then(scalar_to_string)
    };

    let subject = field("subject", "s")?;
    let predicate = field("predicate", "p").or_else(|| field("relation", "r"))?;
    let object = field("object", "o")?;
    let confidence = value
        .get("confidence")
        .and_then(confidence_from_value)
        .unwrap_or(default_confidence);

    Triple::new(subject, predicate, object, confidence)
}

fn triple_from_array(items: &[Value], default_confidence: f32) -> Option<Triple> {
    if !(3..=4).contains(&items.len()) || !items[..3].iter().all(Value::is_string) {
        return None;
    }
    let confidence = items
        .get(3)
        .and_then(confidence_from_value)
        .unwrap_or(default_confidence);
    Triple::new(
        items[0].as_str()?,
        items[1].as_str()?,
        items[2].as_str()?,
        confidence,
    )
}

fn triple_from_line(line: &str, default_confidence: f32) -> Option<Triple> {
    let line = line.trim().trim_start_matches(['-', '*']).trim();
    let parts: Vec<&str> = line.split('|').map(str::trim).collect();
    match parts.as_slice() {
        [s, p, o] => Triple::new(s, p, o, default_confidence),
        [s, p, o, c] => Triple::new(s, p, o, c.parse().unwrap_or(default_confidence)),
        _ => None,
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn confidence_from_value(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Pull a JSON document out of a model response, stripping code fences and
/// surrounding prose. Returns the trimmed input if no JSON is found.
pub fn extract_json_from_response(content: &str) -> &str {
    let mut trimmed = content.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        let body_start = rest.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &rest[body_start..];
        trimmed = body.rfind("```").map(|end| &body[..end]).unwrap_or(body).trim();
    }

    let start = trimmed.find(['[', '{']);
    let end = trimmed.rfind([']', '}']);
    match (start, end) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// Read judge output as per-criterion scores clamped to 0.0 - 1.0.
///
/// A JSON object is read by criterion name. Prose is only understood when a
/// single criterion was asked for, as a leading yes/no or a bare number.
/// Anything else is logged and yields an empty map.
pub fn coerce_scores(response: &str, criteria: &[&str]) -> HashMap<String, f32> {
    if let Ok(parsed) =
        serde_json::from_str::<HashMap<String, Value>>(extract_json_from_response(response))
    {
        return criteria
            .iter()
            .filter_map(|criterion| {
                let score = score_from_value(parsed.get(*criterion)?)?;
                Some((criterion.to_string(), score))
            })
            .collect();
    }

    if let [criterion] = criteria {
        if let Some(score) = score_from_prose(response) {
            return HashMap::from([(criterion.to_string(), score)]);
        }
    }

    warn!("Unreadable judgment, ignoring it: {response}");
    HashMap::new()
}

fn score_from_value(value: &Value) -> Option<f32> {
    let score = match value {
        Value::Number(n) => n.as_f64()? as f32,
        Value::String(s) => s.trim().parse().ok()?,
        Value::Bool(b) => f32::from(u8::from(*b)),
        _ => return None,
    };
    score.is_finite().then(|| score.clamp(0.0, 1.0))
}

fn score_from_prose(response: &str) -> Option<f32> {
    let trimmed = response.trim();
    if let Ok(score) = trimmed.parse::<f32>() {
        return score.is_finite().then(|| score.clamp(0.0, 1.0));
    }

    let first_word = trimmed
        .split(|c: char| !c.is_alphanumeric())
        .next()?
        .to_lowercase();
    match first_word.as_str() {
        "yes" | "true" => Some(1.0),
        "no" | "false" => Some(0.0),
        _ => None,
    }
}

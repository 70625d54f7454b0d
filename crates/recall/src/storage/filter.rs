//! Filter types for memory search operations
//!
//! Provides filtering capabilities for vector similarity searches,
//! allowing queries to be narrowed by owner, category, importance, time,
//! and embedding model version.

use chrono::{DateTime, Utc};

use crate::memory::types::MemoryCategory;

/// Filter criteria for memory search operations.
///
/// All fields are optional - when `None`, that filter is not applied.
/// Multiple filters are combined with AND logic.
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    /// Only memories belonging to this owner
    pub owner_id: Option<String>,
    /// Filter by categories (OR logic within this filter)
    pub categories: Option<Vec<MemoryCategory>>,
    /// Minimum importance threshold (inclusive)
    pub min_importance: Option<f32>,
    /// Only return memories created at or after this time
    pub since: Option<DateTime<Utc>>,
    /// Only return memories created at or before this time
    pub until: Option<DateTime<Utc>>,
    /// Only memories embedded by this model version
    pub embedding_model: Option<String>,
}

impl MemoryFilter {
    /// Create a new empty filter (no filtering applied)
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_categories(mut self, categories: Vec<MemoryCategory>) -> Self {
        self.categories = Some(categories);
        self
    }

    pub fn with_min_importance(mut self, min_importance: f32) -> Self {
        self.min_importance = Some(min_importance);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Build a SQL WHERE clause from this filter.
    /// Returns `None` if no filters are set.
    pub fn to_sql_clause(&self) -> Option<String> {
        let mut conditions = Vec::new();

        if let Some(ref owner_id) = self.owner_id {
            conditions.push(format!("owner_id = '{}'", escape_sql(owner_id)));
        }

        // Categories filter (OR within categories)
        if let Some(ref categories) = self.categories {
            if !categories.is_empty() {
                if categories.len() == 1 {
                    conditions.push(format!("category = '{}'", categories[0].as_str()));
                } else {
                    let in_clause = categories
                        .iter()
                        .map(|c| format!("'{}'", c.as_str()))
                        .collect::<Vec<_>>()
                        .join(", ");
                    conditions.push(format!("category IN ({in_clause})"));
                }
            }
        }

        if let Some(min_importance) = self.min_importance {
            conditions.push(format!("importance >= {min_importance}"));
        }

        // The column is a UTC timestamp, so compare against a typed literal
        if let Some(ref since) = self.since {
            conditions.push(format!("created_at >= {}", timestamp_literal(since)));
        }

        if let Some(ref until) = self.until {
            conditions.push(format!("created_at <= {}", timestamp_literal(until)));
        }

        if let Some(ref model) = self.embedding_model {
            conditions.push(format!("embedding_model = '{}'", escape_sql(model)));
        }

        if conditions.is_empty() {
            None
        } else {
            Some(conditions.join(" AND "))
        }
    }

    /// Filter clause plus a case-insensitive substring match on any keyword.
    ///
    /// Keywords come from [`keywords`], so they never carry LIKE wildcards.
    pub fn to_keyword_clause(&self, keywords: &[String]) -> Option<String> {
        let keyword_clause = if keywords.is_empty() {
            None
        } else {
            let likes = keywords
                .iter()
                .map(|k| format!("lower(content) LIKE '%{}%'", escape_sql(&k.to_lowercase())))
                .collect::<Vec<_>>()
                .join(" OR ");
            Some(format!("({likes})"))
        };

        match (self.to_sql_clause(), keyword_clause) {
            (Some(base), Some(kw)) => Some(format!("{base} AND {kw}")),
            (Some(base), None) => Some(base),
            (None, Some(kw)) => Some(kw),
            (None, None) => None,
        }
    }

    /// Check if this filter is empty (no conditions set)
    pub fn is_empty(&self) -> bool {
        self.owner_id.is_none()
            && self.categories.is_none()
            && self.min_importance.is_none()
            && self.since.is_none()
            && self.until.is_none()
            && self.embedding_model.is_none()
    }
}

/// Escape a value for use inside a single-quoted SQL literal
pub fn escape_sql(value: &str) -> String {
    value.replace('\'', "''")
}

/// SQL timestamp literal for a UTC instant, at microsecond precision
fn timestamp_literal(at: &DateTime<Utc>) -> String {
    format!("TIMESTAMP '{}'", at.format("%Y-%m-%d %H:%M:%S%.6f"))
}

/// Lowercased query words worth matching on (three characters or more)
pub fn keywords(query: &str) -> Vec<String> {
    let mut words: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect();
    words.sort();
    words.dedup();
    words
}

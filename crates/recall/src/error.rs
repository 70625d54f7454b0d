//! Error types for Recall

use thiserror::Error;
use uuid::Uuid;

use crate::curator::CuratorError;

/// Main error type for Recall operations
#[derive(Error, Debug)]
pub enum RecallError {
    /// Storage-related errors (LanceDB, file system, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedding generation errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// A vector was produced by a different model or has the wrong dimension
    #[error("Embedding mismatch: {0}")]
    EmbeddingMismatch(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Memory operation errors
    #[error("Memory error: {0}")]
    Memory(String),

    /// Task queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// No task with the given id is known to the queue
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// A running task observed its cancellation token
    #[error("Task cancelled")]
    Cancelled,

    /// Extraction or judgment collaborator failures
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CuratorError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for RecallError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for Recall operations
pub type Result<T> = std::result::Result<T, RecallError>;

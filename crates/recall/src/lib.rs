//! Recall - long-term memory for LLM agents
//!
//! Memories live in LanceDB as owner-scoped, linked records. The
//! interactive path retrieves them with a vector search plus link
//! expansion and only ever appends raw episodic records. A persistent task
//! queue runs background consolidation that extracts facts, gates their
//! promotion, and resolves open questions.

pub mod config;
pub mod curator;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod queue;
pub mod storage;
pub mod testing;

pub use error::{RecallError, Result};

//! Background consolidation of raw interactions
//!
//! The curator turns episodic records into semantic facts: an extractor
//! pulls triples out of text, a quality gate decides which staged facts
//! are promoted, and a judge scores facts and question resolutions.

pub mod gate;
pub mod payload;
pub mod pipeline;
pub mod prompts;
pub mod provider;
pub mod questions;
pub mod remote;
pub mod types;

pub use gate::{QualityGate, StagedFact, StagedStatus};
pub use payload::TaskPayload;
pub use pipeline::{ConsolidationPipeline, ExtractionReport};
pub use provider::{Extractor, Judge};
pub use questions::{OpenQuestion, QuestionBook, QuestionStatus};
pub use remote::RemoteCurator;
pub use types::{CuratorError, Triple};

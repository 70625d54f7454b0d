//! Memory model, retrieval, and context assembly
//!
//! Memories are owner-scoped records linked into a graph. Retrieval runs a
//! vector search and then expands along links; the assembler turns the
//! result into context for the interactive path.

pub mod context;
pub mod focus;
pub mod graph;
pub mod retrieval;
pub mod types;

pub use context::{
    ContextAssembler, ContextPayload, InteractionReceipt, Role, WorkingEntry, WorkingMemory,
};
pub use focus::{FocusPreset, FocusTable};
pub use graph::{LinkGraph, NeighborSource};
pub use retrieval::{RetrievalEngine, RetrievalResult, Synthesis, synthesize};
pub use types::{Link, LinkType, MemoryCategory, MemoryItem};

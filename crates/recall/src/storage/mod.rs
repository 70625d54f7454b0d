pub mod filter;
pub mod lance;
pub mod records;

pub use filter::MemoryFilter;
pub use lance::{LanceStore, SearchMode, SearchResults};
pub use records::{RecordFilter, RecordTable};

//! Background task queue
//!
//! Tasks move `Queued -> Running -> Completed | Failed | Cancelled`, with
//! failed attempts re-entering `Queued` after a backoff until
//! `max_attempts` is reached.

pub mod backoff;
pub mod journal;
pub mod task;
pub mod task_queue;
pub mod worker;

pub use backoff::RetryPolicy;
pub use journal::TaskJournal;
pub use task::{Task, TaskFilter, TaskStatus};
pub use task_queue::{ClaimedTask, TaskQueue};
pub use worker::{TaskHandler, WorkerPool};

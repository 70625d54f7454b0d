//! Durable storage for task records

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::queue::task::Task;
use crate::storage::LanceStore;
use crate::storage::records::RecordFilter;

/// Where the queue writes every task transition.
///
/// `save` must be durable when it returns `Ok`; the queue only applies a
/// transition in memory after that.
#[async_trait]
pub trait TaskJournal: Send + Sync {
    /// Every stored task, in any order
    async fn load(&self) -> Result<Vec<Task>>;

    /// Insert or overwrite the record for `task.id`
    async fn save(&self, task: &Task) -> Result<()>;

    /// Drop the records for `ids`. Returns how many existed
    async fn remove(&self, ids: &[Uuid]) -> Result<usize>;
}

/// Tasks live in the store's `tasks` table. They are not owner-scoped, so
/// the owner column is left empty.
#[async_trait]
impl TaskJournal for LanceStore {
    async fn load(&self) -> Result<Vec<Task>> {
        self.tasks().list(&RecordFilter::new()).await
    }

    async fn save(&self, task: &Task) -> Result<()> {
        self.tasks()
            .upsert(&task.id.to_string(), "", task.status.as_str(), task)
            .await
    }

    async fn remove(&self, ids: &[Uuid]) -> Result<usize> {
        let keys: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        self.tasks().delete_keys(&keys).await
    }
}

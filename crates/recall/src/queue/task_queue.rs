//! Persistent task queue
//!
//! Every transition is written to the journal while the registry lock is
//! held and only then applied in memory, so a restart rebuilds exactly the
//! committed state. Handlers run outside the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{RecallError, Result};
use crate::queue::backoff::RetryPolicy;
use crate::queue::journal::TaskJournal;
use crate::queue::task::{Task, TaskFilter, TaskStatus};
use crate::queue::worker::{TaskHandler, WorkerPool};
use crate::storage::LanceStore;

/// Task state plus cancellation handles for in-flight executions
#[derive(Default)]
struct Registry {
    tasks: HashMap<Uuid, Task>,
    running: HashMap<Uuid, CancellationToken>,
    /// Outcomes the journal refused; the task stays `Running` until one is written
    unrecorded: HashMap<Uuid, Task>,
}

struct QueueInner {
    journal: Arc<dyn TaskJournal>,
    registry: Mutex<Registry>,
    wakeup: Notify,
    config: QueueConfig,
    policy: RetryPolicy,
}

/// A task handed to a worker, with the token it must observe
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub task: Task,
    pub cancel: CancellationToken,
}

/// Durable, retrying, cancellable job queue. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Load all persisted tasks and recover any that were running when the
    /// process last stopped.
    ///
    /// An interrupted attempt has already been counted, so a task whose
    /// attempts are exhausted becomes `Failed`; the rest return to `Queued`.
    pub async fn open(store: Arc<LanceStore>, config: QueueConfig) -> Result<Self> {
        Self::open_with_journal(store, config).await
    }

    /// Like [`TaskQueue::open`], over any journal
    pub async fn open_with_journal(
        journal: Arc<dyn TaskJournal>,
        config: QueueConfig,
    ) -> Result<Self> {
        let persisted = journal.load().await?;
        let policy = RetryPolicy::from_config(&config);

        let mut registry = Registry::default();
        let mut recovered = 0;
        for mut task in persisted {
            if task.status == TaskStatus::Running {
                let now = Utc::now();
                task.updated_at = now;
                task.last_error = Some("interrupted by restart".to_string());
                if task.attempts_exhausted() {
                    task.status = TaskStatus::Failed;
                    task.finished_at = Some(now);
                } else {
                    task.status = TaskStatus::Queued;
                    task.next_run_at = None;
                }
                journal.save(&task).await?;
                warn!(
                    "Recovered interrupted task {} ({}) as {}",
                    task.id, task.name, task.status
                );
                recovered += 1;
            }
            registry.tasks.insert(task.id, task);
        }

        info!(
            "Task queue loaded {} tasks ({recovered} recovered)",
            registry.tasks.len()
        );

        let queue = Self {
            inner: Arc::new(QueueInner {
                journal,
                registry: Mutex::new(registry),
                wakeup: Notify::new(),
                config,
                policy,
            }),
        };
        if let Err(e) = queue.purge_expired().await {
            warn!("Could not purge finished tasks: {e}");
        }
        Ok(queue)
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// How long finished tasks are kept, if they expire at all
    pub fn retention(&self) -> Option<chrono::Duration> {
        match self.inner.config.finished_retention_hours {
            0 => None,
            hours => i64::try_from(hours).ok().and_then(chrono::Duration::try_hours),
        }
    }

    /// Purge finished tasks older than the configured retention
    pub async fn purge_expired(&self) -> Result<usize> {
        match self.retention() {
            Some(age) => self.purge_finished(age).await,
            None => Ok(0),
        }
    }

    /// Remove terminal tasks that finished more than `older_than` ago, from
    /// the journal first and then from memory. Returns how many were removed.
    pub async fn purge_finished(&self, older_than: chrono::Duration) -> Result<usize> {
        let Some(cutoff) = Utc::now().checked_sub_signed(older_than) else {
            return Ok(0);
        };
        let mut registry = self.inner.registry.lock().await;

        let expired: Vec<Uuid> = registry
            .tasks
            .values()
            .filter(|t| t.is_terminal() && t.finished_at.unwrap_or(t.updated_at) <= cutoff)
            .map(|t| t.id)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }

        self.inner.journal.remove(&expired).await?;
        for id in &expired {
            registry.tasks.remove(id);
        }

        info!("Purged {} finished tasks", expired.len());
        Ok(expired.len())
    }

    /// Queue a new task. `max_attempts` defaults to the configured value.
    pub async fn enqueue(
        &self,
        name: &str,
        parameters: Value,
        max_attempts: Option<u32>,
    ) -> Result<Uuid> {
        let max_attempts = max_attempts.unwrap_or(self.inner.config.default_max_attempts);
        let task = Task::new(name, parameters, max_attempts);
        let id = task.id;

        {
            let mut registry = self.inner.registry.lock().await;
            self.inner.journal.save(&task).await?;
            registry.tasks.insert(id, task);
        }

        debug!("Enqueued task {id} ({name})");
        self.inner.wakeup.notify_one();
        Ok(id)
    }

    /// Current state of a task
    pub async fn status(&self, id: Uuid) -> Result<Task> {
        let registry = self.inner.registry.lock().await;
        registry
            .tasks
            .get(&id)
            .cloned()
            .ok_or(RecallError::TaskNotFound(id))
    }

    /// Request cancellation. Returns false if the task had already reached a
    /// terminal state; a running execution is signalled through its token and
    /// any result it later reports is discarded.
    pub async fn cancel(&self, id: Uuid) -> Result<bool> {
        let mut registry = self.inner.registry.lock().await;
        let current = registry
            .tasks
            .get(&id)
            .ok_or(RecallError::TaskNotFound(id))?;

        if current.is_terminal() {
            debug!("Cancel of task {id} ignored, already {}", current.status);
            return Ok(false);
        }

        let mut task = current.clone();
        let now = Utc::now();
        task.status = TaskStatus::Cancelled;
        task.updated_at = now;
        task.finished_at = Some(now);
        task.next_run_at = None;
        self.inner.journal.save(&task).await?;
        registry.tasks.insert(id, task);
        registry.unrecorded.remove(&id);

        if let Some(token) = registry.running.remove(&id) {
            token.cancel();
        }

        info!("Cancelled task {id}");
        Ok(true)
    }

    /// Tasks matching `filter`, oldest first
    pub async fn list(&self, filter: &TaskFilter) -> Vec<Task> {
        let registry = self.inner.registry.lock().await;
        let mut tasks: Vec<Task> = registry
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        drop(registry);

        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        tasks
    }

    /// Claim the oldest due task, marking it `Running` and counting the attempt.
    /// Outcomes the journal refused earlier are written first.
    pub async fn claim(&self) -> Result<Option<ClaimedTask>> {
        let mut registry = self.inner.registry.lock().await;
        self.record_unrecorded(&mut registry).await;
        let now = Utc::now();

        let Some(next) = registry
            .tasks
            .values()
            .filter(|t| t.is_due(now))
            .min_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
        else {
            return Ok(None);
        };

        let mut task = next.clone();
        task.status = TaskStatus::Running;
        task.attempts += 1;
        task.started_at = Some(now);
        task.updated_at = now;
        task.next_run_at = None;
        self.inner.journal.save(&task).await?;

        let cancel = CancellationToken::new();
        registry.running.insert(task.id, cancel.clone());
        registry.tasks.insert(task.id, task.clone());

        debug!(
            "Claimed task {} ({}) attempt {}/{}",
            task.id, task.name, task.attempts, task.max_attempts
        );
        Ok(Some(ClaimedTask { task, cancel }))
    }

    /// Record the outcome of an execution. Results for tasks that are no
    /// longer `Running` (cancelled meanwhile) are discarded.
    pub async fn finish(&self, id: Uuid, outcome: Result<()>) -> Result<Task> {
        let mut registry = self.inner.registry.lock().await;
        registry.running.remove(&id);

        let current = registry
            .tasks
            .get(&id)
            .ok_or(RecallError::TaskNotFound(id))?;

        if current.status != TaskStatus::Running {
            debug!(
                "Discarding late result for task {id}, already {}",
                current.status
            );
            return Ok(current.clone());
        }

        let mut task = current.clone();
        let now = Utc::now();
        task.updated_at = now;

        match outcome {
            Ok(()) => {
                task.status = TaskStatus::Completed;
                task.finished_at = Some(now);
                task.last_error = None;
            }
            Err(e) if task.attempts_exhausted() => {
                error!(
                    "Task {} ({}) failed permanently after {} attempts: {e}",
                    task.id, task.name, task.attempts
                );
                task.status = TaskStatus::Failed;
                task.finished_at = Some(now);
                task.last_error = Some(e.to_string());
            }
            Err(e) => {
                let delay = self.inner.policy.delay_for(task.attempts);
                warn!(
                    "Task {} ({}) attempt {}/{} failed, retrying in {:?}: {e}",
                    task.id, task.name, task.attempts, task.max_attempts, delay
                );
                task.status = TaskStatus::Queued;
                task.last_error = Some(e.to_string());
                task.next_run_at = chrono::Duration::from_std(delay)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d));
            }
        }

        if let Err(e) = self.inner.journal.save(&task).await {
            warn!("Could not record result of task {id}, will retry: {e}");
            registry.unrecorded.insert(id, task);
            return Err(e);
        }
        registry.tasks.insert(id, task.clone());
        drop(registry);

        if task.status == TaskStatus::Queued {
            self.inner.wakeup.notify_one();
        }
        Ok(task)
    }

    /// Write outcomes held back by earlier journal failures. Stops at the
    /// first failure, as the journal is most likely still unavailable.
    async fn record_unrecorded(&self, registry: &mut Registry) {
        let pending: Vec<Task> = registry.unrecorded.values().cloned().collect();
        for task in pending {
            let id = task.id;
            let still_running = registry
                .tasks
                .get(&id)
                .is_some_and(|t| t.status == TaskStatus::Running);
            if !still_running {
                registry.unrecorded.remove(&id);
                continue;
            }

            if let Err(e) = self.inner.journal.save(&task).await {
                debug!("Result of task {id} still unrecorded: {e}");
                return;
            }
            info!("Recorded delayed result of task {id} ({})", task.status);
            registry.unrecorded.remove(&id);
            registry.tasks.insert(id, task);
        }
    }

    /// Claim and execute a single due task on the calling task.
    /// Returns the id of the task that ran, if any was due.
    pub async fn run_next(&self, handler: Arc<dyn TaskHandler>) -> Result<Option<Uuid>> {
        let Some(claimed) = self.claim().await? else {
            return Ok(None);
        };
        let id = claimed.task.id;
        let outcome = execute(handler, claimed).await;
        self.finish(id, outcome).await?;
        Ok(Some(id))
    }

    /// Start the configured number of workers
    pub fn start(&self, handler: Arc<dyn TaskHandler>) -> WorkerPool {
        WorkerPool::spawn(self.clone(), handler, self.inner.config.workers)
    }

    /// Poll until the task reaches a terminal state or `timeout` elapses
    pub async fn wait_for_terminal(&self, id: Uuid, timeout: Duration) -> Result<Task> {
        let poll = Duration::from_millis(10);
        tokio::time::timeout(timeout, async {
            loop {
                let task = self.status(id).await?;
                if task.is_terminal() {
                    return Ok(task);
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await
        .map_err(|_| RecallError::Queue(format!("Timed out waiting for task {id}")))?
    }

    /// Wait until woken by an enqueue/requeue or the poll interval elapses
    pub(crate) async fn idle(&self) {
        let poll = Duration::from_millis(self.inner.config.poll_interval_ms.max(1));
        tokio::select! {
            _ = self.inner.wakeup.notified() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

/// Run the handler on its own tokio task so a panic is reported as a failure
pub(crate) async fn execute(handler: Arc<dyn TaskHandler>, claimed: ClaimedTask) -> Result<()> {
    let ClaimedTask { task, cancel } = claimed;
    match tokio::spawn(async move { handler.run(&task, &cancel).await }).await {
        Ok(outcome) => outcome,
        Err(join_error) => Err(RecallError::Queue(format!("Task panicked: {join_error}"))),
    }
}


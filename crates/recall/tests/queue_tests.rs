//! Integration tests for the persistent task queue
//!
//! Covers the task state machine, retries with backoff, cancellation,
//! panic isolation, and recovery after an unclean stop.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use recall::config::QueueConfig;
use recall::error::{RecallError, Result};
use recall::queue::{Task, TaskFilter, TaskHandler, TaskJournal, TaskQueue, TaskStatus};
use recall::storage::LanceStore;
use serde_json::json;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(10);

fn fast_config() -> QueueConfig {
    QueueConfig {
        workers: 2,
        default_max_attempts: 3,
        base_backoff_ms: 5,
        max_backoff_ms: 20,
        poll_interval_ms: 10,
        finished_retention_hours: 0,
    }
}

async fn open_queue(path: &Path, config: QueueConfig) -> TaskQueue {
    let store = Arc::new(LanceStore::open(path, 384).await.unwrap());
    TaskQueue::open(store, config).await.unwrap()
}

/// Succeeds after failing a fixed number of times
struct FlakyHandler {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyHandler {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn run(&self, _task: &Task, _cancel: &CancellationToken) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(RecallError::General(format!("flaky failure {call}")));
        }
        Ok(())
    }
}

/// Blocks until cancelled
struct BlockingHandler;

#[async_trait]
impl TaskHandler for BlockingHandler {
    async fn run(&self, _task: &Task, cancel: &CancellationToken) -> Result<()> {
        cancel.cancelled().await;
        Err(RecallError::Cancelled)
    }
}

struct PanickingHandler;

#[async_trait]
impl TaskHandler for PanickingHandler {
    async fn run(&self, _task: &Task, _cancel: &CancellationToken) -> Result<()> {
        panic!("handler blew up");
    }
}

mod state_machine {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_claim_complete() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;

        let id = queue.enqueue("extract_facts", json!({"text": "hi"}), None).await.unwrap();
        let task = queue.status(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.max_attempts, 3);

        let claimed = queue.claim().await.unwrap().expect("task should be due");
        assert_eq!(claimed.task.id, id);
        assert_eq!(claimed.task.status, TaskStatus::Running);
        assert_eq!(claimed.task.attempts, 1);
        assert!(queue.claim().await.unwrap().is_none());

        let done = queue.finish(id, Ok(())).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_claims_oldest_first() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;

        let first = queue.enqueue("a", json!({}), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = queue.enqueue("b", json!({}), None).await.unwrap();

        assert_eq!(queue.claim().await.unwrap().unwrap().task.id, first);
        assert_eq!(queue.claim().await.unwrap().unwrap().task.id, second);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;

        let missing = Uuid::new_v4();
        assert!(matches!(
            queue.status(missing).await,
            Err(RecallError::TaskNotFound(id)) if id == missing
        ));
        assert!(queue.cancel(missing).await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;

        let a = queue.enqueue("extract_facts", json!({}), None).await.unwrap();
        queue.enqueue("reflect", json!({}), None).await.unwrap();
        queue.enqueue("extract_facts", json!({}), None).await.unwrap();
        queue.cancel(a).await.unwrap();

        let extract = queue.list(&TaskFilter::new().with_name("extract_facts")).await;
        assert_eq!(extract.len(), 2);

        let cancelled = queue
            .list(&TaskFilter::new().with_status(TaskStatus::Cancelled))
            .await;
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, a);

        assert_eq!(queue.list(&TaskFilter::new().with_limit(1)).await.len(), 1);
    }
}

mod retries {
    use super::*;

    #[tokio::test]
    async fn test_failure_requeues_with_delay() {
        let dir = tempdir().unwrap();
        let config = QueueConfig {
            base_backoff_ms: 60_000,
            max_backoff_ms: 60_000,
            ..fast_config()
        };
        let queue = open_queue(dir.path(), config).await;

        let id = queue.enqueue("job", json!({}), None).await.unwrap();
        queue.claim().await.unwrap().unwrap();
        let task = queue
            .finish(id, Err(RecallError::General("boom".to_string())))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.last_error.as_deref(), Some("boom"));
        assert!(task.next_run_at.is_some());
        // Not due again until the backoff elapses
        assert!(queue.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;
        let handler = FlakyHandler::new(2);

        let id = queue.enqueue("job", json!({}), None).await.unwrap();
        let pool = queue.start(handler.clone());
        let task = queue.wait_for_terminal(id, WAIT).await.unwrap();
        pool.shutdown().await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 3);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_permanently() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;
        let handler = FlakyHandler::new(u32::MAX);

        let id = queue.enqueue("job", json!({}), Some(2)).await.unwrap();
        let pool = queue.start(handler.clone());
        let task = queue.wait_for_terminal(id, WAIT).await.unwrap();
        pool.shutdown().await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 2);
        assert!(task.attempts <= task.max_attempts);
        assert_eq!(task.last_error.as_deref(), Some("flaky failure 2"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panic_is_a_failure() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;

        let id = queue.enqueue("job", json!({}), Some(1)).await.unwrap();
        let ran = queue.run_next(Arc::new(PanickingHandler)).await.unwrap();
        assert_eq!(ran, Some(id));

        let task = queue.status(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.last_error.unwrap().contains("panicked"));
    }
}

mod cancellation {
    use super::*;

    #[tokio::test]
    async fn test_cancel_queued_task() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;

        let id = queue.enqueue("job", json!({}), None).await.unwrap();
        assert!(queue.cancel(id).await.unwrap());
        assert_eq!(queue.status(id).await.unwrap().status, TaskStatus::Cancelled);
        assert!(queue.claim().await.unwrap().is_none());
        // Already terminal
        assert!(!queue.cancel(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_completed_task_is_refused() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;

        let id = queue.enqueue("job", json!({}), None).await.unwrap();
        queue.run_next(FlakyHandler::new(0)).await.unwrap();

        assert!(!queue.cancel(id).await.unwrap());
        assert_eq!(queue.status(id).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_late_result_after_cancel_is_discarded() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;

        let id = queue.enqueue("job", json!({}), None).await.unwrap();
        let claimed = queue.claim().await.unwrap().unwrap();
        assert!(queue.cancel(id).await.unwrap());
        assert!(claimed.cancel.is_cancelled());

        let task = queue.finish(id, Ok(())).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_running_task_signals_worker() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;

        let id = queue.enqueue("job", json!({}), None).await.unwrap();
        let pool = queue.start(Arc::new(BlockingHandler));

        let deadline = tokio::time::Instant::now() + WAIT;
        while queue.status(id).await.unwrap().status != TaskStatus::Running {
            assert!(tokio::time::Instant::now() < deadline, "task never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(queue.cancel(id).await.unwrap());
        pool.shutdown().await;

        let task = queue.status(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.attempts, 1);
    }
}

mod recovery {
    use super::*;

    #[tokio::test]
    async fn test_tasks_survive_restart() {
        let dir = tempdir().unwrap();
        let id = {
            let queue = open_queue(dir.path(), fast_config()).await;
            queue.enqueue("job", json!({"n": 1}), None).await.unwrap()
        };

        let queue = open_queue(dir.path(), fast_config()).await;
        let task = queue.status(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.parameters, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_running_tasks_are_recovered() {
        let dir = tempdir().unwrap();
        let (interrupted, exhausted, waiting) = {
            let queue = open_queue(dir.path(), fast_config()).await;
            let interrupted = queue.enqueue("job", json!({}), Some(3)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            let exhausted = queue.enqueue("job", json!({}), Some(1)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            let waiting = queue.enqueue("job", json!({}), Some(3)).await.unwrap();

            // Claim two and "crash" before reporting results
            queue.claim().await.unwrap().unwrap();
            queue.claim().await.unwrap().unwrap();
            (interrupted, exhausted, waiting)
        };

        let queue = open_queue(dir.path(), fast_config()).await;

        let task = queue.status(interrupted).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempts, 1);

        let task = queue.status(exhausted).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 1);

        let task = queue.status(waiting).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.attempts, 0);

        let running = queue
            .list(&TaskFilter::new().with_status(TaskStatus::Running))
            .await;
        assert!(running.is_empty());
    }

    #[tokio::test]
    async fn test_recovered_task_runs_to_completion() {
        let dir = tempdir().unwrap();
        let id = {
            let queue = open_queue(dir.path(), fast_config()).await;
            let id = queue.enqueue("job", json!({}), None).await.unwrap();
            queue.claim().await.unwrap().unwrap();
            id
        };

        let queue = open_queue(dir.path(), fast_config()).await;
        let pool = queue.start(FlakyHandler::new(0));
        let task = queue.wait_for_terminal(id, WAIT).await.unwrap();
        pool.shutdown().await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 2);
    }
}

/// In-memory journal whose writes can be switched off
#[derive(Default)]
struct SwitchableJournal {
    tasks: std::sync::Mutex<std::collections::HashMap<Uuid, Task>>,
    offline: std::sync::atomic::AtomicBool,
}

impl SwitchableJournal {
    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn stored(&self, id: Uuid) -> Option<Task> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl TaskJournal for SwitchableJournal {
    async fn load(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.lock().unwrap().values().cloned().collect())
    }

    async fn save(&self, task: &Task) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RecallError::Storage("journal offline".to_string()));
        }
        self.tasks.lock().unwrap().insert(task.id, task.clone());
        Ok(())
    }

    async fn remove(&self, ids: &[Uuid]) -> Result<usize> {
        let mut tasks = self.tasks.lock().unwrap();
        Ok(ids.iter().filter(|id| tasks.remove(*id).is_some()).count())
    }
}

mod journal_outages {
    use super::*;

    async fn running_task(journal: &Arc<SwitchableJournal>) -> (TaskQueue, Uuid) {
        let queue = TaskQueue::open_with_journal(journal.clone(), fast_config())
            .await
            .unwrap();
        let id = queue.enqueue("job", json!({}), None).await.unwrap();
        queue.claim().await.unwrap().unwrap();
        (queue, id)
    }

    #[tokio::test]
    async fn test_unrecorded_success_is_written_on_next_claim() {
        let journal = Arc::new(SwitchableJournal::default());
        let (queue, id) = running_task(&journal).await;

        journal.set_offline(true);
        assert!(queue.finish(id, Ok(())).await.is_err());
        assert_eq!(queue.status(id).await.unwrap().status, TaskStatus::Running);
        assert_eq!(journal.stored(id).unwrap().status, TaskStatus::Running);

        // Still offline: nothing changes
        assert!(queue.claim().await.unwrap().is_none());
        assert_eq!(queue.status(id).await.unwrap().status, TaskStatus::Running);

        journal.set_offline(false);
        assert!(queue.claim().await.unwrap().is_none());
        assert_eq!(queue.status(id).await.unwrap().status, TaskStatus::Completed);
        assert_eq!(journal.stored(id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_unrecorded_failure_is_retried_after_recovery() {
        let journal = Arc::new(SwitchableJournal::default());
        let (queue, id) = running_task(&journal).await;

        journal.set_offline(true);
        let outcome = Err(RecallError::General("transient".to_string()));
        assert!(queue.finish(id, outcome).await.is_err());
        journal.set_offline(false);

        let pool = queue.start(FlakyHandler::new(0));
        let task = queue.wait_for_terminal(id, WAIT).await.unwrap();
        pool.shutdown().await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 2);
        assert!(task.attempts <= task.max_attempts);
    }

    #[tokio::test]
    async fn test_cancel_wins_over_unrecorded_result() {
        let journal = Arc::new(SwitchableJournal::default());
        let (queue, id) = running_task(&journal).await;

        journal.set_offline(true);
        assert!(queue.finish(id, Ok(())).await.is_err());
        journal.set_offline(false);

        assert!(queue.cancel(id).await.unwrap());
        assert!(queue.claim().await.unwrap().is_none());
        assert_eq!(queue.status(id).await.unwrap().status, TaskStatus::Cancelled);
        assert_eq!(journal.stored(id).unwrap().status, TaskStatus::Cancelled);
    }
}

mod retention {
    use super::*;

    #[tokio::test]
    async fn test_purge_removes_only_finished_tasks() {
        let dir = tempdir().unwrap();
        let (done, waiting) = {
            let queue = open_queue(dir.path(), fast_config()).await;
            let done = queue.enqueue("job", json!({}), None).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            let waiting = queue.enqueue("job", json!({}), None).await.unwrap();
            queue.claim().await.unwrap().unwrap();
            queue.finish(done, Ok(())).await.unwrap();

            assert_eq!(queue.purge_finished(chrono::Duration::hours(1)).await.unwrap(), 0);
            assert_eq!(queue.purge_finished(chrono::Duration::zero()).await.unwrap(), 1);
            assert!(matches!(
                queue.status(done).await,
                Err(RecallError::TaskNotFound(_))
            ));
            (done, waiting)
        };

        let queue = open_queue(dir.path(), fast_config()).await;
        assert!(queue.status(done).await.is_err());
        assert_eq!(queue.status(waiting).await.unwrap().status, TaskStatus::Queued);
        assert_eq!(queue.list(&TaskFilter::new()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_retention_keeps_everything() {
        let dir = tempdir().unwrap();
        let queue = open_queue(dir.path(), fast_config()).await;
        assert!(queue.retention().is_none());

        let id = queue.enqueue("job", json!({}), None).await.unwrap();
        queue.cancel(id).await.unwrap();
        assert_eq!(queue.purge_expired().await.unwrap(), 0);
        assert!(queue.status(id).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_tasks_are_purged_on_open() {
        let journal = Arc::new(SwitchableJournal::default());
        let mut old = Task::new("job", json!({}), 3);
        old.status = TaskStatus::Completed;
        old.finished_at = Some(chrono::Utc::now() - chrono::Duration::days(30));
        let fresh = Task::new("job", json!({}), 3);
        journal.save(&old).await.unwrap();
        journal.save(&fresh).await.unwrap();

        let config = QueueConfig {
            finished_retention_hours: 24,
            ..fast_config()
        };
        let queue = TaskQueue::open_with_journal(journal.clone(), config).await.unwrap();

        assert!(queue.status(old.id).await.is_err());
        assert!(journal.stored(old.id).is_none());
        assert!(queue.status(fresh.id).await.is_ok());
    }
}

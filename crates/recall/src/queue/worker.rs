//! Fixed-size worker pool draining a `TaskQueue`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::queue::task::Task;
use crate::queue::task_queue::{TaskQueue, execute};

/// Executes claimed tasks.
///
/// There is no wall-clock timeout. Implementations check `cancel` before
/// each blocking collaborator call and return `RecallError::Cancelled` once
/// it fires.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn run(&self, task: &Task, cancel: &CancellationToken) -> Result<()>;
}

/// Running workers. Dropping the pool leaves them running; call `shutdown`
/// to stop claiming new work and wait for in-flight tasks to finish.
pub struct WorkerPool {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    purger: Option<JoinHandle<()>>,
}

/// How often the pool purges expired finished tasks
const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

impl WorkerPool {
    pub(crate) fn spawn(queue: TaskQueue, handler: Arc<dyn TaskHandler>, workers: usize) -> Self {
        let shutdown = CancellationToken::new();
        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let queue = queue.clone();
                let handler = Arc::clone(&handler);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker_loop(worker_id, queue, handler, shutdown).await })
            })
            .collect::<Vec<_>>();

        let purger = queue
            .retention()
            .map(|_| tokio::spawn(purge_loop(queue.clone(), shutdown.clone())));

        info!("Started {} task workers", handles.len());
        Self {
            shutdown,
            handles,
            purger,
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stop claiming tasks and wait for every worker to exit
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.handles.into_iter().chain(self.purger) {
            if let Err(e) = handle.await {
                error!("Task worker exited abnormally: {e}");
            }
        }
        info!("Task workers stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    queue: TaskQueue,
    handler: Arc<dyn TaskHandler>,
    shutdown: CancellationToken,
) {
    debug!("Worker {worker_id} started");

    while !shutdown.is_cancelled() {
        let claimed = match queue.claim().await {
            Ok(claimed) => claimed,
            Err(e) => {
                error!("Worker {worker_id} failed to claim a task: {e}");
                None
            }
        };

        let Some(claimed) = claimed else {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = queue.idle() => {}
            }
            continue;
        };

        let id = claimed.task.id;
        let outcome = execute(Arc::clone(&handler), claimed).await;
        if let Err(e) = queue.finish(id, outcome).await {
            error!("Worker {worker_id} failed to record result for task {id}: {e}");
        }
    }

    debug!("Worker {worker_id} stopped");
}

async fn purge_loop(queue: TaskQueue, shutdown: CancellationToken) {
    let start = tokio::time::Instant::now() + PURGE_INTERVAL;
    let mut ticks = tokio::time::interval_at(start, PURGE_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticks.tick() => {
                if let Err(e) = queue.purge_expired().await {
                    warn!("Could not purge finished tasks: {e}");
                }
            }
        }
    }
}

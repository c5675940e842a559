//! Bounded worker pool for refresh tasks.
//!
//! Tasks are spawned on the tokio runtime; a semaphore caps how many run at
//! once. Every task is bounded by a deadline and shielded from panics, so the
//! caller always gets a [`RefreshResult`] back.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::refresher::RefreshResult;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    task_timeout: Duration,
}

/// Handle on a submitted task.
#[derive(Debug)]
pub struct PendingRefresh {
    handle: JoinHandle<RefreshResult>,
}

impl PendingRefresh {
    /// Waits for the task. A task that panicked or was cancelled resolves to
    /// a failed result.
    pub async fn join(self) -> RefreshResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                RefreshResult::failure(SyncError::Panicked(panic_message(e.into_panic())))
            }
            Err(e) => RefreshResult::failure(SyncError::Aborted(e.to_string())),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl WorkerPool {
    pub fn new(size: usize, task_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            task_timeout,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Number of tasks currently holding a worker slot.
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Submits one task. It starts once a worker slot is free.
    pub fn spawn<F>(&self, task: F) -> PendingRefresh
    where
        F: Future<Output = RefreshResult> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let timeout = self.task_timeout;

        let handle = tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return RefreshResult::failure(SyncError::Aborted("worker pool closed".into())),
            };

            match tokio::time::timeout(timeout, AssertUnwindSafe(task).catch_unwind()).await {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => {
                    let message = panic_message(panic);
                    tracing::error!(panic = %message, "refresh task panicked");
                    RefreshResult::failure(SyncError::Panicked(message))
                }
                Err(_) => {
                    tracing::error!(timeout_ms = timeout.as_millis() as u64, "refresh task timed out");
                    RefreshResult::failure(SyncError::Timeout(timeout))
                }
            }
        });

        PendingRefresh { handle }
    }

    /// Submits every task and waits for all of them. Results keep the
    /// submission order.
    pub async fn invoke_all<I, F>(&self, tasks: I) -> Vec<RefreshResult>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = RefreshResult> + Send + 'static,
    {
        let pending: Vec<PendingRefresh> = tasks.into_iter().map(|task| self.spawn(task)).collect();
        let mut results = Vec::with_capacity(pending.len());
        for task in pending {
            results.push(task.join().await);
        }
        results
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

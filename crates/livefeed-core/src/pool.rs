//! Fixed-size worker pools.
//!
//! A pool admits at most `workers` tasks at a time; extra submissions queue
//! on a semaphore instead of adding concurrency. Handles returned by the
//! pool can be dropped or abandoned after a timeout without cancelling the
//! task, which keeps running until it finishes on its own.
//!
//! Pools are owned by the server state and drained by [`WorkerPool::shutdown`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// Errors surfaced by pool submission or task completion.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    /// The pool no longer accepts work.
    #[error("worker pool '{0}' is shut down")]
    Closed(&'static str),

    /// The task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Join(String),
}

/// A bounded pool of async workers.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: &'static str,
    workers: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Create a pool with `workers` concurrent slots (at least one).
    pub fn new(name: &'static str, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            inner: Arc::new(PoolInner {
                name,
                workers,
                permits: Arc::new(Semaphore::new(workers)),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Tasks submitted and not yet finished, queued ones included.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Free worker slots right now.
    pub fn idle_workers(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.tracker.is_closed()
    }

    /// Queue an async task.
    pub fn spawn<F>(&self, fut: F) -> Result<JoinHandle<F::Output>, PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolError::Closed(self.inner.name));
        }

        let permits = Arc::clone(&self.inner.permits);
        Ok(self.inner.tracker.spawn(async move {
            // The semaphore is never closed, so acquisition only waits.
            let _permit = permits.acquire_owned().await.ok();
            fut.await
        }))
    }

    /// Queue a CPU-bound closure. It runs on the blocking thread pool while
    /// holding one of this pool's slots.
    pub fn spawn_blocking<F, R>(&self, f: F) -> Result<JoinHandle<Result<R, PoolError>>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.spawn(async move {
            tokio::task::spawn_blocking(f)
                .await
                .map_err(|e| PoolError::Join(e.to_string()))
        })
    }

    /// Stop admitting work and wait up to `grace` for in-flight tasks.
    ///
    /// Returns `true` if every task finished within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.tracker.close();

        let drained = tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_ok();
        if drained {
            tracing::info!(pool = self.inner.name, "worker pool drained");
        } else {
            tracing::warn!(
                pool = self.inner.name,
                in_flight = self.in_flight(),
                "worker pool shutdown grace elapsed with tasks still running"
            );
        }
        drained
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("workers", &self.inner.workers)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

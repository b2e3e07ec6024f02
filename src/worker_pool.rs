//! Bounded pool for CPU-bound algorithm work.
//!
//! Jobs run on tokio's blocking thread pool, which reuses threads across
//! frames. A semaphore caps how many jobs run at once. The permit moves into
//! the job, so a caller that stops waiting does not release capacity until the
//! job actually finishes.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

/// Default number of concurrent jobs
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,

    #[error("job panicked: {0}")]
    Panicked(String),

    #[error("job was cancelled")]
    Cancelled,
}

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Pool running at most `size` jobs at once (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs that could start right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` once a slot is free and wait for its result.
    ///
    /// Dropping the returned future before a slot is granted means the job
    /// never starts.
    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        trace!("Worker slot acquired, {} left", self.permits.available_permits());

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        });

        handle.await.map_err(|e| {
            if e.is_panic() {
                PoolError::Panicked(panic_message(e.into_panic()))
            } else {
                PoolError::Cancelled
            }
        })
    }

    /// Refuse new jobs. Jobs already running finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Bounded pool for CPU-bound request work
//!
//! Decoding, inference and encoding block a thread for hundreds of
//! milliseconds, so they run on tokio's blocking threads. A semaphore caps
//! how many run at once; further requests wait for a permit.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Errors from scheduling work on the pool
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The pool was closed and accepts no more work
    #[error("worker pool is shut down")]
    Closed,

    /// The task panicked
    #[error("worker task panicked: {0}")]
    Panicked(String),

    /// The task was cancelled before finishing
    #[error("worker task cancelled")]
    Cancelled,
}

/// Semaphore-gated `spawn_blocking` pool
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool running at most `size` tasks at once (minimum 1)
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Pool sized to the machine's available parallelism
    #[must_use]
    pub fn with_available_parallelism() -> Self {
        Self::new(default_worker_count())
    }

    /// Maximum number of concurrent tasks
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks that could start right now without waiting
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop accepting work; waiting and future calls fail with `Closed`
    pub fn close(&self) {
        self.permits.close();
    }

    /// Run `task` on a blocking thread once a permit is free
    ///
    /// # Errors
    /// - `WorkerError::Closed` when the pool was shut down
    /// - `WorkerError::Panicked` when the task panicked
    pub async fn run<F, T>(&self, task: F) -> Result<T, WorkerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| WorkerError::Closed)?;

        let join = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            task()
        })
        .await;

        match join {
            Ok(value) => Ok(value),
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::error!(panic = %message, "Worker task panicked");
                Err(WorkerError::Panicked(message))
            },
            Err(_) => Err(WorkerError::Cancelled),
        }
    }
}

/// Number of workers used when none is configured
#[must_use]
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_value() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.run(|| 21 * 2).await.unwrap(), 42);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_panic_is_reported_and_permit_released() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run(|| -> u32 { panic!("boom") })
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Panicked(ref m) if m == "boom"));

        // the single permit is free again
        assert_eq!(pool.run(|| 7).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = WorkerPool::new(1);
        pool.close();
        assert!(matches!(pool.run(|| ()).await, Err(WorkerError::Closed)));
    }

    #[test]
    fn test_zero_size_is_clamped() {
        assert_eq!(WorkerPool::new(0).size(), 1);
        assert!(default_worker_count() >= 1);
    }
}

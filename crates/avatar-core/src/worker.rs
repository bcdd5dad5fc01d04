//! Bounded worker pools for blocking inference.
//!
//! Each workload class (perception, policy) gets its own small pool. A
//! submission either takes a free slot immediately or is refused; it never
//! waits, so the tick loop cannot stall behind a slow model.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// A pool of at most `size` concurrent blocking jobs.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: &'static str,
    slots: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool with `size` slots (clamped to `1..=2`).
    pub fn new(name: &'static str, size: usize) -> Self {
        let size = size.clamp(1, 2);
        Self {
            name,
            slots: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Pool name used in logs.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Number of slots.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently running a job.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run `job` on the blocking thread pool if a slot is free.
    ///
    /// Returns `None` without running anything when every slot is busy.
    /// The slot is released when the job returns.
    pub fn submit<F, T>(&self, job: F) -> Option<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
            debug!(pool = self.name, "worker pool busy, skipping job");
            return None;
        };
        Some(tokio::task::spawn_blocking(move || {
            let result = job();
            drop(permit);
            result
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn busy_pool_refuses_instead_of_blocking() {
        let pool = WorkerPool::new("test", 1);
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let first = pool
            .submit(move || {
                release_rx.recv().unwrap();
                1
            })
            .unwrap();
        assert_eq!(pool.available(), 0);
        assert!(pool.submit(|| 2).is_none());

        release_tx.send(()).unwrap();
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.submit(|| 3).unwrap().await.unwrap(), 3);
    }

    #[test]
    fn size_is_clamped() {
        assert_eq!(WorkerPool::new("a", 0).size(), 1);
        assert_eq!(WorkerPool::new("b", 8).size(), 2);
    }
}

//! Bounded concurrency for broker deliveries

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Runs delivery handlers concurrently, at most `limit` at a time
///
/// [`WorkerPool::spawn`] waits for a free slot before spawning, which stops the
/// consume loop from pulling more deliveries than it can handle.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    limit: u32,
}

impl WorkerPool {
    /// Create a pool allowing `limit` concurrent tasks (at least one)
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = u32::try_from(limit.max(1)).unwrap_or(u32::MAX);
        Self {
            permits: Arc::new(Semaphore::new(limit as usize)),
            limit,
        }
    }

    /// Spawn `task` once a slot is free
    pub async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        tokio::spawn(async move {
            task.await;
            drop(permit);
        });
    }

    /// Wait until every running task has finished
    #[cfg(test)]
    pub async fn wait_idle(&self) {
        if let Ok(all) = self.permits.acquire_many(self.limit).await {
            drop(all);
        }
    }

    /// Tasks currently running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.limit as usize - self.permits.available_permits()
    }
}

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Bounded pool that completes request futures off the election loop.
///
/// Owned by a node: created at startup with a fixed size and shut down with
/// it. Tasks beyond `size` wait for a free slot; tasks still queued or running
/// at shutdown are dropped.
pub struct WorkerPool {
    name: String,
    size: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        name: impl Into<String>,
        size: usize,
    ) -> Self {
        let size = size.max(1);
        Self {
            name: name.into(),
            size,
            permits: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        }
    }

    /// Queues `task`. Returns `false` if the pool is already shut down.
    pub fn spawn<F>(
        &self,
        task: F,
    ) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            return false;
        }

        let permits = self.permits.clone();
        let token = self.token.clone();
        self.tracker.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = task => {}
            }
        });
        true
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Tasks currently holding a worker slot.
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn shutdown(&self) {
        debug!("shutting down worker pool {}", self.name);
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

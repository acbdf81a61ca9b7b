//! Bounded pool that worker tasks run on.
//!
//! Every worker is spawned right away so it can be tracked and closed,
//! but only `max_workers` of them hold a slot and actually serve their
//! client. The rest wait for a slot.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone)]
pub(crate) struct WorkerPool {
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_workers.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Wait for a free slot. `None` once the pool has been shut down.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slots).acquire_owned().await.ok()
    }

    /// Stop handing out slots. Running workers keep theirs until they end;
    /// nothing is aborted.
    pub fn shutdown(&self) {
        self.slots.close();
        self.tracker.close();
    }

    /// Resolves once `shutdown` has been called and every spawned task
    /// has finished.
    pub async fn wait(&self) {
        self.tracker.wait().await;
    }
}

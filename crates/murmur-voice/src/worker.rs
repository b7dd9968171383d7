//! Bounded pool for blocking inference calls.

use crate::error::VoiceError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Runs blocking closures on tokio's blocking threads, at most `size` at a
/// time, so CPU/GPU-bound inference never stalls the async scheduler.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
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

    /// Number of workers currently free.
    pub fn idle(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn run<T, F>(&self, task: F) -> Result<T, VoiceError>
    where
        F: FnOnce() -> Result<T, VoiceError> + Send + 'static,
        T: Send + 'static,
    {
        self.run_releasable(move |_slot| task()).await
    }

    /// Like [`run`](Self::run), but hands the task its slot so it can give
    /// the slot back before blocking on something other than inference.
    pub async fn run_releasable<T, F>(&self, task: F) -> Result<T, VoiceError>
    where
        F: FnOnce(WorkerSlot) -> Result<T, VoiceError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| VoiceError::Worker(format!("worker pool closed: {}", e)))?;

        tokio::task::spawn_blocking(move || task(WorkerSlot(permit)))
            .await
            .map_err(|e| {
                VoiceError::Worker(format!("blocking task panicked or was cancelled: {}", e))
            })?
    }
}

/// A held worker slot. Freed when released or dropped.
#[derive(Debug)]
pub struct WorkerSlot(OwnedSemaphorePermit);

impl WorkerSlot {
    pub fn release(self) {
        drop(self);
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4)
    }
}

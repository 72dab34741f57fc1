use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::runtime::types::RuntimeError;

/// RAII guard for one worker slot; dropping it frees the slot.
pub struct Permit {
    #[allow(dead_code)]
    permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").finish()
    }
}

/// Point-in-time view of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub capacity: usize,
    /// Slots currently held by running jobs.
    pub active: usize,
    /// Jobs waiting in [`WorkerPool::acquire`] for a slot.
    pub queued: usize,
    pub closed: bool,
}

/// Bounded pool of job slots.
///
/// [`Self::acquire`] waits for a free slot, so a queued job looks like a slow
/// job to whoever is racing it against a deadline.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    queued: Arc<AtomicUsize>,
}

/// Counts one waiter for as long as it is alive, including when the
/// acquiring future is dropped.
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<Permit, RuntimeError> {
        let _waiting = Waiting::enter(&self.queued);
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map(|permit| Permit { permit })
            .map_err(|_| RuntimeError::PoolClosed)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            active: self.capacity.saturating_sub(self.semaphore.available_permits()),
            queued: self.queued.load(Ordering::SeqCst),
            closed: self.semaphore.is_closed(),
        }
    }

    /// Stop admitting work; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

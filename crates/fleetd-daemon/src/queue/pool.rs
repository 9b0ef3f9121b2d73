//! Semaphore-based worker pool.
//!
//! The [`WorkerPool`] bounds how many tasks execute at once. It issues slots
//! via a Tokio semaphore and tracks which task holds each slot so the active
//! set can be enumerated. Fan-out functions additionally pass through a
//! separate gate, taken before their slot, which caps how many of them can sit
//! on a slot while waiting for their per-target jobs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use super::task::TaskId;

/// A held pool slot. Returned to the pool on drop.
pub struct PoolSlot {
    task: TaskId,
    active: Arc<Mutex<HashSet<TaskId>>>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task);
    }
}

/// A held fan-out gate permit.
pub struct FanoutPermit {
    _permit: OwnedSemaphorePermit,
}

/// Fixed-size pool of execution slots.
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    fanout_gate: Arc<Semaphore>,
    workers: usize,
    max_fanouts: usize,
    active: Arc<Mutex<HashSet<TaskId>>>,
}

impl WorkerPool {
    pub fn new(workers: usize, max_fanouts: usize) -> Self {
        info!(workers, max_fanouts, "WorkerPool created");
        Self {
            slots: Arc::new(Semaphore::new(workers)),
            fanout_gate: Arc::new(Semaphore::new(max_fanouts)),
            workers,
            max_fanouts,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Wait for a free slot. Fails only once the pool is closed.
    pub async fn acquire(&self, task: TaskId) -> Result<PoolSlot, PoolClosed> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| PoolClosed)?;
        debug!(task_id = %task, "Pool slot acquired");
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task);
        Ok(PoolSlot {
            task,
            active: Arc::clone(&self.active),
            _permit: permit,
        })
    }

    /// Wait until fewer than `max_fanouts` fan-outs are in flight.
    pub async fn acquire_fanout(&self) -> Result<FanoutPermit, PoolClosed> {
        let permit = Arc::clone(&self.fanout_gate)
            .acquire_owned()
            .await
            .map_err(|_| PoolClosed)?;
        Ok(FanoutPermit { _permit: permit })
    }

    /// Stop handing out slots. Waiters fail with [`PoolClosed`]; held slots stay valid.
    pub fn close(&self) {
        self.slots.close();
        self.fanout_gate.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Tasks currently holding a slot.
    pub fn active_ids(&self) -> Vec<TaskId> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    pub const fn workers(&self) -> usize {
        self.workers
    }

    pub const fn max_fanouts(&self) -> usize {
        self.max_fanouts
    }

    /// Number of free slots.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

/// The pool was closed while waiting for a slot.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("Worker pool has been closed")]
pub struct PoolClosed;

//! Named locks with FIFO hand-off.
//!
//! Each lock name has a ticket counter and a "now serving" number. A ticket is
//! drawn synchronously when a task is enqueued, so tasks contending for the
//! same lock acquire it in submission order regardless of which worker picks
//! them up first. Releasing the lock (dropping the [`LockGuard`]) advances the
//! serving number to the next live ticket; tickets dropped without being used
//! are skipped.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use fleetd_core::LockPolicy;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use super::task::TaskId;

/// Name of a mutually exclusive resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockName(Cow<'static, str>);

impl LockName {
    /// Serialises application updates.
    pub const UPDATE: Self = Self(Cow::Borrowed("update-lock"));
    /// Serialises plugin installs and removals.
    pub const PLUGINS: Self = Self(Cow::Borrowed("plugins-lock"));
    /// Serialises experiment data exports.
    pub const EXPORT_DATA: Self = Self(Cow::Borrowed("export-data-lock"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current holder of a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockHolder {
    pub task: TaskId,
    pub acquired_at: DateTime<Utc>,
}

/// The lock was taken and the policy says not to wait.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Lock {0} is held by another task")]
pub struct LockContention(pub LockName);

#[derive(Debug, Default)]
struct SlotState {
    next_ticket: u64,
    abandoned: BTreeSet<u64>,
    holder: Option<LockHolder>,
}

#[derive(Debug)]
struct LockSlot {
    serving: watch::Sender<u64>,
    state: Mutex<SlotState>,
}

impl LockSlot {
    fn new() -> Self {
        Self {
            serving: watch::Sender::new(0),
            state: Mutex::new(SlotState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move past `done`, skipping abandoned tickets. Caller holds the state lock.
    fn advance(&self, state: &mut SlotState, done: u64) {
        let mut next = done + 1;
        while state.abandoned.remove(&next) {
            next += 1;
        }
        self.serving.send_replace(next);
    }

    fn abandon(&self, ticket: u64) {
        let mut state = self.lock_state();
        if *self.serving.borrow() == ticket {
            self.advance(&mut state, ticket);
        } else {
            state.abandoned.insert(ticket);
        }
    }
}

/// All named locks known to one queue.
#[derive(Debug, Default)]
pub struct LockTable {
    slots: Mutex<HashMap<LockName, Arc<LockSlot>>>,
    policies: HashMap<String, LockPolicy>,
}

impl LockTable {
    pub fn new(policies: HashMap<String, LockPolicy>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            policies,
        }
    }

    pub fn policy(&self, name: &LockName) -> LockPolicy {
        self.policies.get(name.as_str()).copied().unwrap_or_default()
    }

    fn slot(&self, name: &LockName) -> Arc<LockSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(name.clone())
                .or_insert_with(|| Arc::new(LockSlot::new())),
        )
    }

    /// Take the next place in line for `name`.
    pub fn ticket(&self, name: &LockName) -> LockTicket {
        let slot = self.slot(name);
        let number = {
            let mut state = slot.lock_state();
            let n = state.next_ticket;
            state.next_ticket += 1;
            n
        };
        LockTicket {
            name: name.clone(),
            policy: self.policy(name),
            slot: Some(slot),
            number,
        }
    }

    /// Task currently holding `name`, if any.
    pub fn holder(&self, name: &LockName) -> Option<LockHolder> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(name)?.lock_state().holder.clone()
    }
}

/// A place in line for one lock. Dropping an unused ticket gives up the place.
#[derive(Debug)]
pub struct LockTicket {
    name: LockName,
    policy: LockPolicy,
    slot: Option<Arc<LockSlot>>,
    number: u64,
}

impl LockTicket {
    pub const fn name(&self) -> &LockName {
        &self.name
    }

    /// Wait for this ticket's turn and take the lock for `task`.
    ///
    /// Under [`LockPolicy::Reject`] this fails at once unless the ticket is
    /// already being served.
    pub async fn acquire(mut self, task: TaskId) -> Result<LockGuard, LockContention> {
        let Some(slot) = self.slot.clone() else {
            return Err(LockContention(self.name.clone()));
        };
        let number = self.number;
        let mut serving = slot.serving.subscribe();

        if self.policy == LockPolicy::Reject && *serving.borrow() != number {
            debug!(lock = %self.name, task_id = %task, "Lock contended, rejecting");
            return Err(LockContention(self.name.clone()));
        }

        if serving.wait_for(|now| *now == number).await.is_err() {
            return Err(LockContention(self.name.clone()));
        }

        slot.lock_state().holder = Some(LockHolder {
            task,
            acquired_at: Utc::now(),
        });
        debug!(lock = %self.name, task_id = %task, "Lock acquired");

        // The guard now owns the turn.
        self.slot = None;
        Ok(LockGuard {
            name: self.name.clone(),
            slot,
            number,
        })
    }
}

impl Drop for LockTicket {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.abandon(self.number);
        }
    }
}

/// Exclusive hold on a named lock. Released on drop, on every exit path.
#[derive(Debug)]
pub struct LockGuard {
    name: LockName,
    slot: Arc<LockSlot>,
    number: u64,
}

impl LockGuard {
    pub const fn name(&self) -> &LockName {
        &self.name
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut state = self.slot.lock_state();
        state.holder = None;
        self.slot.advance(&mut state, self.number);
        debug!(lock = %self.name, "Lock released");
    }
}

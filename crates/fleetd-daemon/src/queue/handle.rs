//! Handles for retrieving task results.

use std::time::Duration;

use futures::future::join_all;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use super::task::{TaskId, TaskOutcome, TaskSnapshot, TaskState, WaitTimeout};

/// Result handle for one enqueued task.
///
/// Reads never consume the result; any number of handles (or lookups) for the
/// same task see the same outcome.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    rx: watch::Receiver<TaskSnapshot>,
}

impl TaskHandle {
    pub(crate) const fn new(id: TaskId, rx: watch::Receiver<TaskSnapshot>) -> Self {
        Self { id, rx }
    }

    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Current snapshot, without waiting.
    pub fn peek(&self) -> TaskSnapshot {
        self.rx.borrow().clone()
    }

    pub fn state(&self) -> TaskState {
        self.rx.borrow().state
    }

    /// The outcome if the task has finished, without waiting.
    pub fn try_result(&self) -> Option<TaskOutcome> {
        self.rx.borrow().outcome.clone()
    }

    /// Wait up to `timeout` for the outcome.
    ///
    /// On [`WaitTimeout`] the task is not cancelled; it keeps running and a
    /// later call can still collect its result.
    pub async fn get(&self, timeout: Duration) -> Result<TaskOutcome, WaitTimeout> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| WaitTimeout { waited: timeout })
    }

    /// Wait for the outcome without a bound.
    pub async fn wait(&self) -> TaskOutcome {
        let mut rx = self.rx.clone();
        match rx.wait_for(TaskSnapshot::is_terminal).await {
            Ok(snapshot) => snapshot
                .outcome
                .clone()
                .unwrap_or_else(|| TaskOutcome::Failed("Task finished without an outcome".into())),
            Err(_) => TaskOutcome::Failed("Task was dropped before it finished".into()),
        }
    }

    /// Wait up to `timeout` and decode a successful payload as `T`.
    ///
    /// A failed task or an undecodable payload is returned as `Err(message)`.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        timeout: Duration,
    ) -> Result<Result<T, String>, WaitTimeout> {
        Ok(match self.get(timeout).await? {
            TaskOutcome::Succeeded(value) => serde_json::from_value(value).map_err(|e| e.to_string()),
            TaskOutcome::Failed(msg) => Err(msg),
        })
    }
}

/// Handles for a batch submitted with `TaskQueue::map`, in submission order.
#[derive(Debug, Clone)]
pub struct MapHandle {
    handles: Vec<TaskHandle>,
}

impl MapHandle {
    pub(crate) const fn new(handles: Vec<TaskHandle>) -> Self {
        Self { handles }
    }

    pub fn handles(&self) -> &[TaskHandle] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// All outcomes in submission order, waiting at most `timeout` overall.
    pub async fn get(&self, timeout: Duration) -> Result<Vec<TaskOutcome>, WaitTimeout> {
        tokio::time::timeout(timeout, self.join())
            .await
            .map_err(|_| WaitTimeout { waited: timeout })
    }

    /// All outcomes in submission order.
    pub async fn join(&self) -> Vec<TaskOutcome> {
        join_all(self.handles.iter().map(TaskHandle::wait)).await
    }
}

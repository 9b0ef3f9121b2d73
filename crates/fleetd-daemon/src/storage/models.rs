//! Database models for the fleetd daemon.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::queue::{TaskId, TaskOutcome, TaskSnapshot, TaskState};

/// Task result record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskRecord {
    pub id: String,
    pub function: String,
    /// JSON array of positional arguments.
    pub args: String,
    /// JSON object of environment overrides.
    pub env: String,
    pub state: String,
    /// JSON payload of a succeeded task.
    pub result: Option<String>,
    pub error: Option<String>,
    pub enqueued_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

impl TaskRecord {
    /// Rebuild a snapshot. Returns `None` for rows with an unreadable id or state.
    pub fn to_snapshot(&self) -> Option<TaskSnapshot> {
        let state = TaskState::parse(&self.state)?;
        let outcome = match state {
            TaskState::Succeeded => Some(TaskOutcome::Succeeded(
                self.result
                    .as_deref()
                    .and_then(|r| serde_json::from_str(r).ok())
                    .unwrap_or_default(),
            )),
            TaskState::Failed => Some(TaskOutcome::Failed(self.error.clone().unwrap_or_default())),
            TaskState::Pending | TaskState::Running => None,
        };
        Some(TaskSnapshot {
            id: self.id.parse::<TaskId>().ok()?,
            function: self.function.clone(),
            state,
            outcome,
            enqueued_at: DateTime::from_timestamp(self.enqueued_at, 0)?,
            started_at: self.started_at.and_then(|t| DateTime::from_timestamp(t, 0)),
            finished_at: self.finished_at.and_then(|t| DateTime::from_timestamp(t, 0)),
        })
    }
}

/// Cluster member record from the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Worker {
    pub pioreactor_unit: String,
    /// Explicit base URL or host; `None` means resolve by name.
    pub address: Option<String>,
    pub is_active: i64,
    pub added_at: String,
}

/// Experiment assignment record from the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExperimentAssignment {
    pub pioreactor_unit: String,
    pub experiment: String,
    pub assigned_at: String,
}

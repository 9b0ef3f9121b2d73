//! Task identity, state, arguments and errors.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetd_core::db::DatabaseError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::lock::{LockContention, LockName};
use crate::cluster::DispatchError;
use crate::process::{EnvOverrides, ProcessError};

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload", rename_all = "lowercase")]
pub enum TaskOutcome {
    /// The function returned; the value is exactly what it produced.
    Succeeded(Value),
    /// The function returned an error or panicked.
    Failed(String),
}

impl TaskOutcome {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub const fn state(&self) -> TaskState {
        match self {
            Self::Succeeded(_) => TaskState::Succeeded,
            Self::Failed(_) => TaskState::Failed,
        }
    }

    /// `(success, payload)`; a failure's payload is its message.
    pub fn into_pair(self) -> (bool, Value) {
        match self {
            Self::Succeeded(v) => (true, v),
            Self::Failed(msg) => (false, Value::String(msg)),
        }
    }
}

/// Positional arguments plus allow-listed environment overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskArgs {
    pub args: Vec<Value>,
    pub env: EnvOverrides,
}

impl TaskArgs {
    pub fn new(args: Vec<Value>) -> Self {
        Self {
            args,
            env: EnvOverrides::new(),
        }
    }

    /// Arguments from plain strings.
    pub fn strings<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(args.into_iter().map(|s| Value::String(s.into())).collect())
    }

    #[must_use]
    pub fn with_env(mut self, env: EnvOverrides) -> Self {
        self.env = env;
        self
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Required string argument at `index`.
    pub fn str_at(&self, index: usize) -> Result<&str, TaskError> {
        self.args
            .get(index)
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::InvalidArguments(format!("argument {index} must be a string")))
    }

    /// Required list-of-strings argument at `index`.
    pub fn string_list_at(&self, index: usize) -> Result<Vec<String>, TaskError> {
        let invalid = || TaskError::InvalidArguments(format!("argument {index} must be a list of strings"));
        self.args
            .get(index)
            .and_then(Value::as_array)
            .ok_or_else(invalid)?
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
            .collect()
    }

    /// All arguments from `start` on, each of which must be a string.
    pub fn strings_from(&self, start: usize) -> Result<Vec<String>, TaskError> {
        self.args
            .iter()
            .enumerate()
            .skip(start)
            .map(|(i, v)| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    TaskError::InvalidArguments(format!("argument {i} must be a string"))
                })
            })
            .collect()
    }
}

/// Point-in-time view of a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub function: String,
    pub state: TaskState,
    pub outcome: Option<TaskOutcome>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    pub(crate) fn pending(id: TaskId, function: &str) -> Self {
        Self {
            id,
            function: function.to_string(),
            state: TaskState::Pending,
            outcome: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Errors a task function can return. Recorded as the task's failure message.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Lock {0} is held by another task")]
    LockContention(LockName),

    #[error("Command `{command}` exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Timeout(#[from] WaitTimeout),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<LockContention> for TaskError {
    fn from(e: LockContention) -> Self {
        Self::LockContention(e.0)
    }
}

/// Errors from submitting work to the queue.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Unknown task function: {0}")]
    UnknownFunction(String),

    #[error("Task queue is closed")]
    Closed,
}

/// A bounded wait elapsed before the task finished. The task keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Timed out after {waited:?} waiting for task result")]
pub struct WaitTimeout {
    pub waited: Duration,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn task_id_round_trips_through_display() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }

    #[test]
    fn state_strings() {
        for state in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Succeeded,
            TaskState::Failed,
        ] {
            assert_eq!(TaskState::parse(state.as_str()), Some(state));
        }
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert_eq!(TaskState::parse("done"), None);
    }

    #[test]
    fn failure_pair_carries_message() {
        let (ok, payload) = TaskOutcome::Failed("boom".into()).into_pair();
        assert!(!ok);
        assert_eq!(payload, json!("boom"));
    }

    #[test]
    fn outcome_serializes_with_status_and_payload() {
        let failed = serde_json::to_value(TaskOutcome::Failed("boom".into())).unwrap();
        assert_eq!(failed, json!({"status": "failed", "payload": "boom"}));

        let done = TaskOutcome::Succeeded(json!([true, "ok"]));
        let encoded = serde_json::to_value(&done).unwrap();
        assert_eq!(encoded, json!({"status": "succeeded", "payload": [true, "ok"]}));
        assert_eq!(serde_json::from_value::<TaskOutcome>(encoded).unwrap(), done);
    }

    #[test]
    fn argument_accessors() {
        let args = TaskArgs::new(vec![json!("exp"), json!(["u1", "u2"]), json!(3), json!("x")]);
        assert_eq!(args.str_at(0).unwrap(), "exp");
        assert_eq!(args.string_list_at(1).unwrap(), vec!["u1", "u2"]);
        assert!(matches!(args.str_at(2), Err(TaskError::InvalidArguments(_))));
        assert!(args.str_at(9).is_err());
        assert!(args.strings_from(2).is_err());
        assert_eq!(args.strings_from(3).unwrap(), vec!["x"]);
    }

    #[test]
    fn task_args_deserialize_with_defaults() {
        let args: TaskArgs =
            serde_json::from_value(json!({"env": {"EXPERIMENT": "e1", "PATH": "/x"}})).unwrap();
        assert!(args.is_empty());
        assert_eq!(args.env.get("EXPERIMENT"), Some("e1"));
        assert_eq!(args.env.len(), 1);
    }
}

//! Task functions and the name-to-function registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::TaskContext;
use super::lock::LockName;
use super::task::{TaskArgs, TaskError};

/// An operation the queue can run by name.
#[async_trait]
pub trait TaskFunction: Send + Sync {
    fn name(&self) -> &str;

    /// Named lock held for the whole call.
    fn lock(&self) -> Option<&LockName> {
        None
    }

    /// Whether the call waits on per-target jobs of its own. Fan-out
    /// functions pass through the fan-out gate before taking a pool slot.
    fn is_fanout(&self) -> bool {
        false
    }

    async fn call(&self, ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError>;
}

/// A [`TaskFunction`] backed by an async fn or closure.
pub struct FnTask<F> {
    name: String,
    lock: Option<LockName>,
    fanout: bool,
    func: F,
}

impl<F, Fut> FnTask<F>
where
    F: Fn(TaskContext, TaskArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            lock: None,
            fanout: false,
            func,
        }
    }

    #[must_use]
    pub fn with_lock(mut self, lock: LockName) -> Self {
        self.lock = Some(lock);
        self
    }

    #[must_use]
    pub const fn fanout(mut self) -> Self {
        self.fanout = true;
        self
    }
}

#[async_trait]
impl<F, Fut> TaskFunction for FnTask<F>
where
    F: Fn(TaskContext, TaskArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TaskError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> Option<&LockName> {
        self.lock.as_ref()
    }

    fn is_fanout(&self) -> bool {
        self.fanout
    }

    async fn call(&self, ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
        (self.func)(ctx, args).await
    }
}

/// Functions the queue accepts, keyed by name.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    functions: HashMap<String, Arc<dyn TaskFunction>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `function`, replacing any earlier one with the same name.
    pub fn register(&mut self, function: impl TaskFunction + 'static) -> &mut Self {
        self.functions
            .insert(function.name().to_string(), Arc::new(function));
        self
    }

    #[must_use]
    pub fn with(mut self, function: impl TaskFunction + 'static) -> Self {
        self.register(function);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

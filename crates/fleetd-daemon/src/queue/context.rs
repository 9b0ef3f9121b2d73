//! What a running task can reach.

use std::sync::Arc;
use std::time::Duration;

use fleetd_core::Config;

use super::TaskQueue;
use super::task::TaskId;
use crate::cluster::{AddressResolver, ClusterDispatcher, DispatchError, HostnameResolver};
use crate::events::{EventPublisher, EventSink, TracingSink};
use crate::process::ProcessRunner;

/// Shared collaborators handed to every task.
#[derive(Debug, Clone)]
pub struct TaskServices {
    pub runner: ProcessRunner,
    pub dispatcher: ClusterDispatcher,
    pub events: EventPublisher,
}

impl TaskServices {
    pub fn new(
        config: &Config,
        hostname: &str,
        resolver: Arc<dyn AddressResolver>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, DispatchError> {
        Ok(Self {
            runner: ProcessRunner::new(&config.processes),
            dispatcher: ClusterDispatcher::new(
                resolver,
                Duration::from_millis(config.cluster.request_timeout_ms),
            )?,
            events: EventPublisher::new(sink, &config.events.topic_root, hostname),
        })
    }

    /// Hostname resolution and tracing output, for running without a database.
    pub fn local(config: &Config, hostname: &str) -> Result<Self, DispatchError> {
        let resolver = HostnameResolver::new(&config.cluster.domain_suffix, config.cluster.unit_port);
        Self::new(config, hostname, Arc::new(resolver), Arc::new(TracingSink))
    }
}

/// Passed to [`TaskFunction::call`](super::TaskFunction::call).
#[derive(Clone)]
pub struct TaskContext {
    task_id: TaskId,
    queue: TaskQueue,
}

impl TaskContext {
    pub(crate) const fn new(task_id: TaskId, queue: TaskQueue) -> Self {
        Self { task_id, queue }
    }

    pub const fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// The queue running this task, for submitting sub-jobs.
    pub const fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.queue.services().runner
    }

    pub fn dispatcher(&self) -> &ClusterDispatcher {
        &self.queue.services().dispatcher
    }

    pub fn events(&self) -> &EventPublisher {
        &self.queue.services().events
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

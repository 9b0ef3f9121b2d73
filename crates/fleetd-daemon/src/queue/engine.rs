//! The task queue.
//!
//! Submission is synchronous and cheap: it resolves the function, draws a
//! lock ticket if the function needs one, and spawns a Tokio task that waits
//! for its turn. Each task then takes, in order, its named lock, the fan-out
//! gate (fan-out functions only) and a pool slot, so tasks queued behind a
//! lock never occupy a slot. The function itself runs in a nested task so a
//! panic is recorded as a failure instead of tearing anything down.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use fleetd_core::LockPolicy;
use fleetd_core::config::QueueConfig;
use serde_json::Value;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use super::context::{TaskContext, TaskServices};
use super::handle::{MapHandle, TaskHandle};
use super::lock::{LockGuard, LockHolder, LockName, LockTable, LockTicket};
use super::pool::WorkerPool;
use super::registry::{TaskFunction, TaskRegistry};
use super::task::{QueueError, TaskArgs, TaskError, TaskId, TaskOutcome, TaskSnapshot, TaskState};
use crate::storage::{Database, DatabaseError};

type SnapshotSender = Arc<watch::Sender<TaskSnapshot>>;

/// Configures and builds a [`TaskQueue`].
pub struct QueueBuilder {
    registry: TaskRegistry,
    services: TaskServices,
    config: QueueConfig,
    lock_policies: HashMap<String, LockPolicy>,
    store: Option<Database>,
}

impl QueueBuilder {
    #[must_use]
    pub fn config(mut self, config: &QueueConfig) -> Self {
        self.config = config.clone();
        self
    }

    #[must_use]
    pub fn lock_policies(mut self, policies: HashMap<String, LockPolicy>) -> Self {
        self.lock_policies = policies;
        self
    }

    /// Persist every state transition to `db`.
    #[must_use]
    pub fn store(mut self, db: Database) -> Self {
        self.store = Some(db);
        self
    }

    pub fn build(self) -> TaskQueue {
        info!(
            workers = self.config.workers,
            max_concurrent_fanouts = self.config.max_concurrent_fanouts,
            functions = self.registry.len(),
            persistent = self.store.is_some(),
            "Task queue started"
        );
        TaskQueue {
            inner: Arc::new(QueueInner {
                pool: WorkerPool::new(self.config.workers, self.config.max_concurrent_fanouts),
                locks: LockTable::new(self.lock_policies),
                registry: self.registry,
                services: self.services,
                store: self.store,
                tasks: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                result_ttl: Duration::from_secs(self.config.result_ttl_secs),
                sweep_interval: Duration::from_secs(self.config.sweep_interval_secs.max(1)),
            }),
        }
    }
}

/// Asynchronous executor for registered task functions.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    registry: TaskRegistry,
    services: TaskServices,
    pool: WorkerPool,
    locks: LockTable,
    store: Option<Database>,
    tasks: Mutex<HashMap<TaskId, SnapshotSender>>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    result_ttl: Duration,
    sweep_interval: Duration,
}

impl TaskQueue {
    pub fn builder(registry: TaskRegistry, services: TaskServices) -> QueueBuilder {
        QueueBuilder {
            registry,
            services,
            config: QueueConfig::default(),
            lock_policies: HashMap::new(),
            store: None,
        }
    }

    pub fn services(&self) -> &TaskServices {
        &self.inner.services
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    /// Submit `function` for asynchronous execution. Never waits.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, function: &str, args: TaskArgs) -> Result<TaskHandle, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let func = self
            .inner
            .registry
            .get(function)
            .ok_or_else(|| QueueError::UnknownFunction(function.to_string()))?;

        let id = TaskId::new();
        // Drawn now so lock order follows submission order.
        let ticket = func.lock().map(|name| self.inner.locks.ticket(name));

        let (tx, rx) = watch::channel(TaskSnapshot::pending(id, func.name()));
        let tx = Arc::new(tx);
        self.tasks().insert(id, Arc::clone(&tx));
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);

        info!(task_id = %id, function, args = args.len(), env = ?args.env, "Task enqueued");

        let queue = self.clone();
        tokio::spawn(async move { queue.execute(id, func, args, ticket, tx).await });

        Ok(TaskHandle::new(id, rx))
    }

    /// Submit one `function` call per argument set. Outcomes come back in
    /// submission order.
    pub fn map(&self, function: &str, batch: Vec<TaskArgs>) -> Result<MapHandle, QueueError> {
        if !self.inner.registry.contains(function) {
            return Err(QueueError::UnknownFunction(function.to_string()));
        }
        batch
            .into_iter()
            .map(|args| self.enqueue(function, args))
            .collect::<Result<Vec<_>, _>>()
            .map(MapHandle::new)
    }

    /// Snapshot of a task, from memory or, once evicted, from the store.
    pub async fn lookup(&self, id: TaskId) -> Option<TaskSnapshot> {
        let live = self.tasks().get(&id).cloned();
        if let Some(tx) = live {
            return Some(tx.borrow().clone());
        }

        let store = self.inner.store.as_ref()?;
        match store.get_task(id).await {
            Ok(record) => record.to_snapshot(),
            Err(DatabaseError::NotFound(_)) => None,
            Err(e) => {
                warn!(task_id = %id, error = %e, "Failed to load task from store");
                None
            }
        }
    }

    /// Handle for a task still held in memory.
    pub fn handle(&self, id: TaskId) -> Option<TaskHandle> {
        let tx = self.tasks().get(&id).cloned()?;
        Some(TaskHandle::new(id, tx.subscribe()))
    }

    pub fn lock_holder(&self, name: &LockName) -> Option<LockHolder> {
        self.inner.locks.holder(name)
    }

    /// Size of the worker pool.
    pub fn workers(&self) -> usize {
        self.inner.pool.workers()
    }

    /// Tasks currently holding a pool slot.
    pub fn running(&self) -> Vec<TaskId> {
        self.inner.pool.active_ids()
    }

    /// Tasks submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting tasks.
    ///
    /// Running tasks finish normally. Tasks still waiting for a slot fail
    /// with [`QueueError::Closed`].
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.pool.close();
            info!(in_flight = self.in_flight(), "Task queue closed");
        }
    }

    /// Wait up to `grace` for in-flight tasks to finish. Returns whether they did.
    pub async fn drain(&self, grace: Duration) -> bool {
        let wait = async {
            loop {
                let idle = self.inner.idle.notified();
                tokio::pin!(idle);
                idle.as_mut().enable();
                if self.in_flight() == 0 {
                    return;
                }
                idle.await;
            }
        };
        tokio::time::timeout(grace, wait).await.is_ok()
    }

    /// Evict finished tasks older than the result TTL from memory and store.
    /// Returns how many were evicted from memory.
    pub async fn sweep(&self) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(self.inner.result_ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };

        let evicted = {
            let mut tasks = self.tasks();
            let before = tasks.len();
            tasks.retain(|_, tx| {
                let snapshot = tx.borrow();
                !(snapshot.is_terminal() && snapshot.finished_at.is_some_and(|at| at <= cutoff))
            });
            before - tasks.len()
        };

        if let Some(store) = &self.inner.store {
            match store.purge_finished_tasks(cutoff.timestamp()).await {
                Ok(purged) => debug!(evicted, purged, "Swept expired task results"),
                Err(e) => warn!(error = %e, "Failed to purge expired task results"),
            }
        }
        evicted
    }

    /// Run [`TaskQueue::sweep`] periodically until `shutdown` changes.
    pub fn spawn_sweeper(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(queue.inner.sweep_interval);
            timer.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        queue.sweep().await;
                    }
                    _ = shutdown.changed() => {
                        info!("Result sweeper shutting down");
                        return;
                    }
                }
            }
        })
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, SnapshotSender>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn execute(
        self,
        id: TaskId,
        func: Arc<dyn TaskFunction>,
        args: TaskArgs,
        ticket: Option<LockTicket>,
        tx: SnapshotSender,
    ) {
        let function = func.name().to_string();
        if let Some(store) = &self.inner.store
            && let Err(e) = store.insert_task(id, &function, &args).await
        {
            warn!(task_id = %id, error = %e, "Failed to persist enqueued task");
        }

        let experiment = args.env.get("EXPERIMENT").map(str::to_string);
        // The lock stays held until the outcome is recorded, so the next
        // holder never starts before this result is visible.
        let (outcome, lock) = self.run(id, func, args, ticket, &tx).await;
        match &outcome {
            TaskOutcome::Succeeded(_) => info!(task_id = %id, function, "Task succeeded"),
            TaskOutcome::Failed(msg) => warn!(task_id = %id, function, error = %msg, "Task failed"),
        }

        let finished_at = Utc::now();
        tx.send_modify(|s| {
            s.state = outcome.state();
            s.outcome = Some(outcome.clone());
            s.finished_at = Some(finished_at);
        });

        if let Some(store) = &self.inner.store
            && let Err(e) = store.finish_task(id, &outcome, finished_at.timestamp()).await
        {
            warn!(task_id = %id, error = %e, "Failed to persist task outcome");
        }
        drop(lock);

        if let TaskOutcome::Failed(msg) = &outcome {
            self.inner
                .services
                .events
                .publish_error(&Value::String(msg.clone()), &function, experiment.as_deref())
                .await;
        }

        if self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }

    async fn run(
        &self,
        id: TaskId,
        func: Arc<dyn TaskFunction>,
        args: TaskArgs,
        ticket: Option<LockTicket>,
        tx: &SnapshotSender,
    ) -> (TaskOutcome, Option<LockGuard>) {
        let lock = match ticket {
            Some(ticket) => match ticket.acquire(id).await {
                Ok(guard) => Some(guard),
                Err(e) => return (TaskOutcome::Failed(TaskError::from(e).to_string()), None),
            },
            None => None,
        };
        let closed = || TaskOutcome::Failed(QueueError::Closed.to_string());
        let _gate = if func.is_fanout() {
            match self.inner.pool.acquire_fanout().await {
                Ok(permit) => Some(permit),
                Err(_) => return (closed(), lock),
            }
        } else {
            None
        };
        let Ok(_slot) = self.inner.pool.acquire(id).await else {
            return (closed(), lock);
        };

        tx.send_modify(|s| {
            s.state = TaskState::Running;
            s.started_at = Some(Utc::now());
        });
        if let Some(store) = &self.inner.store
            && let Err(e) = store.mark_task_running(id).await
        {
            warn!(task_id = %id, error = %e, "Failed to persist task start");
        }
        debug!(task_id = %id, function = func.name(), "Task started");

        let ctx = TaskContext::new(id, self.clone());
        let call = tokio::spawn(async move { func.call(ctx, args).await });
        let outcome = match call.await {
            Ok(Ok(value)) => TaskOutcome::Succeeded(value),
            Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
            Err(join) if join.is_panic() => {
                TaskOutcome::Failed(format!("Task panicked: {}", panic_message(join.into_panic())))
            }
            Err(join) => TaskOutcome::Failed(join.to_string()),
        };
        (outcome, lock)
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("workers", &self.inner.pool.workers())
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

//! Asynchronous task execution.
//!
//! - [`TaskQueue`]: accepts named function calls and runs them on a fixed-size
//!   worker pool, recording each outcome.
//! - [`LockTable`]: named locks with FIFO hand-off, held for a whole call.
//! - [`TaskHandle`] / [`MapHandle`]: bounded and unbounded result retrieval.
//! - [`TaskRegistry`]: the functions the queue can run.

mod context;
mod engine;
mod handle;
pub mod lock;
pub mod pool;
mod registry;
mod task;

pub use context::{TaskContext, TaskServices};
pub use engine::{QueueBuilder, TaskQueue};
pub use handle::{MapHandle, TaskHandle};
pub use lock::{LockContention, LockGuard, LockHolder, LockName, LockTable, LockTicket};
pub use pool::{PoolClosed, WorkerPool};
pub use registry::{FnTask, TaskFunction, TaskRegistry};
pub use task::{
    QueueError, TaskArgs, TaskError, TaskId, TaskOutcome, TaskSnapshot, TaskState, WaitTimeout,
};

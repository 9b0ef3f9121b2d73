//! fleetd Daemon Library
//!
//! Core functionality for the fleetd daemon:
//! - Task queue with a bounded worker pool and FIFO named locks
//! - External command execution, waited or detached
//! - Cluster fan-out to worker units over HTTP
//! - SQLite storage for task results, workers and time series
//! - HTTP API for task submission and result lookup

pub mod cluster;
pub mod events;
pub mod process;
pub mod queue;
pub mod sampler;
pub mod server;
pub mod storage;
pub mod tasks;

//! `SQLite` storage for the fleetd daemon.
//!
//! Provides persistence for task results, cluster membership and the
//! per-experiment time series read by the sampler.

mod db;
mod models;
mod queries;
mod queries_series;
mod queries_workers;

pub use db::{Database, DatabaseError};
pub use models::*;
pub use queries_series::TimeSeriesQuery;

//! fleetd Core Library
//!
//! Shared functionality for fleetd components:
//! - Configuration resolution and validation
//! - Common error types
//! - `SQLite` pool helpers and the `define_database!` macro
//! - Validated identifiers and UTC timestamps

pub mod config;
pub mod db;
pub mod error;
pub mod ident;
pub mod time;
pub mod tracing_init;

pub use config::{Config, LockPolicy};
pub use error::{Error, Result};
pub use ident::Identifier;

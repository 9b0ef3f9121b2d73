//! External process execution.
//!
//! Commands are built from a fixed program plus literal arguments, never
//! through a shell. Waited commands report their exit status as data; detached
//! commands are handed to the process-wide [`Reaper`].

pub mod env;
pub mod reaper;
pub mod runner;

pub use env::{ALLOWED_ENV, EnvOverrides};
pub use reaper::Reaper;
pub use runner::{CommandOutcome, CommandSpec, ProcessRunner};

/// Errors from spawning or supervising a process.
///
/// A non-zero exit status is not an error; see [`CommandOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Child reaper is not installed")]
    ReaperNotInstalled,

    #[error("Child reaper is already installed")]
    ReaperAlreadyInstalled,

    #[error("Failed to start reaper thread: {0}")]
    ReaperThread(#[source] std::io::Error),

    #[error("Child reaper has stopped")]
    ReaperStopped,
}

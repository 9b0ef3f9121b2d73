//! Process-wide reaper for detached children.
//!
//! Detached commands are never waited on by whoever spawned them. Instead the
//! child is handed to a single reaper thread that polls every tracked child
//! with `try_wait` and drops it once it has exited, so terminated children do
//! not linger as zombie entries in the process table.
//!
//! The reaper is global state for the whole process. It is installed once,
//! explicitly, during startup via [`Reaper::install`] and lives until the
//! process exits.

use std::process::Child;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::ProcessError;

static REAPER: OnceLock<Reaper> = OnceLock::new();

/// Handle to the process-wide reaper thread.
#[derive(Debug)]
pub struct Reaper {
    tx: mpsc::Sender<Child>,
    tracked: Arc<AtomicUsize>,
    poll_interval: Duration,
}

impl Reaper {
    /// Start the reaper thread. Affects the whole process; call once at startup.
    ///
    /// Returns [`ProcessError::ReaperAlreadyInstalled`] on any later call.
    pub fn install(poll_interval: Duration) -> Result<&'static Self, ProcessError> {
        if REAPER.get().is_some() {
            return Err(ProcessError::ReaperAlreadyInstalled);
        }

        let (tx, rx) = mpsc::channel::<Child>();
        let tracked = Arc::new(AtomicUsize::new(0));
        let thread_tracked = Arc::clone(&tracked);
        std::thread::Builder::new()
            .name("fleetd-reaper".to_string())
            .spawn(move || reap_loop(&rx, &thread_tracked, poll_interval))
            .map_err(ProcessError::ReaperThread)?;

        // A lost race drops our sender, which lets the spare thread exit.
        REAPER
            .set(Self {
                tx,
                tracked,
                poll_interval,
            })
            .map_err(|_| ProcessError::ReaperAlreadyInstalled)?;

        info!(poll_ms = poll_interval.as_millis(), "Child reaper installed");
        REAPER.get().ok_or(ProcessError::ReaperNotInstalled)
    }

    /// The installed reaper, if [`Reaper::install`] has run.
    pub fn get() -> Option<&'static Self> {
        REAPER.get()
    }

    /// Hand a child over; the reaper owns it from here on.
    pub fn track(&self, child: Child) -> Result<(), ProcessError> {
        self.tracked.fetch_add(1, Ordering::SeqCst);
        self.tx.send(child).map_err(|_| {
            self.tracked.fetch_sub(1, Ordering::SeqCst);
            ProcessError::ReaperStopped
        })
    }

    /// Children handed over and not yet reaped.
    pub fn tracked(&self) -> usize {
        self.tracked.load(Ordering::SeqCst)
    }

    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

fn reap_loop(rx: &mpsc::Receiver<Child>, tracked: &AtomicUsize, poll_interval: Duration) {
    let mut children: Vec<Child> = Vec::new();
    let mut disconnected = false;

    loop {
        if disconnected {
            if children.is_empty() {
                return;
            }
            std::thread::sleep(poll_interval);
        } else {
            match rx.recv_timeout(poll_interval) {
                Ok(child) => children.push(child),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => disconnected = true,
            }
            while let Ok(child) = rx.try_recv() {
                children.push(child);
            }
        }

        children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid = child.id(), %status, "Reaped detached child");
                tracked.fetch_sub(1, Ordering::SeqCst);
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(pid = child.id(), error = %e, "Failed to poll detached child");
                tracked.fetch_sub(1, Ordering::SeqCst);
                false
            }
        });
    }
}

//! fleetd daemon
//!
//! Runs the task queue for one unit and serves the HTTP API that submits
//! tasks, reports their results and exposes the leader's cluster views.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use fleetd_core::config::{self, Config};
use fleetd_daemon::cluster::{HostnameResolver, WorkerRegistryResolver};
use fleetd_daemon::events::TracingSink;
use fleetd_daemon::process::Reaper;
use fleetd_daemon::queue::{TaskQueue, TaskServices};
use fleetd_daemon::server::{self, AppState};
use fleetd_daemon::storage::Database;
use fleetd_daemon::tasks;

/// How long in-flight tasks get to finish after the server stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "fleetd")]
#[command(version, about = "fleetd daemon - task queue and cluster control plane")]
struct Args {
    /// Configuration file (JSON), layered over the global settings file
    #[arg(long, env = "FLEETD_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen port
    #[arg(long)]
    port: Option<u16>,

    /// Worker pool size
    #[arg(long)]
    workers: Option<usize>,

    /// Name this unit reports as; defaults to the system hostname
    #[arg(long)]
    hostname: Option<String>,

    /// Database file path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "FLEETD_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// CLI flags win over every config layer.
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.daemon.port = port;
        }
        if let Some(workers) = self.workers {
            config.queue.workers = workers;
        }
        if let Some(hostname) = &self.hostname {
            config.daemon.hostname = Some(hostname.clone());
        }
        if let Some(path) = &self.db_path {
            config.daemon.database_path = Some(path.clone());
        }
        if let Some(level) = &self.log_level {
            config.daemon.log_level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = config::load_config(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let log_filter = format!("fleetd_daemon={}", config.daemon.log_level);
    fleetd_core::tracing_init::init_tracing(&log_filter, args.log_json);

    let hostname = config
        .daemon
        .hostname
        .clone()
        .unwrap_or_else(system_hostname);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        unit = %hostname,
        port = config.daemon.port,
        workers = config.queue.workers,
        "Starting fleetd"
    );

    // Must exist before any detached job is spawned.
    Reaper::install(Duration::from_millis(config.processes.reaper_poll_ms))?;

    let db_path = match &config.daemon.database_path {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).await?;

    let resolver = WorkerRegistryResolver::new(
        db.clone(),
        HostnameResolver::new(&config.cluster.domain_suffix, config.cluster.unit_port),
    );
    let services = TaskServices::new(&config, &hostname, Arc::new(resolver), Arc::new(TracingSink))?;

    let queue = TaskQueue::builder(tasks::catalog(), services)
        .config(&config.queue)
        .lock_policies(config.locks.clone())
        .store(db.clone())
        .build();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = queue.spawn_sweeper(shutdown_rx);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.daemon.port));
    let state = AppState {
        queue: queue.clone(),
        db,
        unit: hostname,
    };
    server::serve(addr, state, shutdown_signal()).await?;

    queue.close();
    if !queue.drain(SHUTDOWN_GRACE).await {
        warn!(in_flight = queue.in_flight(), "Tasks still running at shutdown");
    }
    let _ = shutdown_tx.send(true);
    let _ = sweeper.await;

    info!("Daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        () = sigterm => {
            info!("Received SIGTERM shutdown signal");
        }
    }
}

/// `$XDG_DATA_HOME/fleetd/fleetd.db`, else `~/.fleetd/fleetd.db`.
fn default_db_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = config::database_path() {
        return Ok(path);
    }
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".fleetd").join("fleetd.db"))
}

fn system_hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

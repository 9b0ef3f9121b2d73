//! Configuration resolution for fleetd.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/fleetd/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete fleetd configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonConfig,
    pub queue: QueueConfig,
    pub cluster: ClusterConfig,
    pub processes: ProcessConfig,
    pub events: EventsConfig,
    /// Contention policy per lock name. Unlisted locks queue.
    pub locks: HashMap<String, LockPolicy>,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Name this unit reports in responses and log topics. Defaults to `$HOSTNAME`.
    pub hostname: Option<String>,
    pub port: u16,
    pub database_path: Option<PathBuf>,
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            hostname: None,
            port: 8080,
            database_path: None,
            log_level: "info".to_string(),
        }
    }
}

/// Worker pool sizing and result retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of pool slots (tasks executing at once).
    pub workers: usize,
    /// Fan-out calls allowed in flight at once. Each holds one slot while it waits.
    pub max_concurrent_fanouts: usize,
    /// Non-fan-out tasks expected to run alongside the fan-outs.
    pub max_concurrent_tasks: usize,
    /// How long terminal results stay retrievable.
    pub result_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_concurrent_fanouts: 2,
            max_concurrent_tasks: 4,
            result_ttl_secs: 60 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl QueueConfig {
    /// Enforce the pool sizing rule.
    ///
    /// A fan-out occupies a slot while its per-target jobs need slots of
    /// their own, so the pool must be strictly larger than the fan-out depth
    /// plus the other tasks that may run at the same time.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_fanouts == 0 {
            return Err(Error::Config(
                "queue.max_concurrent_fanouts must be at least 1".to_string(),
            ));
        }
        let required = self.max_concurrent_fanouts + self.max_concurrent_tasks;
        if self.workers <= required {
            return Err(Error::Config(format!(
                "queue.workers ({}) must exceed max_concurrent_fanouts ({}) + max_concurrent_tasks ({})",
                self.workers, self.max_concurrent_fanouts, self.max_concurrent_tasks
            )));
        }
        Ok(())
    }
}

/// Cluster fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Per-target request timeout.
    pub request_timeout_ms: u64,
    /// Port the unit agents listen on.
    pub unit_port: u16,
    /// Domain appended to bare unit names when resolving (`unit1` -> `unit1.local`).
    pub domain_suffix: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 1000,
            unit_port: 80,
            domain_suffix: "local".to_string(),
        }
    }
}

/// External executables and the detached-child reaper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Single-unit administrative CLI.
    pub pio: PathBuf,
    /// Fleet-wide CLI (accepts `--units`/`-y`).
    pub pios: PathBuf,
    pub reaper_poll_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            pio: PathBuf::from("/usr/local/bin/pio"),
            pios: PathBuf::from("/usr/local/bin/pios"),
            reaper_poll_ms: 100,
        }
    }
}

/// Log event publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub topic_root: String,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            topic_root: "pioreactor".to_string(),
        }
    }
}

/// What a task does when its named lock is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockPolicy {
    /// Wait in line behind the holder (FIFO).
    #[default]
    Queue,
    /// Fail immediately with a lock-contention error.
    Reject,
}

impl Config {
    /// Validate cross-field invariants. Violations are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        if self.cluster.request_timeout_ms == 0 {
            return Err(Error::Config(
                "cluster.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.processes.reaper_poll_ms == 0 {
            return Err(Error::Config(
                "processes.reaper_poll_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Policy configured for `lock`, defaulting to [`LockPolicy::Queue`].
    pub fn lock_policy(&self, lock: &str) -> LockPolicy {
        self.locks.get(lock).copied().unwrap_or_default()
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        let global = load_config_file(&global_path)?;
        merge_config(&mut config, global);
    }

    if let Some(path) = explicit {
        let overlay = load_config_file(path)?;
        merge_config(&mut config, overlay);
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
        .map(|p| p.join("fleetd").join("settings.json"))
}

/// Get the default database path for the daemon.
pub fn database_path() -> Option<PathBuf> {
    std::env::var("XDG_DATA_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".local").join("share"))
        })
        .map(|p| p.join("fleetd").join("fleetd.db"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    if overlay.daemon.hostname.is_some() {
        base.daemon.hostname = overlay.daemon.hostname;
    }
    if overlay.daemon.database_path.is_some() {
        base.daemon.database_path = overlay.daemon.database_path;
    }
    base.daemon.port = overlay.daemon.port;
    base.daemon.log_level = overlay.daemon.log_level;

    base.queue = overlay.queue;
    base.cluster = overlay.cluster;
    base.processes = overlay.processes;
    base.events = overlay.events;

    base.locks.extend(overlay.locks);
}

/// Apply `FLEETD_*` overrides. `lookup` abstracts the environment for tests.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(n) = lookup("FLEETD_WORKERS").and_then(|v| v.parse().ok()) {
        config.queue.workers = n;
    }
    if let Some(n) = lookup("FLEETD_PORT").and_then(|v| v.parse().ok()) {
        config.daemon.port = n;
    }
    if let Some(val) = lookup("FLEETD_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Some(val) = lookup("FLEETD_HOSTNAME") {
        config.daemon.hostname = Some(val);
    }
    if let Some(val) = lookup("FLEETD_DB_PATH") {
        config.daemon.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("FLEETD_PIO_EXECUTABLE") {
        config.processes.pio = PathBuf::from(val);
    }
    if let Some(val) = lookup("FLEETD_PIOS_EXECUTABLE") {
        config.processes.pios = PathBuf::from(val);
    }
}

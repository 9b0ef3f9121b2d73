//! The administrative operations the queue runs.
//!
//! Every function takes positional JSON arguments plus allow-listed
//! environment overrides and returns a JSON value. Exit codes of external
//! commands are data, not errors: most functions report them as a boolean or a
//! `[success, text]` pair.

mod cluster;
mod pio;
mod system;

use serde_json::{Value, json};

use crate::process::{CommandOutcome, CommandSpec};
use crate::queue::{FnTask, LockName, TaskError, TaskRegistry};

/// Registry with every built-in function.
pub fn catalog() -> TaskRegistry {
    TaskRegistry::new()
        .with(FnTask::new("pio", pio::pio))
        .with(FnTask::new("pios", pio::pios))
        .with(FnTask::new("pio_run", pio::pio_run))
        .with(FnTask::new("pio_kill", pio::pio_kill))
        .with(FnTask::new("pio_plugins", pio::pio_plugins).with_lock(LockName::PLUGINS))
        .with(FnTask::new("pio_update_app", pio::pio_update_app).with_lock(LockName::UPDATE))
        .with(FnTask::new("pio_update", pio::pio_update).with_lock(LockName::UPDATE))
        .with(FnTask::new("pio_update_ui", pio::pio_update_ui).with_lock(LockName::UPDATE))
        .with(
            FnTask::new(
                "pio_run_export_experiment_data",
                pio::pio_run_export_experiment_data,
            )
            .with_lock(LockName::EXPORT_DATA),
        )
        .with(FnTask::new("add_new_worker", pio::add_new_worker))
        .with(FnTask::new("rm", system::rm))
        .with(FnTask::new("shutdown", system::shutdown))
        .with(FnTask::new("reboot", system::reboot))
        .with(FnTask::new("save_file", system::save_file))
        .with(FnTask::new("write_config_and_sync", system::write_config_and_sync))
        .with(
            FnTask::new("update_app_across_cluster", cluster::update_app_across_cluster)
                .with_lock(LockName::UPDATE),
        )
        .with(
            FnTask::new(
                "update_app_from_release_archive_across_cluster",
                cluster::update_app_from_release_archive_across_cluster,
            )
            .with_lock(LockName::UPDATE),
        )
        .with(
            FnTask::new(
                "update_app_from_release_archive_on_specific_units",
                cluster::update_app_from_release_archive_on_specific_units,
            )
            .with_lock(LockName::UPDATE),
        )
        .with(FnTask::new("get_worker", cluster::get_worker))
        .with(FnTask::new("post_worker", cluster::post_worker))
        .with(
            FnTask::new(
                "multicast_get_across_cluster",
                cluster::multicast_get_across_cluster,
            )
            .fanout(),
        )
        .with(
            FnTask::new(
                "multicast_post_across_cluster",
                cluster::multicast_post_across_cluster,
            )
            .fanout(),
        )
}

/// `[success, text]`.
fn pair(outcome: CommandOutcome) -> Value {
    let (ok, text) = outcome.into_pair();
    json!([ok, text])
}

/// Fail the task unless `outcome` exited zero.
fn ensure_success(spec: &CommandSpec, outcome: &CommandOutcome) -> Result<(), TaskError> {
    if outcome.success {
        return Ok(());
    }
    Err(TaskError::CommandFailed {
        command: spec.to_string(),
        code: outcome.exit_code,
        stderr: outcome.stderr.trim().to_string(),
    })
}

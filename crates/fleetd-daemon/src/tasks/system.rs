//! Host-level operations: files, power, configuration sync.

use serde_json::{Value, json};
use tracing::{error, info};

use crate::process::CommandSpec;
use crate::queue::{TaskArgs, TaskContext, TaskError};

/// `rm -- <path>`. Returns whether it succeeded.
pub async fn rm(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    let path = args.str_at(0)?;
    info!(path, "Deleting file");
    let spec = CommandSpec::new("rm").arg("--").arg(path);
    Ok(json!(ctx.runner().run(&spec).await?.success))
}

pub async fn shutdown(ctx: TaskContext, _args: TaskArgs) -> Result<Value, TaskError> {
    info!("Shutting down now");
    let spec = CommandSpec::new("sudo").args(["shutdown", "-h", "now"]);
    Ok(json!(ctx.runner().run(&spec).await?.success))
}

pub async fn reboot(ctx: TaskContext, _args: TaskArgs) -> Result<Value, TaskError> {
    info!("Rebooting now");
    let spec = CommandSpec::new("sudo").arg("reboot");
    Ok(json!(ctx.runner().run(&spec).await?.success))
}

/// Write `content` to `path`. A write error is logged and reported as `false`.
pub async fn save_file(_ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    let path = args.str_at(0)?;
    let content = args.str_at(1)?;
    match tokio::fs::write(path, content).await {
        Ok(()) => Ok(json!(true)),
        Err(e) => {
            error!(path, error = %e, "Failed to save file");
            Ok(json!(false))
        }
    }
}

/// Write a config file, then push it to `units` with `pios sync-configs`.
///
/// Returns `[true, ""]`, or `[false, <message>]` if either step failed.
pub async fn write_config_and_sync(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    let path = args.str_at(0)?;
    let text = args.str_at(1)?;
    let units = args.str_at(2)?;
    let flags = args.str_at(3)?;

    if let Err(e) = tokio::fs::write(path, text).await {
        error!(path, error = %e, "Failed to write config");
        return Ok(json!([false, "Could not write config file."]));
    }

    let mut spec = CommandSpec::new(ctx.runner().pios()).args(["sync-configs", "--units", units]);
    if !flags.is_empty() {
        spec = spec.arg(flags);
    }
    let outcome = ctx.runner().run(&spec).await?;
    if !outcome.success {
        error!(argv = %spec, stderr = outcome.stderr.trim(), "Config sync failed");
        return Ok(json!([false, "Could not sync configs to all units."]));
    }
    Ok(json!([true, ""]))
}

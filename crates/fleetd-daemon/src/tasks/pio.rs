//! Wrappers around the single-unit `pio` CLI and the fleet-wide `pios` CLI.

use serde_json::{Value, json};
use tracing::info;

use super::pair;
use crate::process::CommandSpec;
use crate::queue::{TaskArgs, TaskContext, TaskError};

fn pio_command(ctx: &TaskContext, args: &TaskArgs, prefix: &[&str]) -> Result<CommandSpec, TaskError> {
    Ok(CommandSpec::new(ctx.runner().pio())
        .args(prefix)
        .args(args.strings_from(0)?)
        .env(args.env.clone()))
}

/// `pio <args...>`, returning `[success, stdout or stderr]`.
pub async fn pio(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    let spec = pio_command(&ctx, &args, &[])?;
    Ok(pair(ctx.runner().run(&spec).await?))
}

/// `pios <args...> -y`, returning `[success, stdout or stderr]`.
pub async fn pios(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    let spec = CommandSpec::new(ctx.runner().pios())
        .args(args.strings_from(0)?)
        .arg("-y")
        .env(args.env.clone());
    Ok(pair(ctx.runner().run(&spec).await?))
}

/// `nohup pio run <args...>`, detached. Returns as soon as the job is started.
pub async fn pio_run(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    let spec = CommandSpec::new("nohup")
        .arg(ctx.runner().pio())
        .arg("run")
        .args(args.strings_from(0)?)
        .env(args.env.clone());
    let pid = ctx.runner().spawn_detached(&spec)?;
    info!(pid, argv = %spec, "Started background job");
    Ok(json!(true))
}

pub async fn pio_kill(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    let spec = pio_command(&ctx, &args, &["kill"])?;
    Ok(json!(ctx.runner().run(&spec).await?.success))
}

/// `pio plugins install|uninstall <args...>`.
pub async fn pio_plugins(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    match args.str_at(0)? {
        "install" | "uninstall" => {}
        other => {
            return Err(TaskError::InvalidArguments(format!(
                "plugins action must be install or uninstall, got {other:?}"
            )));
        }
    }
    let spec = pio_command(&ctx, &args, &["plugins"])?;
    Ok(json!(ctx.runner().run(&spec).await?.success))
}

pub async fn pio_update_app(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    let spec = pio_command(&ctx, &args, &["update", "app"])?;
    Ok(json!(ctx.runner().run(&spec).await?.success))
}

/// `pio update <args...>`. The update restarts the daemon's own services, so
/// the exit status is not meaningful and the result is always `true`.
pub async fn pio_update(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    let spec = pio_command(&ctx, &args, &["update"])?;
    ctx.runner().run(&spec).await?;
    Ok(json!(true))
}

/// `pio update ui <args...>`. Always `true`, like [`pio_update`].
pub async fn pio_update_ui(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    let spec = pio_command(&ctx, &args, &["update", "ui"])?;
    ctx.runner().run(&spec).await?;
    Ok(json!(true))
}

pub async fn pio_run_export_experiment_data(
    ctx: TaskContext,
    args: TaskArgs,
) -> Result<Value, TaskError> {
    let spec = pio_command(&ctx, &args, &["run", "export_experiment_data"])?;
    Ok(pair(ctx.runner().run(&spec).await?))
}

/// `pio workers add <name> -v <version> -m <model>`.
///
/// The CLI reports progress on stderr, so stderr is the text in both cases.
pub async fn add_new_worker(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    let name = args.str_at(0)?;
    let version = args.str_at(1)?;
    let model = args.str_at(2)?;
    info!(worker = name, version, model, "Adding new worker");

    let spec = CommandSpec::new(ctx.runner().pio())
        .args(["workers", "add", name, "-v", version, "-m", model]);
    let outcome = ctx.runner().run(&spec).await?;
    Ok(json!([outcome.success, outcome.stderr.trim()]))
}

//! Fleet-wide updates and HTTP multicast.

use std::collections::BTreeSet;

use serde_json::{Value, json};
use tracing::info;

use super::ensure_success;
use crate::cluster::{FanoutRequest, Method, UnitApiPath};
use crate::process::CommandSpec;
use crate::queue::{TaskArgs, TaskContext, TaskError};

/// Update the leader, then every worker.
///
/// A failed leader update fails the task; worker failures are left to `pios`
/// to report.
pub async fn update_app_across_cluster(ctx: TaskContext, _args: TaskArgs) -> Result<Value, TaskError> {
    let runner = ctx.runner();

    info!("Updating app on leader");
    let leader = CommandSpec::new(runner.pio()).args(["update", "app"]);
    ensure_success(&leader, &runner.run(&leader).await?)?;

    info!("Updating app on workers");
    runner
        .run(&CommandSpec::new(runner.pios()).args(["update", "-y"]))
        .await?;
    Ok(json!(true))
}

/// Update the leader from a release archive, then copy it to and install it on
/// every worker.
pub async fn update_app_from_release_archive_across_cluster(
    ctx: TaskContext,
    args: TaskArgs,
) -> Result<Value, TaskError> {
    let archive = args.str_at(0)?;
    let runner = ctx.runner();

    info!(archive, "Updating app on leader from archive");
    let leader = CommandSpec::new(runner.pio()).args(["update", "app", "--source", archive]);
    ensure_success(&leader, &runner.run(&leader).await?)?;

    info!(archive, "Updating app on workers from archive");
    runner
        .run(&CommandSpec::new(runner.pios()).args(["cp", archive, "-y"]))
        .await?;
    runner
        .run(&CommandSpec::new(runner.pios()).args(["update", "--source", archive, "-y"]))
        .await?;
    Ok(json!(true))
}

/// Copy and install a release archive on the listed units only.
pub async fn update_app_from_release_archive_on_specific_units(
    ctx: TaskContext,
    args: TaskArgs,
) -> Result<Value, TaskError> {
    let archive = args.str_at(0)?;
    let units = args.string_list_at(1)?;
    let unit_flags: Vec<&str> = units.iter().flat_map(|u| ["--units", u.as_str()]).collect();
    let runner = ctx.runner();

    info!(archive, ?units, "Updating app on units from archive");
    runner
        .run(
            &CommandSpec::new(runner.pios())
                .args(["cp", archive, "-y"])
                .args(&unit_flags),
        )
        .await?;
    runner
        .run(
            &CommandSpec::new(runner.pios())
                .args(["update", "--source", archive, "-y"])
                .args(&unit_flags),
        )
        .await?;
    Ok(json!(true))
}

/// Arguments shared by the per-unit request functions: `[unit, endpoint, json?]`.
async fn request_worker(ctx: &TaskContext, args: &TaskArgs, method: Method) -> Result<Value, TaskError> {
    let unit = args.str_at(0)?;
    let endpoint = UnitApiPath::parse(args.str_at(1)?)?;
    let payload = args.value_at(2).filter(|v| !v.is_null());
    let reply = ctx
        .dispatcher()
        .request_unit(method, unit, &endpoint, payload)
        .await;
    Ok(json!([unit, reply]))
}

/// GET one unit. Returns `[unit, reply or null]`.
pub async fn get_worker(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    request_worker(&ctx, &args, Method::Get).await
}

/// POST to one unit. Returns `[unit, reply or null]`.
pub async fn post_worker(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    request_worker(&ctx, &args, Method::Post).await
}

/// Arguments shared by the multicast functions: `[endpoint, units, json?]`.
async fn multicast(ctx: &TaskContext, args: &TaskArgs, method: Method) -> Result<Value, TaskError> {
    let request = FanoutRequest {
        method,
        endpoint: UnitApiPath::parse(args.str_at(0)?)?,
        targets: args.string_list_at(1)?.into_iter().collect::<BTreeSet<_>>(),
        payload: args.value_at(2).filter(|v| !v.is_null()).cloned(),
    };
    let replies = ctx.dispatcher().fanout(ctx.queue(), request).await?;
    Ok(serde_json::to_value(replies)?)
}

/// GET the same endpoint on many units. Returns `{unit: reply or null}`.
pub async fn multicast_get_across_cluster(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    multicast(&ctx, &args, Method::Get).await
}

/// POST to the same endpoint on many units. Returns `{unit: reply or null}`.
pub async fn multicast_post_across_cluster(ctx: TaskContext, args: TaskArgs) -> Result<Value, TaskError> {
    multicast(&ctx, &args, Method::Post).await
}

//! HTTP server for the fleetd daemon.
//!
//! Exposes task submission and result lookup under `/unit_api` and the
//! leader's cluster and time-series views under `/api`.

mod health;
mod routes;

pub use health::{ComponentHealth, HealthReport, ServingStatus};
pub use routes::AppState;

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// All daemon routes over `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/unit_api/health", get(health::health))
        .route("/unit_api/tasks/{function}", post(routes::submit_task))
        .route("/unit_api/task_results/{task_id}", get(routes::task_result))
        .route(
            "/api/workers",
            get(routes::list_workers).post(routes::add_worker),
        )
        .route(
            "/api/experiments/{experiment}/time_series/{data_source}/{column}",
            get(routes::time_series),
        )
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: AppState, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Starting HTTP server");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

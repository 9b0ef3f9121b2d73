//! Liveness report for the daemon.
//!
//! `GET /unit_api/health` probes the database and reports worker pool usage.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::routes::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingStatus {
    Serving,
    NotServing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub status: ServingStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: ServingStatus,
    pub unit: String,
    pub components: Vec<ComponentHealth>,
}

/// Check if the database is healthy by running a simple query.
async fn check_db_health(state: &AppState) -> ComponentHealth {
    match sqlx::query("SELECT 1").execute(state.db.pool()).await {
        Ok(_) => ComponentHealth {
            name: "database",
            status: ServingStatus::Serving,
            message: "SQLite database operational".to_string(),
        },
        Err(e) => ComponentHealth {
            name: "database",
            status: ServingStatus::NotServing,
            message: format!("Database query failed: {e}"),
        },
    }
}

fn check_queue_health(state: &AppState) -> ComponentHealth {
    let queue = &state.queue;
    if queue.is_closed() {
        return ComponentHealth {
            name: "task_queue",
            status: ServingStatus::NotServing,
            message: "Task queue is closed".to_string(),
        };
    }
    ComponentHealth {
        name: "task_queue",
        status: ServingStatus::Serving,
        message: format!(
            "{}/{} worker slots in use, {} tasks in flight",
            queue.running().len(),
            queue.workers(),
            queue.in_flight()
        ),
    }
}

/// `GET /unit_api/health`
pub async fn health(State(state): State<AppState>) -> Response {
    let components = vec![check_db_health(&state).await, check_queue_health(&state)];
    let status = if components.iter().all(|c| c.status == ServingStatus::Serving) {
        ServingStatus::Serving
    } else {
        ServingStatus::NotServing
    };
    let code = match status {
        ServingStatus::Serving => StatusCode::OK,
        ServingStatus::NotServing => StatusCode::SERVICE_UNAVAILABLE,
    };
    let report = HealthReport {
        status,
        unit: state.unit.clone(),
        components,
    };
    (code, Json(report)).into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use fleetd_core::Config;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::queue::{TaskQueue, TaskRegistry, TaskServices};
    use crate::server::build_router;
    use crate::storage::Database;

    async fn state() -> AppState {
        let services = TaskServices::local(&Config::default(), "leader").unwrap();
        AppState {
            queue: TaskQueue::builder(TaskRegistry::new(), services).build(),
            db: Database::open_in_memory().await.unwrap(),
            unit: "leader".into(),
        }
    }

    async fn probe(state: AppState) -> (StatusCode, Value) {
        let req = Request::builder()
            .uri("/unit_api/health")
            .body(Body::empty())
            .unwrap();
        let resp = build_router(state).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn healthy_daemon_is_serving() {
        let (status, body) = probe(state().await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "serving");
        assert_eq!(body["components"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn closed_queue_is_not_serving() {
        let state = state().await;
        state.queue.close();
        let (status, body) = probe(state).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_serving");
        assert_eq!(body["components"][1]["name"], "task_queue");
    }
}

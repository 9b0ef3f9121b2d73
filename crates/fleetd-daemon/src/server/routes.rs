use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fleetd_core::Identifier;
use fleetd_core::ident::is_valid_unix_filename;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use crate::queue::{QueueError, TaskArgs, TaskId, TaskOutcome, TaskQueue};
use crate::storage::{Database, DatabaseError, TimeSeriesQuery};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub queue: TaskQueue,
    pub db: Database,
    /// This unit's name, echoed back on task submission.
    pub unit: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// `POST /unit_api/tasks/{function}` with an optional `{args, env}` body.
pub async fn submit_task(
    Path(function): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    let args = if body.iter().all(u8::is_ascii_whitespace) {
        TaskArgs::default()
    } else {
        match serde_json::from_slice::<TaskArgs>(&body) {
            Ok(args) => args,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    };

    match state.queue.enqueue(&function, args) {
        Ok(handle) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "unit": state.unit,
                "task_id": handle.id(),
                "result_url_path": format!("/unit_api/task_results/{}", handle.id()),
            })),
        )
            .into_response(),
        Err(e @ QueueError::UnknownFunction(_)) => error_response(StatusCode::NOT_FOUND, e.to_string()),
        Err(e @ QueueError::Closed) => error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

/// `GET /unit_api/task_results/{task_id}`
///
/// Unknown ids and unfinished tasks look the same to the caller.
pub async fn task_result(Path(task_id): Path<String>, State(state): State<AppState>) -> Response {
    let Ok(id) = task_id.parse::<TaskId>() else {
        return error_response(StatusCode::BAD_REQUEST, format!("Invalid task id: {task_id}"));
    };

    match state.queue.lookup(id).await.and_then(|s| s.outcome) {
        Some(TaskOutcome::Succeeded(result)) => (
            StatusCode::OK,
            Json(json!({ "task_id": id, "status": "complete", "result": result })),
        )
            .into_response(),
        Some(TaskOutcome::Failed(error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "task_id": id, "status": "failed", "error": error })),
        )
            .into_response(),
        None => (
            StatusCode::ACCEPTED,
            Json(json!({ "task_id": id, "status": "pending or not present" })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct NewWorker {
    pub unit: String,
    #[serde(default)]
    pub address: Option<String>,
}

/// `POST /api/workers`
pub async fn add_worker(State(state): State<AppState>, Json(body): Json<NewWorker>) -> Response {
    if !is_valid_unix_filename(&body.unit) {
        return error_response(StatusCode::BAD_REQUEST, format!("Invalid unit name: {}", body.unit));
    }

    match state.db.add_worker(&body.unit, body.address.as_deref()).await {
        Ok(worker) => (StatusCode::CREATED, Json(worker)).into_response(),
        Err(e) if e.is_constraint_violation() => {
            warn!(unit = %body.unit, "Worker already registered");
            error_response(StatusCode::CONFLICT, format!("Worker {} already exists", body.unit))
        }
        Err(e) => {
            error!(unit = %body.unit, error = %e, "Failed to add worker");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// `GET /api/workers`
pub async fn list_workers(State(state): State<AppState>) -> Response {
    match state.db.list_workers().await {
        Ok(workers) => Json(workers).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list workers");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SeriesParams {
    #[serde(rename = "filter_mod_N")]
    pub filter_mod_n: Option<f64>,
    /// Hours of history to include.
    pub lookback: Option<f64>,
}

/// `GET /api/experiments/{experiment}/time_series/{data_source}/{column}`
pub async fn time_series(
    Path((experiment, data_source, column)): Path<(String, String, String)>,
    Query(params): Query<SeriesParams>,
    State(state): State<AppState>,
) -> Response {
    let (table, column) = match (Identifier::scrub(&data_source), Identifier::scrub(&column)) {
        (Ok(table), Ok(column)) => (table, column),
        (Err(e), _) | (_, Err(e)) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let mut query = TimeSeriesQuery::new(experiment, table, column);
    if let Some(n) = params.filter_mod_n {
        query.filter_mod_n = n;
    }
    if let Some(hours) = params.lookback {
        query.lookback_hours = hours;
    }

    match state.db.sampled_time_series(&query).await {
        Ok(series) => Json(series).into_response(),
        Err(e @ DatabaseError::Query(_)) => {
            warn!(table = %query.table, column = %query.column, error = %e, "Time series query failed");
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            error!(error = %e, "Failed to read time series");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::http::Request;
    use fleetd_core::Config;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::queue::{FnTask, TaskContext, TaskError, TaskRegistry, TaskServices};
    use crate::server::build_router;

    async fn app() -> (Router, AppState) {
        let registry = TaskRegistry::new()
            .with(FnTask::new("echo", |_ctx: TaskContext, args: TaskArgs| async move {
                Ok::<_, TaskError>(Value::Array(args.args))
            }))
            .with(FnTask::new("boom", |_ctx: TaskContext, _args: TaskArgs| async {
                Err::<Value, _>(TaskError::InvalidArguments("bad input".into()))
            }))
            .with(FnTask::new("slow", |_ctx: TaskContext, _args: TaskArgs| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, TaskError>(json!(true))
            }));
        let services = TaskServices::local(&Config::default(), "leader").unwrap();
        let queue = TaskQueue::builder(registry, services).build();
        let db = Database::open_in_memory().await.unwrap();
        let state = AppState {
            queue,
            db,
            unit: "leader".into(),
        };
        (build_router(state.clone()), state)
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn submit_then_fetch_result() {
        let (app, state) = app().await;

        let (status, body) = send(
            app.clone(),
            post("/unit_api/tasks/echo", &json!({"args": ["a", 1]})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["unit"], "leader");
        let task_id: TaskId = body["task_id"].as_str().unwrap().parse().unwrap();
        assert_eq!(
            body["result_url_path"],
            format!("/unit_api/task_results/{task_id}")
        );

        state.queue.handle(task_id).unwrap().wait().await;
        let (status, body) = send(app, get(body["result_url_path"].as_str().unwrap())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "complete");
        assert_eq!(body["result"], json!(["a", 1]));
    }

    #[tokio::test]
    async fn submit_without_body_uses_no_arguments() {
        let (app, state) = app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/unit_api/tasks/echo")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, req).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let id: TaskId = body["task_id"].as_str().unwrap().parse().unwrap();
        let outcome = state.queue.handle(id).unwrap().wait().await;
        assert_eq!(outcome, TaskOutcome::Succeeded(json!([])));
    }

    #[tokio::test]
    async fn failed_task_reports_500() {
        let (app, state) = app().await;
        let (_, body) = send(app.clone(), post("/unit_api/tasks/boom", &json!({}))).await;
        let id: TaskId = body["task_id"].as_str().unwrap().parse().unwrap();
        state.queue.handle(id).unwrap().wait().await;

        let (status, body) = send(app, get(&format!("/unit_api/task_results/{id}"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "failed");
        assert!(body["error"].as_str().unwrap().contains("bad input"));
    }

    #[tokio::test]
    async fn pending_and_unknown_results_report_202() {
        let (app, _state) = app().await;
        let (_, body) = send(app.clone(), post("/unit_api/tasks/slow", &json!({}))).await;
        let id = body["task_id"].as_str().unwrap().to_string();

        let (status, body) = send(app.clone(), get(&format!("/unit_api/task_results/{id}"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "pending or not present");

        let unknown = TaskId::new();
        let (status, _) = send(app, get(&format!("/unit_api/task_results/{unknown}"))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn malformed_task_id_is_400() {
        let (app, _state) = app().await;
        let (status, _) = send(app, get("/unit_api/task_results/not-a-uuid")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_function_is_404() {
        let (app, _state) = app().await;
        let (status, body) = send(app, post("/unit_api/tasks/nope", &json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn closed_queue_is_503() {
        let (app, state) = app().await;
        state.queue.close();
        let (status, _) = send(app, post("/unit_api/tasks/echo", &json!({}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn duplicate_worker_is_409() {
        let (app, _state) = app().await;
        let (status, body) = send(
            app.clone(),
            post("/api/workers", &json!({"unit": "worker1", "address": "10.0.0.5"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["pioreactor_unit"], "worker1");

        let (status, _) = send(app.clone(), post("/api/workers", &json!({"unit": "worker1"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(app, get("/api/workers")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_worker_name_is_400() {
        let (app, _state) = app().await;
        let (status, _) = send(app, post("/api/workers", &json!({"unit": "../etc"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn time_series_is_sampled_and_grouped() {
        let (app, state) = app().await;
        for i in 0..50 {
            sqlx::query(
                "INSERT INTO growth_rates (experiment, pioreactor_unit, timestamp, rate) \
                 VALUES ('exp1', 'unit1', ?, ?)",
            )
            .bind(fleetd_core::time::utc_iso_timestamp())
            .bind(f64::from(i) / 10.0)
            .execute(state.db.pool())
            .await
            .unwrap();
        }

        let (status, body) = send(
            app,
            get("/api/experiments/exp1/time_series/growth_rates/rate?filter_mod_N=1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["series"], json!(["unit1"]));
        assert_eq!(body["data"][0].as_array().unwrap().len(), 50);
    }

    #[tokio::test]
    async fn time_series_scrubs_identifiers() {
        let (app, _state) = app().await;
        let (status, body) = send(
            app.clone(),
            get("/api/experiments/exp1/time_series/growth_rates%3B--/rate"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["series"], json!([]));

        let (status, _) =
            send(app.clone(), get("/api/experiments/exp1/time_series/sqlite_master/name")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(app, get("/api/experiments/exp1/time_series/%3Bsqlite_master/name")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn huge_lookback_returns_whole_history() {
        let (app, state) = app().await;
        sqlx::query(
            "INSERT INTO growth_rates (experiment, pioreactor_unit, timestamp, rate) \
             VALUES ('exp1', 'unit1', '2001-01-01T00:00:00.000000Z', 0.5)",
        )
        .execute(state.db.pool())
        .await
        .unwrap();

        let (status, body) = send(
            app,
            get("/api/experiments/exp1/time_series/growth_rates/rate?filter_mod_N=1&lookback=1e12"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0].as_array().unwrap().len(), 1);
    }
}

//! HTTP dispatch to units.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info};

use super::endpoint::UnitApiPath;
use super::resolver::{AddressResolver, ResolveError};
use crate::queue::{QueueError, TaskArgs, TaskOutcome, TaskQueue};

/// Per-unit replies. `None` marks a unit that did not answer usefully.
pub type FanoutResult = BTreeMap<String, Option<Value>>;

/// HTTP method of a unit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Queue function that performs one request with this method.
    pub const fn worker_function(self) -> &'static str {
        match self {
            Self::Get => "get_worker",
            Self::Post => "post_worker",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
        })
    }
}

/// Dispatcher errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Endpoint must start with /unit_api: {0:?}")]
    ForbiddenEndpoint(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unit {unit} answered {status}")]
    Status { unit: String, status: u16 },

    #[error("Unit {unit} did not answer within {timeout:?}")]
    Timeout { unit: String, timeout: Duration },

    #[error("Fan-out could not be queued: {0}")]
    Queue(#[from] QueueError),
}

/// One multicast.
#[derive(Debug, Clone)]
pub struct FanoutRequest {
    pub method: Method,
    pub endpoint: UnitApiPath,
    /// Duplicate names collapse.
    pub targets: BTreeSet<String>,
    pub payload: Option<Value>,
}

/// Sends requests to unit agents.
#[derive(Clone)]
pub struct ClusterDispatcher {
    http: reqwest::Client,
    resolver: Arc<dyn AddressResolver>,
    timeout: Duration,
}

impl ClusterDispatcher {
    pub fn new(resolver: Arc<dyn AddressResolver>, timeout: Duration) -> Result<Self, DispatchError> {
        // reqwest is built with rustls-no-provider; an Err here only means a
        // provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            resolver,
            timeout,
        })
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send one request. Any failure is logged and becomes `None`.
    pub async fn request_unit(
        &self,
        method: Method,
        unit: &str,
        endpoint: &UnitApiPath,
        payload: Option<&Value>,
    ) -> Option<Value> {
        let attempt = self.try_request(method, unit, endpoint, payload);
        let result = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout {
                unit: unit.to_string(),
                timeout: self.timeout,
            }),
        };
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!(
                    unit,
                    %method,
                    %endpoint,
                    error = %e,
                    "Could not reach unit endpoint. Check connection?"
                );
                None
            }
        }
    }

    async fn try_request(
        &self,
        method: Method,
        unit: &str,
        endpoint: &UnitApiPath,
        payload: Option<&Value>,
    ) -> Result<Value, DispatchError> {
        let base = self.resolver.resolve(unit).await?;
        let url = format!("{}{}", base.trim_end_matches('/'), endpoint);
        debug!(unit, %method, %url, "Dispatching unit request");

        let mut request = match method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
        };
        if let Some(body) = payload {
            request = request.json(body);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DispatchError::Status {
                unit: unit.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Multicast `request` as one queued job per target and wait for all of them.
    ///
    /// The returned map has exactly one entry per distinct target. The caller
    /// keeps its own pool slot while waiting, so this must only run inside a
    /// fan-out task.
    pub async fn fanout(
        &self,
        queue: &TaskQueue,
        request: FanoutRequest,
    ) -> Result<FanoutResult, DispatchError> {
        let FanoutRequest {
            method,
            endpoint,
            targets,
            payload,
        } = request;
        info!(%method, %endpoint, targets = targets.len(), "Fanning out");

        let jobs = targets
            .iter()
            .map(|unit| {
                TaskArgs::new(vec![
                    Value::String(unit.clone()),
                    Value::String(endpoint.to_string()),
                    payload.clone().unwrap_or(Value::Null),
                ])
            })
            .collect();
        let outcomes = queue.map(method.worker_function(), jobs)?.join().await;

        let mut result = FanoutResult::new();
        for (unit, outcome) in targets.into_iter().zip(outcomes) {
            let reply = match outcome {
                TaskOutcome::Succeeded(Value::Array(mut pair)) if pair.len() == 2 => {
                    Some(pair.swap_remove(1)).filter(|v| !v.is_null())
                }
                TaskOutcome::Succeeded(other) => {
                    error!(unit, reply = %other, "Unexpected per-unit reply shape");
                    None
                }
                TaskOutcome::Failed(msg) => {
                    error!(unit, error = %msg, "Per-unit request failed");
                    None
                }
            };
            result.insert(unit, reply);
        }
        Ok(result)
    }
}

impl fmt::Debug for ClusterDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterDispatcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use serde_json::json;

    use super::*;
    use crate::cluster::StaticResolver;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn fake_unit() -> Router {
        Router::new()
            .route("/unit_api/versions/app", get(|| async { axum::Json(json!({"version": "24.1.0"})) }))
            .route(
                "/unit_api/echo",
                post(|axum::Json(body): axum::Json<Value>| async move { axum::Json(body) }),
            )
            .route(
                "/unit_api/broken",
                get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            )
            .route(
                "/unit_api/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    axum::Json(json!({}))
                }),
            )
    }

    async fn dispatcher() -> ClusterDispatcher {
        let base = serve(fake_unit()).await;
        let resolver = StaticResolver::new()
            .with("unit1", base)
            .with("dead", "http://127.0.0.1:1");
        ClusterDispatcher::new(Arc::new(resolver), Duration::from_millis(300)).unwrap()
    }

    fn path(raw: &str) -> UnitApiPath {
        UnitApiPath::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn get_returns_json_reply() {
        let reply = dispatcher()
            .await
            .request_unit(Method::Get, "unit1", &path("/unit_api/versions/app"), None)
            .await;
        assert_eq!(reply, Some(json!({"version": "24.1.0"})));
    }

    #[tokio::test]
    async fn post_sends_payload() {
        let payload = json!({"settings": {"target_rpm": 400}});
        let reply = dispatcher()
            .await
            .request_unit(Method::Post, "unit1", &path("/unit_api/echo"), Some(&payload))
            .await;
        assert_eq!(reply, Some(payload));
    }

    #[tokio::test]
    async fn failures_become_absent() {
        let dispatcher = dispatcher().await;
        for (unit, endpoint) in [
            ("unit1", "/unit_api/broken"),
            ("unit1", "/unit_api/missing"),
            ("dead", "/unit_api/versions/app"),
            ("unknown", "/unit_api/versions/app"),
        ] {
            let reply = dispatcher
                .request_unit(Method::Get, unit, &path(endpoint), None)
                .await;
            assert!(reply.is_none(), "{unit} {endpoint}");
        }
    }

    #[tokio::test]
    async fn slow_unit_times_out() {
        let dispatcher = dispatcher().await;
        let started = std::time::Instant::now();
        let reply = dispatcher
            .request_unit(Method::Get, "unit1", &path("/unit_api/slow"), None)
            .await;
        assert!(reply.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn methods_map_to_worker_functions() {
        assert_eq!(Method::Get.worker_function(), "get_worker");
        assert_eq!(Method::Post.worker_function(), "post_worker");
        assert_eq!(Method::Post.to_string(), "POST");
    }
}

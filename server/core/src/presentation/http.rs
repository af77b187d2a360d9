// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP transport.
//!
//! Wire-stable surface:
//!
//! ```text
//! GET  /health
//! GET  /tools
//! POST /tools/{tool_name}/execute
//! GET  /metrics
//! GET  /events          (text/event-stream)
//! ```
//!
//! Transport status codes carry only structural errors: 400 malformed body,
//! 404 unknown tool, 409 disabled tool, 413 body too large. Every execution
//! outcome — validation rejection, timeout, breaker open — returns 200 with
//! the error fields set in the body.
//!
//! Executions run in a spawned task and the handler awaits its join handle:
//! a client that disconnects mid-run abandons the response, while the
//! subprocess finishes and its metrics are still recorded.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::application::health::HealthMonitor;
use crate::application::registry::ToolRegistry;
use crate::application::tool::ExecutionEnv;
use crate::domain::errors::{ErrorContext, ErrorType};
use crate::domain::execution::{next_correlation_id, ToolInput, ToolOutput};
use crate::infrastructure::metrics::MetricsHandle;

/// Shared state behind every handler.
pub struct AppState {
    pub env: ExecutionEnv,
    pub registry: Arc<ToolRegistry>,
    pub health: Arc<HealthMonitor>,
    pub metrics: MetricsHandle,
}

/// Build the router with all five routes.
pub fn router(state: Arc<AppState>) -> Router {
    let max_body = state.env.config.current().server.max_body_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/tools", get(list_tools_handler))
        .route("/tools/{tool_name}/execute", post(execute_handler))
        .route("/metrics", get(metrics_handler))
        .route("/events", get(events_handler))
        .layer(DefaultBodyLimit::max(max_body))
        .with_state(state)
}

/// Serve until the shutdown token fires.
pub async fn serve(
    state: Arc<AppState>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "http transport listening");
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // On-demand evaluation; the periodic tick keeps /events fed.
    let report = state.health.run_once().await;
    Json(report)
}

async fn list_tools_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({ "tools": state.registry.list() }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn execute_handler(
    State(state): State<Arc<AppState>>,
    Path(tool_name): Path<String>,
    body: Bytes,
) -> Response {
    let input: ToolInput = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("malformed request body: {}", err) })),
            )
                .into_response();
        }
    };

    let Some(tool) = state.registry.get(&tool_name) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown tool: {}", tool_name) })),
        )
            .into_response();
    };

    if !tool.enabled() {
        let correlation_id = input
            .correlation_id
            .clone()
            .unwrap_or_else(next_correlation_id);
        let ctx = ErrorContext::new(
            ErrorType::ValidationError,
            format!("tool {} is disabled", tool_name),
            "enable the tool or remove it from TOOL_EXCLUDE".to_string(),
            tool_name,
            input.target.clone(),
        );
        let output = ToolOutput::from_error(&ctx, 1, correlation_id);
        return (StatusCode::CONFLICT, Json(output)).into_response();
    }

    // Run detached so a dropped connection never kills the subprocess. The
    // per-request child token still fires if this handler is dropped while
    // the run is queued, cancelling a pending semaphore acquire; once the
    // process is spawned the run completes and records metrics regardless.
    let request_cancel = state.env.cancel.child_token();
    let _disconnect_guard = request_cancel.clone().drop_guard();
    let env = ExecutionEnv {
        cancel: request_cancel,
        ..state.env.clone()
    };
    let handle = tokio::spawn(async move { tool.run(input, None, &env).await });
    match handle.await {
        Ok(output) => (StatusCode::OK, Json(output)).into_response(),
        Err(err) => {
            error!(error = %err, "execution task panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal execution failure" })),
            )
                .into_response()
        }
    }
}

async fn events_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.env.events.subscribe_raw()).filter_map(|item| async {
        match item {
            Ok(event) => {
                let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
                Some(Ok(Event::default().event(event.kind()).data(data)))
            }
            // Lagged subscribers lose the oldest events and keep going.
            Err(BroadcastStreamRecvError::Lagged(_)) => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::health::{standard_checks, ProcessLivenessCheck};
    use crate::application::limiter::{SchedulerId, SemaphoreRegistry};
    use crate::application::tool::ToolPolicy;
    use crate::domain::config::{ConfigHandle, ServerConfig, ToolsSection};
    use crate::domain::descriptor::ToolDescriptor;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::spawner::Spawner;
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    struct EchoPolicy {
        descriptor: ToolDescriptor,
    }

    impl EchoPolicy {
        fn new(name: &str) -> Arc<dyn ToolPolicy> {
            let mut descriptor = ToolDescriptor::new(name, "echo");
            descriptor.default_timeout = std::time::Duration::from_secs(5);
            Arc::new(Self { descriptor })
        }
    }

    impl ToolPolicy for EchoPolicy {
        fn descriptor(&self) -> &ToolDescriptor {
            &self.descriptor
        }
    }

    fn state(filter: ToolsSection) -> Arc<AppState> {
        let mut config = ServerConfig::default();
        config.tools = filter;
        let config_handle = ConfigHandle::new(config.clone());
        let registry = Arc::new(ToolRegistry::from_policies(
            vec![EchoPolicy::new("nmap"), EchoPolicy::new("hydra")],
            &config.tools,
        ));
        let heartbeat = ProcessLivenessCheck::new_heartbeat();
        let health = Arc::new(HealthMonitor::new(standard_checks(
            config.health.clone(),
            registry.clone(),
            heartbeat,
        )));
        Arc::new(AppState {
            env: ExecutionEnv {
                config: config_handle,
                limiter: Arc::new(SemaphoreRegistry::new()),
                spawner: Spawner::new(),
                events: EventBus::new(64),
                scheduler: SchedulerId::new("http-test"),
                cancel: CancellationToken::new(),
            },
            registry,
            health,
            metrics: MetricsHandle::install(false).unwrap(),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn execute_request(tool: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/tools/{}/execute", tool))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_list_tools_shape() {
        let app = router(state(ToolsSection::default()));
        let response = app
            .oneshot(Request::get("/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let v = body_json(response).await;
        let tools = v["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert!(tools[0]["enabled"].as_bool().unwrap());
        assert!(tools[0]["allowed_flags"].is_array());
        assert!(tools[0]["timeout"].is_number());
    }

    #[tokio::test]
    async fn test_execute_happy_path() {
        let app = router(state(ToolsSection::default()));
        let response = app
            .oneshot(execute_request("nmap", r#"{"target":"127.0.0.1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let v = body_json(response).await;
        assert_eq!(v["returncode"], 0);
        assert_eq!(v["timed_out"], false);
        assert!(v["correlation_id"].is_string());
    }

    #[tokio::test]
    async fn test_unauthorized_target_is_http_200() {
        let app = router(state(ToolsSection::default()));
        let response = app
            .oneshot(execute_request("nmap", r#"{"target":"8.8.8.8"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let v = body_json(response).await;
        assert_eq!(v["error_type"], "validation_error");
        assert_eq!(v["returncode"], 1);
        assert_eq!(v["stdout"], "");
    }

    #[tokio::test]
    async fn test_unknown_tool_404() {
        let app = router(state(ToolsSection::default()));
        let response = app
            .oneshot(execute_request("ghost", r#"{"target":"127.0.0.1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_disabled_tool_409_with_validation_error() {
        let filter = ToolsSection {
            exclude: vec!["hydra".to_string()],
            ..Default::default()
        };
        let app = router(state(filter));
        let response = app
            .clone()
            .oneshot(execute_request("hydra", r#"{"target":"127.0.0.1"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let v = body_json(response).await;
        assert_eq!(v["error_type"], "validation_error");

        // The excluded tool is still listed, disabled.
        let response = app
            .oneshot(Request::get("/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let v = body_json(response).await;
        let hydra = v["tools"]
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["name"] == "hydra")
            .unwrap();
        assert_eq!(hydra["enabled"], false);
    }

    #[tokio::test]
    async fn test_malformed_body_400() {
        let app = router(state(ToolsSection::default()));
        let response = app
            .oneshot(execute_request("nmap", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_body_413() {
        let app = router(state(ToolsSection::default()));
        let huge = format!(
            r#"{{"target":"127.0.0.1","extra_args":"{}"}}"#,
            "x".repeat(128 * 1024)
        );
        let response = app.oneshot(execute_request("nmap", &huge)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_health_endpoint_reports_checks() {
        let app = router(state(ToolsSection::default()));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let v = body_json(response).await;
        assert!(v["status"].is_string());
        let names: Vec<_> = v["checks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap().to_string())
            .collect();
        assert!(names.contains(&"system_resources".to_string()));
        assert!(names.contains(&"tool_availability".to_string()));
        assert!(names.contains(&"process_liveness".to_string()));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_is_text() {
        let app = router(state(ToolsSection::default()));
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_correlation_id_propagated() {
        let app = router(state(ToolsSection::default()));
        let response = app
            .oneshot(execute_request(
                "nmap",
                r#"{"target":"127.0.0.1","correlation_id":"req-42"}"#,
            ))
            .await
            .unwrap();
        let v = body_json(response).await;
        assert_eq!(v["correlation_id"], "req-42");
    }
}

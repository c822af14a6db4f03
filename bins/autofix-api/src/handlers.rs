// HTTP route handlers for the autofix API

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use autofix_common::types::ExecutionRequest;
use autofix_engine::{CodeFixOrchestrator, LoopRequest};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AutofixRequest {
    pub prompt: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub blueprint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub stdin: String,
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// POST /autofix - Run the repair loop to completion
///
/// Every loop status is returned as data with 200; only malformed input is
/// rejected.
pub async fn submit_autofix(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AutofixRequest>,
) -> Response {
    if payload.prompt.trim().is_empty() {
        return bad_request("prompt must not be empty");
    }

    let mut request = LoopRequest::new(payload.prompt)
        .with_context(payload.context)
        .with_max_retries(payload.max_retries.unwrap_or(state.config.max_retries));
    if let Some(language) = payload.language {
        request = request.with_language(language);
    }
    if let Some(blueprint) = payload.blueprint {
        request = request.with_blueprint(blueprint);
    }

    let orchestrator = CodeFixOrchestrator::new(state.generator.as_ref(), state.sandbox.as_ref())
        .with_stderr_policy(state.config.stderr_policy);
    let outcome = orchestrator.autonomous_loop(&request).await;
    state.metrics.observe_outcome(&outcome);

    info!(
        run_id = %outcome.run_id,
        status = %outcome.status,
        iterations = outcome.iterations,
        "Autofix request completed"
    );

    (StatusCode::OK, Json(outcome)).into_response()
}

/// POST /execute - Run one source file in the sandbox
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecuteRequest>,
) -> Response {
    if payload.source_code.trim().is_empty() {
        return bad_request("source_code must not be empty");
    }

    let request = ExecutionRequest {
        runtime: state.sandbox.registry().resolve(&payload.language),
        source: payload.source_code,
        stdin: payload.stdin,
        timeout: state.sandbox.default_timeout(),
    };
    let result = state.sandbox.execute_request(&request).await;
    state.metrics.observe_execution(&result);

    info!(
        language = %request.runtime.language,
        exit_code = result.exit_code,
        transport_ok = result.transport_ok,
        "Execution completed"
    );

    (StatusCode::OK, Json(result)).into_response()
}

/// GET /languages - Runtimes the sandbox client is configured with
pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.sandbox.registry().list())
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

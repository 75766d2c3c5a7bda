//! Workflow inspection HTTP surface.
//!
//! An auxiliary axum server for observing and driving workflow runs:
//!
//! - `GET  /api/workflows` lists registered workflows
//! - `POST /api/workflows` starts a run (`{workflowId, input, dryRun?}`)
//! - `GET  /api/workflows/runs/{run_id}` returns the run record
//! - `POST /api/workflows/runs/{run_id}/cancel` cancels a run
//! - `GET  /health` returns a runtime health snapshot

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::runtime::{WorkflowError, WorkflowRuntime};

pub fn router(runtime: Arc<WorkflowRuntime>) -> Router {
    Router::new()
        .route("/api/workflows", get(list_workflows).post(start_workflow))
        .route("/api/workflows/runs/{run_id}", get(get_run))
        .route("/api/workflows/runs/{run_id}/cancel", post(cancel_run))
        .route("/health", get(health))
        .with_state(runtime)
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(
    runtime: Arc<WorkflowRuntime>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "workflow inspection server listening");
    axum::serve(listener, router(runtime))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    workflow_id: String,
    #[serde(default)]
    input: serde_json::Value,
    #[serde(default)]
    dry_run: bool,
}

async fn list_workflows(State(runtime): State<Arc<WorkflowRuntime>>) -> Response {
    let workflows: Vec<serde_json::Value> = runtime
        .list()
        .into_iter()
        .map(|spec| {
            json!({
                "id": spec.id,
                "version": spec.version,
                "triggers": spec.triggers,
                "steps": spec.steps.iter().map(|s| s.name.clone()).collect::<Vec<_>>(),
            })
        })
        .collect();
    Json(json!({ "workflows": workflows })).into_response()
}

async fn start_workflow(
    State(runtime): State<Arc<WorkflowRuntime>>,
    Json(request): Json<StartRequest>,
) -> Response {
    if request.dry_run {
        return match runtime.plan(&request.workflow_id) {
            Ok(steps) => Json(json!({
                "runId": serde_json::Value::Null,
                "status": "VALIDATED",
                "steps": steps,
            }))
            .into_response(),
            Err(e) => error_response(e),
        };
    }
    match runtime.start_run(&request.workflow_id, request.input) {
        Ok(run_id) => Json(json!({ "runId": run_id, "status": "PENDING" })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_run(
    State(runtime): State<Arc<WorkflowRuntime>>,
    Path(run_id): Path<String>,
) -> Response {
    match runtime.run_record(&run_id) {
        Ok(run) => Json(run).into_response(),
        Err(e) => error_response(e),
    }
}

async fn cancel_run(
    State(runtime): State<Arc<WorkflowRuntime>>,
    Path(run_id): Path<String>,
) -> Response {
    match runtime.cancel(&run_id) {
        Ok(canceled) => Json(json!({ "runId": run_id, "canceled": canceled })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health(State(runtime): State<Arc<WorkflowRuntime>>) -> Response {
    Json(json!({
        "status": "healthy",
        "component": "workflow",
        "details": {
            "registered": runtime.list().len(),
            "active_runs": runtime.active_count(),
        }
    }))
    .into_response()
}

fn error_response(error: WorkflowError) -> Response {
    let status = match &error {
        WorkflowError::UnknownWorkflow(_) | WorkflowError::UnknownRun(_) => StatusCode::NOT_FOUND,
        WorkflowError::MissingCapability { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "error": error.to_string(),
            "kind": error.kind().to_string(),
        })),
    )
        .into_response()
}

//! Inspection HTTP surface contract tests, driven through the router
//! without binding a socket.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use weaver_workflow::{
    router, CapabilityRegistry, FnHandler, RunStore, RuntimeConfig, WorkflowRuntime, WorkflowSpec,
};

fn runtime() -> Arc<WorkflowRuntime> {
    let mut registry = CapabilityRegistry::new();
    registry.register(
        "echo",
        Arc::new(FnHandler(|ctx: weaver_workflow::StepContext| async move {
            Ok(ctx.input)
        })),
    );
    let runtime = WorkflowRuntime::new(
        registry,
        RunStore::open_in_memory().unwrap(),
        RuntimeConfig::default(),
    );
    runtime
        .register_spec(
            WorkflowSpec::parse(
                Path::new("echo.workflow"),
                r#"
id = "echo-pipeline"

[[step]]
name = "echo"
handler = "echo"
"#,
            )
            .unwrap(),
        )
        .unwrap();
    runtime
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn lists_registered_workflows() {
    let app = router(runtime());
    let response = app
        .oneshot(Request::get("/api/workflows").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["workflows"][0]["id"], "echo-pipeline");
    assert_eq!(body["workflows"][0]["steps"][0], "echo");
}

#[tokio::test]
async fn start_then_inspect_then_cancel() {
    let runtime = runtime();
    let app = router(runtime.clone());

    let start = Request::post("/api/workflows")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"workflowId": "echo-pipeline", "input": {"x": 1}}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(start).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let run_id = body["runId"].as_str().unwrap().to_string();

    // The run record is inspectable (terminal once the echo step lands).
    tokio::time::sleep(Duration::from_millis(300)).await;
    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/api/workflows/runs/{run_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    assert_eq!(record["workflow_id"], "echo-pipeline");

    // Cancel after completion is a clean no-op.
    let response = app
        .oneshot(
            Request::post(format!("/api/workflows/runs/{run_id}/cancel"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn dry_run_plans_without_executing() {
    let runtime = runtime();
    let app = router(runtime.clone());

    let request = Request::post("/api/workflows")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"workflowId": "echo-pipeline", "dryRun": true}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "VALIDATED");
    assert_eq!(body["steps"][0], "echo");
    assert!(body["runId"].is_null());
    assert!(runtime.recent_runs(10).unwrap().is_empty());
}

#[tokio::test]
async fn unknown_ids_return_not_found() {
    let app = router(runtime());

    let response = app
        .clone()
        .oneshot(
            Request::get("/api/workflows/runs/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let request = Request::post("/api/workflows")
        .header("content-type", "application/json")
        .body(Body::from(json!({"workflowId": "ghost"}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

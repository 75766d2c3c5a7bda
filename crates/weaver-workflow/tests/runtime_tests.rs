//! Workflow runtime behavior: durable execution, retries, resume, and
//! cancellation.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;

use weaver_core::{RunStatus, StepStatus};
use weaver_workflow::{
    CapabilityRegistry, FnHandler, RunStore, RuntimeConfig, StepHandler, WorkflowError,
    WorkflowRuntime, WorkflowSpec,
};

struct CountingHandler {
    calls: Arc<AtomicUsize>,
    /// Attempts that fail before the handler starts succeeding.
    fail_first: usize,
}

#[async_trait::async_trait]
impl StepHandler for CountingHandler {
    async fn run(
        &self,
        _ctx: weaver_workflow::StepContext,
    ) -> anyhow::Result<serde_json::Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            anyhow::bail!("scripted failure {call}")
        }
        Ok(json!({ "call": call }))
    }
}

fn spec_from(raw: &str) -> WorkflowSpec {
    WorkflowSpec::parse(Path::new("test.workflow"), raw).unwrap()
}

fn three_step_spec() -> WorkflowSpec {
    spec_from(
        r#"
id = "pipeline"

[[step]]
name = "s1"
handler = "h1"

[[step]]
name = "s2"
handler = "h2"

[[step]]
name = "s3"
handler = "h3"
"#,
    )
}

async fn await_terminal(runtime: &Arc<WorkflowRuntime>, run_id: &str) -> weaver_core::WorkflowRun {
    timeout(Duration::from_secs(10), async {
        loop {
            let run = runtime.run_record(run_id).unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("run reached a terminal state")
}

fn counting_registry(
    fail_first: [usize; 3],
) -> (CapabilityRegistry, [Arc<AtomicUsize>; 3]) {
    let counters = [
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
    ];
    let mut registry = CapabilityRegistry::new();
    for (i, name) in ["h1", "h2", "h3"].iter().enumerate() {
        registry.register(
            *name,
            Arc::new(CountingHandler {
                calls: counters[i].clone(),
                fail_first: fail_first[i],
            }),
        );
    }
    (registry, counters)
}

#[tokio::test]
async fn run_executes_every_step_once_and_persists_results() {
    let (registry, counters) = counting_registry([0, 0, 0]);
    let runtime = WorkflowRuntime::new(registry, RunStore::open_in_memory().unwrap(), RuntimeConfig::default());
    runtime.register_spec(three_step_spec()).unwrap();

    let run_id = runtime.start_run("pipeline", json!({"seed": 1})).unwrap();
    let run = await_terminal(&runtime, &run_id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run.ended_at.is_some());
    for (i, step) in run.steps.iter().enumerate() {
        assert_eq!(step.status, StepStatus::Succeeded, "step {i}");
        assert_eq!(step.attempts, 1);
        assert!(step.result.is_some());
    }
    for counter in &counters {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn transient_step_failures_retry_with_recorded_attempts() {
    let (registry, counters) = counting_registry([0, 2, 0]);
    let runtime = WorkflowRuntime::new(registry, RunStore::open_in_memory().unwrap(), RuntimeConfig::default());
    runtime.register_spec(three_step_spec()).unwrap();

    let run_id = runtime.start_run("pipeline", json!(null)).unwrap();
    let run = await_terminal(&runtime, &run_id).await;

    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.steps[1].attempts, 3);
    assert_eq!(counters[1].load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_fail_the_run_but_preserve_progress() {
    let (registry, _counters) = counting_registry([0, 99, 0]);
    let runtime = WorkflowRuntime::new(registry, RunStore::open_in_memory().unwrap(), RuntimeConfig::default());
    runtime.register_spec(three_step_spec()).unwrap();

    let run_id = runtime.start_run("pipeline", json!(null)).unwrap();
    let run = await_terminal(&runtime, &run_id).await;

    assert_eq!(run.status, RunStatus::Failed);
    // s1 progress preserved for inspection; s3 never scheduled.
    assert_eq!(run.steps[0].status, StepStatus::Succeeded);
    assert_eq!(run.steps[1].status, StepStatus::Failed);
    assert!(run.steps[1].error.as_deref().unwrap().contains("scripted failure"));
    assert_eq!(run.steps[2].status, StepStatus::Pending);
    assert_eq!(run.steps[2].attempts, 0);
}

#[tokio::test]
async fn missing_capability_is_rejected_at_registration() {
    let (registry, _) = counting_registry([0, 0, 0]);
    let runtime = WorkflowRuntime::new(registry, RunStore::open_in_memory().unwrap(), RuntimeConfig::default());

    let spec = spec_from(
        r#"
id = "broken"

[[step]]
name = "s1"
handler = "not-injected"
"#,
    );
    let err = runtime.register_spec(spec).unwrap_err();
    assert!(matches!(err, WorkflowError::MissingCapability { .. }));
    assert_eq!(
        err.kind(),
        weaver_core::ErrorKind::WorkflowMissingCapability
    );
    assert!(runtime.list().is_empty());
}

#[tokio::test]
async fn crashed_run_resumes_from_last_persisted_step() {
    let dir = tempfile::TempDir::new().unwrap();
    let db = dir.path().join("workflows.db");

    // Simulate a run that completed s1 and s2 and then died before s3.
    {
        let store = RunStore::open(&db).unwrap();
        let mut run = weaver_core::WorkflowRun {
            run_id: "crashed".into(),
            workflow_id: "pipeline".into(),
            input: json!({"resumed": true}),
            status: RunStatus::Running,
            steps: vec![
                weaver_core::StepRecord::pending("s1"),
                weaver_core::StepRecord::pending("s2"),
                weaver_core::StepRecord::pending("s3"),
            ],
            started_at: chrono::Utc::now(),
            ended_at: None,
        };
        run.steps[0].status = StepStatus::Succeeded;
        run.steps[0].attempts = 1;
        run.steps[0].result = Some(json!("done-1"));
        run.steps[1].status = StepStatus::Succeeded;
        run.steps[1].attempts = 1;
        run.steps[1].result = Some(json!("done-2"));
        store.insert(&run).unwrap();
    }

    let (registry, counters) = counting_registry([0, 0, 0]);
    let runtime = WorkflowRuntime::new(
        registry,
        RunStore::open(&db).unwrap(),
        RuntimeConfig::default(),
    );
    runtime.register_spec(three_step_spec()).unwrap();

    assert_eq!(runtime.resume_unfinished().unwrap(), 1);
    let run = await_terminal(&runtime, "crashed").await;

    assert_eq!(run.status, RunStatus::Succeeded);
    // Completed steps were not re-executed; only s3 ran.
    assert_eq!(counters[0].load(Ordering::SeqCst), 0);
    assert_eq!(counters[1].load(Ordering::SeqCst), 0);
    assert_eq!(counters[2].load(Ordering::SeqCst), 1);
    assert_eq!(run.steps[0].result, Some(json!("done-1")));
}

#[tokio::test]
async fn cancel_stops_in_flight_runs() {
    let mut registry = CapabilityRegistry::new();
    registry.register(
        "slow",
        Arc::new(FnHandler(|ctx: weaver_workflow::StepContext| async move {
            // A well-behaved handler observes cancellation promptly.
            tokio::select! {
                _ = ctx.cancel.cancelled() => anyhow::bail!("interrupted"),
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(json!("too late")),
            }
        })),
    );
    let runtime = WorkflowRuntime::new(registry, RunStore::open_in_memory().unwrap(), RuntimeConfig::default());
    runtime
        .register_spec(spec_from(
            r#"
id = "long"

[[step]]
name = "wait"
handler = "slow"
"#,
        ))
        .unwrap();

    let run_id = runtime.start_run("long", json!(null)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(runtime.cancel(&run_id).unwrap());

    let run = await_terminal(&runtime, &run_id).await;
    assert_eq!(run.status, RunStatus::Canceled);
}

#[tokio::test]
async fn prior_step_results_are_visible_downstream() {
    let mut registry = CapabilityRegistry::new();
    registry.register(
        "produce",
        Arc::new(FnHandler(|_ctx: weaver_workflow::StepContext| async move {
            Ok(json!({"value": 21}))
        })),
    );
    registry.register(
        "double",
        Arc::new(FnHandler(|ctx: weaver_workflow::StepContext| async move {
            let prior = ctx.prior.get("produce").and_then(|v| v["value"].as_i64());
            Ok(json!(prior.unwrap_or(0) * 2))
        })),
    );
    let runtime = WorkflowRuntime::new(registry, RunStore::open_in_memory().unwrap(), RuntimeConfig::default());
    runtime
        .register_spec(spec_from(
            r#"
id = "chained"

[[step]]
name = "produce"
handler = "produce"

[[step]]
name = "double"
handler = "double"
"#,
        ))
        .unwrap();

    let run_id = runtime.start_run("chained", json!(null)).unwrap();
    let run = await_terminal(&runtime, &run_id).await;
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.steps[1].result, Some(json!(42)));
}

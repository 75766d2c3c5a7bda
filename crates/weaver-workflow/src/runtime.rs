//! The durable workflow runtime.
//!
//! Registered definitions are validated against the capability registry up
//! front; a handler name the host never injected is rejected with
//! `WORKFLOW_MISSING_CAPABILITY` before anything runs. Runs execute steps
//! strictly in order, persist every step result before advancing, honor
//! per-step retry policies and timeouts, and support two-phase
//! cancellation. On startup, unfinished runs resume from the last
//! persisted step.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use weaver_core::{ErrorKind, RunStatus, StepRecord, StepStatus, WorkflowRun};

use crate::capability::{CapabilityRegistry, StepContext};
use crate::definition::{self, StepSpec, WorkflowSpec};
use crate::store::{RunStore, StoreError};

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),
    #[error("workflow '{workflow}' references missing capability '{handler}'")]
    MissingCapability { workflow: String, handler: String },
    #[error("unknown run: {0}")]
    UnknownRun(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::MissingCapability { .. } => ErrorKind::WorkflowMissingCapability,
            _ => ErrorKind::WorkflowStepFailed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_concurrency: usize,
    /// Whole-run wall clock budget.
    pub run_timeout: Duration,
    /// Applied to steps that declare no timeout of their own.
    pub default_step_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            run_timeout: Duration::from_secs(900),
            default_step_timeout: Duration::from_secs(300),
        }
    }
}

/// Result of a discovery pass over the workflow root.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub registered: Vec<String>,
    pub skipped: Vec<String>,
}

pub struct WorkflowRuntime {
    specs: RwLock<HashMap<String, WorkflowSpec>>,
    capabilities: CapabilityRegistry,
    store: RunStore,
    config: RuntimeConfig,
    slots: Arc<Semaphore>,
    active: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
}

impl WorkflowRuntime {
    pub fn new(
        capabilities: CapabilityRegistry,
        store: RunStore,
        config: RuntimeConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            specs: RwLock::new(HashMap::new()),
            capabilities,
            store,
            slots: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            config,
            active: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register one definition after validating every handler resolves.
    pub fn register_spec(&self, spec: WorkflowSpec) -> Result<(), WorkflowError> {
        for step in &spec.steps {
            if !self.capabilities.contains(&step.handler) {
                return Err(WorkflowError::MissingCapability {
                    workflow: spec.id.clone(),
                    handler: step.handler.clone(),
                });
            }
        }
        debug!(workflow = %spec.id, steps = spec.steps.len(), "workflow registered");
        self.specs.write().insert(spec.id.clone(), spec);
        Ok(())
    }

    /// Discover `*.workflow` files under `root` and register the valid
    /// ones. Invalid files and missing capabilities are reported, never
    /// fatal.
    pub fn discover_and_register(&self, root: &std::path::Path) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for (path, parsed) in definition::discover(root) {
            match parsed {
                Ok(spec) => {
                    let id = spec.id.clone();
                    match self.register_spec(spec) {
                        Ok(()) => report.registered.push(id),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "workflow rejected");
                            report.skipped.push(id);
                        }
                    }
                }
                Err(_) => report.skipped.push(path.display().to_string()),
            }
        }
        info!(
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            "workflow discovery finished"
        );
        report
    }

    pub fn list(&self) -> Vec<WorkflowSpec> {
        let mut specs: Vec<WorkflowSpec> = self.specs.read().values().cloned().collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }

    /// Validate a start request without executing anything; returns the
    /// planned step names.
    pub fn plan(&self, workflow_id: &str) -> Result<Vec<String>, WorkflowError> {
        let specs = self.specs.read();
        let spec = specs
            .get(workflow_id)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_id.to_string()))?;
        Ok(spec.steps.iter().map(|s| s.name.clone()).collect())
    }

    /// Create a run and execute it in the background.
    pub fn start_run(
        self: &Arc<Self>,
        workflow_id: &str,
        input: serde_json::Value,
    ) -> Result<String, WorkflowError> {
        let spec = {
            let specs = self.specs.read();
            specs
                .get(workflow_id)
                .cloned()
                .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow_id.to_string()))?
        };
        let run = WorkflowRun {
            run_id: Uuid::new_v4().to_string(),
            workflow_id: spec.id.clone(),
            input,
            status: RunStatus::Pending,
            steps: spec.steps.iter().map(|s| StepRecord::pending(&s.name)).collect(),
            started_at: Utc::now(),
            ended_at: None,
        };
        self.store.insert(&run)?;
        let run_id = run.run_id.clone();
        let runtime = self.clone();
        let spawn_id = run_id.clone();
        tokio::spawn(async move { runtime.execute(spawn_id).await });
        Ok(run_id)
    }

    pub fn run_record(&self, run_id: &str) -> Result<WorkflowRun, WorkflowError> {
        self.store
            .load(run_id)?
            .ok_or_else(|| WorkflowError::UnknownRun(run_id.to_string()))
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<WorkflowRun>, WorkflowError> {
        Ok(self.store.recent(limit)?)
    }

    /// Number of runs currently executing.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel a run: the in-flight step is signaled, subsequent steps are
    /// not scheduled. Idempotent; canceling a finished run is a no-op.
    pub fn cancel(&self, run_id: &str) -> Result<bool, WorkflowError> {
        let run = self.run_record(run_id)?;
        if run.status.is_terminal() {
            return Ok(false);
        }
        if let Some(token) = self.active.get(run_id) {
            token.cancel();
            return Ok(true);
        }
        // Not in flight (e.g. pre-resume leftover): mark directly.
        let mut run = run;
        run.status = RunStatus::Canceled;
        run.ended_at = Some(Utc::now());
        self.store.update(&run)?;
        Ok(true)
    }

    /// Resume every unfinished run from its last persisted step. Called
    /// once at startup.
    pub fn resume_unfinished(self: &Arc<Self>) -> Result<usize, WorkflowError> {
        let runs = self.store.unfinished()?;
        let count = runs.len();
        for run in runs {
            info!(run_id = %run.run_id, workflow = %run.workflow_id, "resuming run");
            let runtime = self.clone();
            tokio::spawn(async move { runtime.execute(run.run_id).await });
        }
        Ok(count)
    }

    async fn execute(self: Arc<Self>, run_id: String) {
        let Ok(permit) = self.slots.clone().acquire_owned().await else {
            return;
        };
        let _permit = permit;
        let cancel = self.shutdown.child_token();
        self.active.insert(run_id.clone(), cancel.clone());

        let outcome = tokio::time::timeout(
            self.config.run_timeout,
            self.drive(&run_id, cancel.clone()),
        )
        .await;
        self.active.remove(&run_id);

        if outcome.is_err() {
            // The whole run blew its wall-clock budget.
            if let Ok(Some(mut run)) = self.store.load(&run_id) {
                if !run.status.is_terminal() {
                    run.status = RunStatus::Failed;
                    run.ended_at = Some(Utc::now());
                    if let Some(step) = run.steps.iter_mut().find(|s| s.status == StepStatus::Running)
                    {
                        step.status = StepStatus::Failed;
                        step.error = Some("TIMEOUT".into());
                        step.ended_at = Some(Utc::now());
                    }
                    let _ = self.store.update(&run);
                    warn!(run_id, "run failed: TIMEOUT");
                }
            }
            metrics::counter!("weaver_workflow_runs_total", "status" => "failed").increment(1);
        }
    }

    /// Advance a run step by step. Every state change is persisted before
    /// the next step is considered.
    async fn drive(&self, run_id: &str, cancel: CancellationToken) {
        let Ok(Some(mut run)) = self.store.load(run_id) else {
            warn!(run_id, "run vanished before execution");
            return;
        };
        let spec = {
            let specs = self.specs.read();
            specs.get(&run.workflow_id).cloned()
        };
        let Some(spec) = spec else {
            run.status = RunStatus::Failed;
            run.ended_at = Some(Utc::now());
            let _ = self.store.update(&run);
            warn!(run_id, workflow = %run.workflow_id, "definition no longer registered");
            return;
        };

        run.status = RunStatus::Running;
        if self.store.update(&run).is_err() {
            return;
        }

        let start_index = run.resume_index();
        for index in start_index..run.steps.len() {
            if cancel.is_cancelled() {
                self.finish_canceled(&mut run).await;
                return;
            }
            let Some(step_spec) = spec.steps.iter().find(|s| s.name == run.steps[index].name)
            else {
                run.steps[index].status = StepStatus::Failed;
                run.steps[index].error = Some("step no longer in definition".into());
                run.status = RunStatus::Failed;
                run.ended_at = Some(Utc::now());
                let _ = self.store.update(&run);
                return;
            };

            match self.run_step(&mut run, index, step_spec, &cancel).await {
                StepOutcome::Succeeded => {}
                StepOutcome::Canceled => {
                    self.finish_canceled(&mut run).await;
                    return;
                }
                StepOutcome::Failed => {
                    run.status = RunStatus::Failed;
                    run.ended_at = Some(Utc::now());
                    let _ = self.store.update(&run);
                    metrics::counter!("weaver_workflow_runs_total", "status" => "failed")
                        .increment(1);
                    warn!(
                        run_id = %run.run_id,
                        step = %run.steps[index].name,
                        kind = %ErrorKind::WorkflowStepFailed,
                        "run failed"
                    );
                    return;
                }
            }
        }

        run.status = RunStatus::Succeeded;
        run.ended_at = Some(Utc::now());
        let _ = self.store.update(&run);
        metrics::counter!("weaver_workflow_runs_total", "status" => "succeeded").increment(1);
        info!(run_id = %run.run_id, workflow = %run.workflow_id, "run succeeded");
    }

    async fn run_step(
        &self,
        run: &mut WorkflowRun,
        index: usize,
        spec: &StepSpec,
        cancel: &CancellationToken,
    ) -> StepOutcome {
        let handler = match self.capabilities.get(&spec.handler) {
            Some(h) => h,
            None => {
                run.steps[index].status = StepStatus::Failed;
                run.steps[index].error =
                    Some(format!("{}: {}", ErrorKind::WorkflowMissingCapability, spec.handler));
                return StepOutcome::Failed;
            }
        };
        let timeout = spec
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_step_timeout);

        let prior: HashMap<String, serde_json::Value> = run.steps[..index]
            .iter()
            .filter_map(|s| s.result.clone().map(|r| (s.name.clone(), r)))
            .collect();

        loop {
            run.steps[index].status = StepStatus::Running;
            run.steps[index].attempts += 1;
            run.steps[index].started_at.get_or_insert_with(Utc::now);
            if self.store.update(run).is_err() {
                return StepOutcome::Failed;
            }
            let attempt = run.steps[index].attempts;

            let ctx = StepContext {
                input: run.input.clone(),
                prior: prior.clone(),
                cancel: cancel.clone(),
            };
            let invocation = tokio::time::timeout(timeout, handler.run(ctx));
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    run.steps[index].status = StepStatus::Failed;
                    run.steps[index].error = Some("canceled".into());
                    run.steps[index].ended_at = Some(Utc::now());
                    let _ = self.store.update(run);
                    return StepOutcome::Canceled;
                }
                result = invocation => result,
            };

            match result {
                Ok(Ok(value)) => {
                    // Persisted before the run advances: the resume
                    // guarantee lives or dies right here.
                    run.steps[index].status = StepStatus::Succeeded;
                    run.steps[index].result = Some(value);
                    run.steps[index].error = None;
                    run.steps[index].ended_at = Some(Utc::now());
                    if self.store.update(run).is_err() {
                        return StepOutcome::Failed;
                    }
                    return StepOutcome::Succeeded;
                }
                Ok(Err(e)) => {
                    warn!(step = %spec.name, attempt, error = %e, "step attempt failed");
                    run.steps[index].error = Some(e.to_string());
                }
                Err(_) => {
                    warn!(step = %spec.name, attempt, "step attempt timed out");
                    run.steps[index].error = Some("TIMEOUT".into());
                }
            }

            if attempt >= spec.max_attempts {
                run.steps[index].status = StepStatus::Failed;
                run.steps[index].ended_at = Some(Utc::now());
                let _ = self.store.update(run);
                return StepOutcome::Failed;
            }
            let backoff = Duration::from_millis(100).saturating_mul(1 << attempt.min(6));
            tokio::time::sleep(backoff).await;
        }
    }

    async fn finish_canceled(&self, run: &mut WorkflowRun) {
        run.status = RunStatus::Canceled;
        run.ended_at = Some(Utc::now());
        let _ = self.store.update(run);
        metrics::counter!("weaver_workflow_runs_total", "status" => "canceled").increment(1);
        info!(run_id = %run.run_id, "run canceled");
    }
}

enum StepOutcome {
    Succeeded,
    Failed,
    Canceled,
}

//! Observability: structured logging, metrics, and health.
//!
//! Log entries carry `timestamp, level, component (target), event, context`
//! through `tracing`'s structured fields. Two sinks: human-readable output
//! on stderr, and a JSON event log on disk, rotated daily and pruned after
//! the retention window.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum ObserveError {
    #[error("failed to initialize logging: {0}")]
    Init(String),
}

/// Liveness classification for one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// A structured health report, one per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub component: String,
    pub status: HealthStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

impl HealthReport {
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: "ok".into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Worst-of aggregation across component reports.
pub fn aggregate(reports: &[HealthReport]) -> HealthStatus {
    reports
        .iter()
        .map(|r| r.status)
        .max()
        .unwrap_or(HealthStatus::Healthy)
}

/// Initialize the tracing stack.
///
/// Returns the appender guard; dropping it flushes and stops the
/// background log writer, so the daemon holds it until shutdown.
pub fn init_tracing(
    level: &str,
    log_dir: &Path,
    retention_days: u32,
) -> Result<WorkerGuard, ObserveError> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| ObserveError::Init(format!("creating {}: {e}", log_dir.display())))?;
    prune_old_logs(log_dir, retention_days);

    let file_appender = tracing_appender::rolling::daily(log_dir, "weaver.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| ObserveError::Init(e.to_string()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer)
                .with_target(true)
                .with_current_span(false),
        )
        .try_init()
        .map_err(|e| ObserveError::Init(e.to_string()))?;

    describe_metrics();
    Ok(guard)
}

/// Remove rotated log files older than the retention window.
pub fn prune_old_logs(log_dir: &Path, retention_days: u32) {
    let Ok(entries) = std::fs::read_dir(log_dir) else {
        return;
    };
    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs(u64::from(retention_days) * 24 * 60 * 60);
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("weaver.log") {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        let modified = meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        if modified < cutoff {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}

/// Register metric descriptions once at startup.
fn describe_metrics() {
    metrics::describe_counter!(
        "weaver_rule_executions_total",
        "Rule executions by rule id"
    );
    metrics::describe_counter!(
        "weaver_rule_failures_total",
        "Failed rule executions by rule id"
    );
    metrics::describe_histogram!(
        "weaver_rule_duration_ms",
        "Rule execution latency in milliseconds"
    );
    metrics::describe_counter!("weaver_llm_calls_total", "LLM provider calls");
    metrics::describe_counter!("weaver_llm_failures_total", "Failed LLM provider calls");
    metrics::describe_counter!(
        "weaver_workflow_runs_total",
        "Workflow runs by terminal status"
    );
    metrics::describe_gauge!("weaver_memory_entries", "Live memory store entries");
    metrics::describe_gauge!("weaver_cache_notes", "Notes in the shadow cache");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_takes_the_worst_status() {
        let reports = vec![
            HealthReport::healthy("cache"),
            HealthReport::degraded("llm", "circuit open"),
            HealthReport::healthy("watcher"),
        ];
        assert_eq!(aggregate(&reports), HealthStatus::Degraded);

        let reports = vec![
            HealthReport::degraded("llm", "x"),
            HealthReport::unhealthy("cache", "db gone"),
        ];
        assert_eq!(aggregate(&reports), HealthStatus::Unhealthy);

        assert_eq!(aggregate(&[]), HealthStatus::Healthy);
    }

    #[test]
    fn prune_removes_only_old_weaver_logs() {
        let dir = tempfile::TempDir::new().unwrap();
        let old_log = dir.path().join("weaver.log.2000-01-01");
        let other = dir.path().join("keep.txt");
        std::fs::write(&old_log, "x").unwrap();
        std::fs::write(&other, "x").unwrap();

        // Backdate the log file.
        let ancient = std::time::SystemTime::UNIX_EPOCH;
        let file = std::fs::File::open(&old_log).unwrap();
        file.set_modified(ancient).unwrap();
        drop(file);

        prune_old_logs(dir.path(), 7);
        assert!(!old_log.exists());
        assert!(other.exists());
    }

    #[test]
    fn health_report_serializes_cleanly() {
        let report = HealthReport::degraded("llm", "breaker open")
            .with_details(serde_json::json!({"state": "OPEN"}));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["details"]["state"], "OPEN");
    }
}

//! Durable workflow run records.
//!
//! The workflow runtime owns these; each step result is persisted before the
//! run's status advances, so a crashed run resumes from the last recorded
//! step instead of re-executing completed work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// Persisted record for a single step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Total invocation count across the run's lifetime, retries included.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepRecord {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            started_at: None,
            ended_at: None,
            attempts: 0,
            result: None,
            error: None,
        }
    }
}

/// A durable execution of one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub workflow_id: String,
    pub input: serde_json::Value,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// Index of the first step that has not yet succeeded.
    pub fn resume_index(&self) -> usize {
        self.steps
            .iter()
            .position(|s| s.status != StepStatus::Succeeded)
            .unwrap_or(self.steps.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_skips_completed_steps() {
        let mut run = WorkflowRun {
            run_id: "r1".into(),
            workflow_id: "wf".into(),
            input: serde_json::Value::Null,
            status: RunStatus::Running,
            steps: vec![
                StepRecord::pending("s1"),
                StepRecord::pending("s2"),
                StepRecord::pending("s3"),
            ],
            started_at: Utc::now(),
            ended_at: None,
        };
        run.steps[0].status = StepStatus::Succeeded;
        run.steps[1].status = StepStatus::Succeeded;
        assert_eq!(run.resume_index(), 2);

        run.steps[2].status = StepStatus::Succeeded;
        assert_eq!(run.resume_index(), 3);
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Canceled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
    }
}

//! Durable run records.
//!
//! One SQLite row per run, with the step records serialized as JSON. Every
//! step result is written before the run's status advances, which is what
//! makes crash-resume possible: completed steps are simply never
//! re-executed on replay.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use weaver_core::{RunStatus, StepRecord, WorkflowRun};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open workflow store: {0}")]
    Open(String),
    #[error("workflow store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("run record corrupt: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Clone)]
pub struct RunStore {
    conn: Arc<Mutex<Connection>>,
}

impl RunStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("creating {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Open(format!("opening {}: {e}", path.display())))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS runs (
                run_id      TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                input       TEXT NOT NULL,
                status      TEXT NOT NULL,
                steps       TEXT NOT NULL,
                started_at  TEXT NOT NULL,
                ended_at    TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn insert(&self, run: &WorkflowRun) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO runs (run_id, workflow_id, input, status, steps, started_at, ended_at)\n             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.run_id,
                run.workflow_id,
                run.input.to_string(),
                status_str(run.status),
                serde_json::to_string(&run.steps)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                run.started_at.to_rfc3339(),
                run.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Persist the run's current steps and status in one write.
    pub fn update(&self, run: &WorkflowRun) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE runs SET status = ?2, steps = ?3, ended_at = ?4 WHERE run_id = ?1",
            params![
                run.run_id,
                status_str(run.status),
                serde_json::to_string(&run.steps)
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                run.ended_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    pub fn load(&self, run_id: &str) -> Result<Option<WorkflowRun>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT run_id, workflow_id, input, status, steps, started_at, ended_at\n             FROM runs WHERE run_id = ?1",
            params![run_id],
            row_to_run,
        )
        .optional()?
        .transpose()
    }

    /// Runs that were in flight when the process died; candidates for
    /// resume at startup.
    pub fn unfinished(&self) -> Result<Vec<WorkflowRun>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT run_id, workflow_id, input, status, steps, started_at, ended_at\n             FROM runs WHERE status IN ('PENDING', 'RUNNING') ORDER BY started_at",
        )?;
        let rows = stmt.query_map([], row_to_run)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row??);
        }
        Ok(runs)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<WorkflowRun>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT run_id, workflow_id, input, status, steps, started_at, ended_at\n             FROM runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_run)?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row??);
        }
        Ok(runs)
    }
}

type RowResult = std::result::Result<WorkflowRun, StoreError>;

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RowResult> {
    let run_id: String = row.get(0)?;
    let workflow_id: String = row.get(1)?;
    let input: String = row.get(2)?;
    let status: String = row.get(3)?;
    let steps: String = row.get(4)?;
    let started_at: String = row.get(5)?;
    let ended_at: Option<String> = row.get(6)?;

    Ok((|| -> RowResult {
        let steps: Vec<StepRecord> =
            serde_json::from_str(&steps).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(WorkflowRun {
            run_id,
            workflow_id,
            input: serde_json::from_str(&input)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?,
            status: parse_status(&status)?,
            steps,
            started_at: started_at
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("started_at: {e}")))?,
            ended_at: match ended_at {
                Some(raw) => Some(
                    raw.parse()
                        .map_err(|e| StoreError::Corrupt(format!("ended_at: {e}")))?,
                ),
                None => None,
            },
        })
    })())
}

fn status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "PENDING",
        RunStatus::Running => "RUNNING",
        RunStatus::Succeeded => "SUCCEEDED",
        RunStatus::Failed => "FAILED",
        RunStatus::Canceled => "CANCELED",
    }
}

fn parse_status(raw: &str) -> std::result::Result<RunStatus, StoreError> {
    match raw {
        "PENDING" => Ok(RunStatus::Pending),
        "RUNNING" => Ok(RunStatus::Running),
        "SUCCEEDED" => Ok(RunStatus::Succeeded),
        "FAILED" => Ok(RunStatus::Failed),
        "CANCELED" => Ok(RunStatus::Canceled),
        other => Err(StoreError::Corrupt(format!("unknown status {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weaver_core::StepStatus;

    fn sample_run() -> WorkflowRun {
        WorkflowRun {
            run_id: "r1".into(),
            workflow_id: "wf".into(),
            input: serde_json::json!({"k": "v"}),
            status: RunStatus::Running,
            steps: vec![StepRecord::pending("s1"), StepRecord::pending("s2")],
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    #[test]
    fn insert_load_round_trip() {
        let store = RunStore::open_in_memory().unwrap();
        let run = sample_run();
        store.insert(&run).unwrap();
        let loaded = store.load("r1").unwrap().unwrap();
        assert_eq!(loaded.workflow_id, "wf");
        assert_eq!(loaded.steps.len(), 2);
        assert_eq!(loaded.status, RunStatus::Running);
    }

    #[test]
    fn update_persists_step_progress() {
        let store = RunStore::open_in_memory().unwrap();
        let mut run = sample_run();
        store.insert(&run).unwrap();

        run.steps[0].status = StepStatus::Succeeded;
        run.steps[0].result = Some(serde_json::json!(42));
        run.steps[0].attempts = 1;
        store.update(&run).unwrap();

        let loaded = store.load("r1").unwrap().unwrap();
        assert_eq!(loaded.steps[0].status, StepStatus::Succeeded);
        assert_eq!(loaded.steps[0].result, Some(serde_json::json!(42)));
        assert_eq!(loaded.resume_index(), 1);
    }

    #[test]
    fn unfinished_lists_in_flight_runs_only() {
        let store = RunStore::open_in_memory().unwrap();
        let mut done = sample_run();
        done.run_id = "done".into();
        done.status = RunStatus::Succeeded;
        store.insert(&done).unwrap();
        store.insert(&sample_run()).unwrap();

        let unfinished = store.unfinished().unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].run_id, "r1");
    }
}

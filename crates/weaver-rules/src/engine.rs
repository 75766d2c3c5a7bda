//! The rules engine: matching, scheduling, isolation, and effect
//! application.
//!
//! One dispatcher consumes watcher events. Per path, processing is strictly
//! serialized through a lane mutex; across paths a bounded worker pool runs
//! events concurrently. For each event the engine first indexes the note
//! (parse + cache + mirror), then runs eligible rules in priority order,
//! and only acks the event once every eligible rule has terminated.
//!
//! Failure isolation: an exception in one rule never aborts the others; a
//! rule failing repeatedly inside the quarantine window is auto-disabled
//! until an operator re-enables it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use weaver_cache::{CacheError, ShadowCache};
use weaver_config::RulesConfig;
use weaver_core::{
    ErrorKind, FileEvent, FileEventKind, LlmClient, Note, RuleTrigger, VaultIo, VaultIoError,
};
use weaver_memory::MemoryStore;
use weaver_parser::NoteParser;
use weaver_vault::{SyncError, VaultSync};
use weaver_watch::{WatchedEvent, WatcherHandle};

use crate::apply::EffectApplier;
use crate::rule::{Rule, RuleContext, RuleMetadata};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Vault(#[from] VaultIoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// One entry in the bounded execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub rule_id: String,
    pub path: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub partial: bool,
}

/// Admin view of one registered rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleInfo {
    pub id: String,
    pub name: String,
    pub trigger: RuleTrigger,
    pub priority: i32,
    pub enabled: bool,
    pub quarantined: bool,
    pub metadata: RuleMetadata,
}

/// Aggregate engine statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub quarantined: Vec<String>,
}

#[derive(Debug, Default)]
struct RuleState {
    enabled: bool,
    quarantined: bool,
    failures: VecDeque<Instant>,
    executions: u64,
    successes: u64,
    total_latency_ms: u64,
}

pub struct RulesEngine {
    rules: RwLock<Vec<Arc<dyn Rule>>>,
    state: DashMap<String, RuleState>,
    cache: ShadowCache,
    memory: MemoryStore,
    llm: Arc<dyn LlmClient>,
    vault: Arc<dyn VaultIo>,
    sync: Arc<VaultSync>,
    applier: EffectApplier,
    parser: NoteParser,
    config: RulesConfig,
    lanes: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
    exec_log: Mutex<VecDeque<ExecutionRecord>>,
}

impl RulesEngine {
    pub fn new(
        cache: ShadowCache,
        memory: MemoryStore,
        llm: Arc<dyn LlmClient>,
        vault: Arc<dyn VaultIo>,
        sync: Arc<VaultSync>,
        config: RulesConfig,
    ) -> Arc<Self> {
        let applier = EffectApplier::new(
            vault.clone(),
            cache.clone(),
            memory.clone(),
            sync.clone(),
        );
        Arc::new(Self {
            rules: RwLock::new(Vec::new()),
            state: DashMap::new(),
            cache,
            memory,
            llm,
            vault,
            sync,
            applier,
            parser: NoteParser::new(),
            workers: Arc::new(Semaphore::new(config.parallelism)),
            config,
            lanes: DashMap::new(),
            shutdown: CancellationToken::new(),
            exec_log: Mutex::new(VecDeque::new()),
        })
    }

    /// Register a rule. Call during startup, before `run`.
    pub fn register(&self, rule: Arc<dyn Rule>) {
        let id = rule.id().to_string();
        self.state.insert(
            id.clone(),
            RuleState {
                enabled: true,
                ..Default::default()
            },
        );
        self.rules.write().push(rule);
        debug!(rule = %id, "rule registered");
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Main dispatch loop: consume watcher events until shutdown.
    pub async fn run(self: Arc<Self>, watcher: WatcherHandle) {
        info!(rules = self.rules.read().len(), "rules engine running");
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                watched = watcher.next_event() => {
                    let Some(watched) = watched else { break };
                    let permit = match self.workers.clone().acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => break,
                    };
                    let engine = self.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        engine.process_watched(watched).await;
                    });
                }
            }
        }
        watcher.shutdown().await;
        info!("rules engine stopped");
    }

    async fn process_watched(&self, watched: WatchedEvent) {
        let event = watched.event.clone();
        match self.process_event(&event).await {
            Ok(()) => watched.ack(),
            Err(e) => {
                warn!(path = %event.path, error = %e, "event processing failed, leaving un-acked");
                watched.nack();
            }
        }
    }

    /// Index the event's note, then run eligible rules. Indexing failure
    /// leaves the event un-acked so the watcher redelivers it; rule
    /// failures are isolated and do not fail the event.
    pub async fn process_event(&self, event: &FileEvent) -> Result<(), EngineError> {
        // Per-path serialization: at most one event processed per path at
        // any instant; tokio's mutex queues waiters FIFO.
        let lane = self
            .lanes
            .entry(event.path.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lane.lock().await;

        let note = self.index_event(event).await?;
        self.run_rules_for(event, note).await;
        Ok(())
    }

    async fn index_event(&self, event: &FileEvent) -> Result<Option<Note>, EngineError> {
        match event.kind {
            FileEventKind::Deleted => {
                self.cache.delete_note(&event.path).await?;
                self.sync.drop_mirror(&event.path).await?;
                Ok(None)
            }
            FileEventKind::Added | FileEventKind::Changed | FileEventKind::Renamed => {
                if event.kind == FileEventKind::Renamed {
                    if let Some(old) = &event.old_path {
                        self.cache.delete_note(old).await?;
                        self.sync.drop_mirror(old).await?;
                    }
                }
                let bytes = match self.vault.read_file(&event.path).await {
                    Ok(bytes) => bytes,
                    Err(VaultIoError::NotFound(_)) => {
                        // Gone again before we got to it; converge on
                        // deletion rather than failing the event.
                        self.cache.delete_note(&event.path).await?;
                        self.sync.drop_mirror(&event.path).await?;
                        return Ok(None);
                    }
                    Err(e) => return Err(e.into()),
                };
                let parsed = self.parser.parse(&event.path, &bytes);
                let mtime = self
                    .vault
                    .stat(&event.path)
                    .await?
                    .map(|s| s.mtime)
                    .unwrap_or_else(Utc::now);
                self.cache.upsert_note(&parsed, mtime).await?;
                let note = self.cache.get_note(&event.path).await?;
                if let Some(note) = &note {
                    self.sync.mirror_note(note).await?;
                }
                Ok(note)
            }
        }
    }

    fn matches(&self, rule: &dyn Rule, event: &FileEvent, note: Option<&Note>) -> bool {
        let mut triggers = vec![rule.trigger()];
        triggers.extend(rule.extra_triggers());
        triggers.iter().any(|t| match t {
            RuleTrigger::FileAdd => {
                matches!(event.kind, FileEventKind::Added | FileEventKind::Renamed)
            }
            RuleTrigger::FileChange => event.kind == FileEventKind::Changed,
            RuleTrigger::FileDelete => event.kind == FileEventKind::Deleted,
            RuleTrigger::TagMatch => match (rule.tag_filter(), note) {
                (Some(tag), Some(note)) => {
                    !matches!(event.kind, FileEventKind::Deleted)
                        && note.tags.contains(&tag.to_lowercase())
                }
                _ => false,
            },
            RuleTrigger::Schedule | RuleTrigger::Manual => false,
        })
    }

    async fn run_rules_for(&self, event: &FileEvent, note: Option<Note>) {
        let mut eligible: Vec<Arc<dyn Rule>> = {
            let rules = self.rules.read();
            rules
                .iter()
                .filter(|r| self.is_enabled(r.id()))
                .filter(|r| self.matches(r.as_ref(), event, note.as_ref()))
                .cloned()
                .collect()
        };
        // Descending priority, ties broken by id.
        eligible.sort_by(|a, b| {
            b.priority()
                .cmp(&a.priority())
                .then_with(|| a.id().cmp(b.id()))
        });
        if eligible.is_empty() {
            return;
        }

        let mut current = note;
        for rule in eligible {
            self.execute_rule(&rule, event, current.clone()).await;
            // A rule may have rewritten the note; later rules see the
            // post-state, not a stale snapshot.
            if !matches!(event.kind, FileEventKind::Deleted) {
                if let Ok(reloaded) = self.cache.get_note(&event.path).await {
                    current = reloaded;
                }
            }
        }
    }

    async fn execute_rule(&self, rule: &Arc<dyn Rule>, event: &FileEvent, note: Option<Note>) {
        let cancel = self.shutdown.child_token();
        let ctx = Arc::new(RuleContext::new(
            event.clone(),
            note,
            self.cache.clone(),
            self.memory.clone(),
            self.llm.clone(),
            cancel.clone(),
            self.config.clone(),
        ));
        let started = Instant::now();
        let started_at = Utc::now();
        let timeout = Duration::from_millis(self.config.action_timeout_ms);

        // Condition: an exception here skips the rule and counts toward
        // quarantine, but is never fatal to the event.
        let proceed = match tokio::time::timeout(timeout, rule.condition(&ctx)).await {
            Ok(Ok(proceed)) => proceed,
            Ok(Err(e)) => {
                warn!(rule = rule.id(), path = %event.path, error = %e, "rule condition raised");
                self.finish(rule.id(), event, started, started_at, Some(ErrorKind::RuleConditionError), false);
                return;
            }
            Err(_) => {
                warn!(rule = rule.id(), path = %event.path, "rule condition timed out");
                self.finish(rule.id(), event, started, started_at, Some(ErrorKind::RuleTimeout), false);
                return;
            }
        };
        if !proceed {
            trace!(rule = rule.id(), path = %event.path, "condition false, skipped");
            return;
        }

        // Action runs in its own task so cancellation is two-phase: signal
        // the token, give the rule a grace period to unwind, then abandon.
        let action_rule = rule.clone();
        let action_ctx = ctx.clone();
        let mut handle =
            tokio::spawn(async move { action_rule.action(action_ctx.as_ref()).await });

        let effects = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(effects))) => effects,
            Ok(Ok(Err(e))) => {
                warn!(rule = rule.id(), path = %event.path, error = %e, "rule action failed");
                self.finish(rule.id(), event, started, started_at, Some(ErrorKind::RuleApplyFailed), false);
                return;
            }
            Ok(Err(join_err)) => {
                error!(rule = rule.id(), path = %event.path, error = %join_err, "rule action panicked");
                self.finish(rule.id(), event, started, started_at, Some(ErrorKind::RuleApplyFailed), false);
                return;
            }
            Err(_) => {
                cancel.cancel();
                let grace = Duration::from_millis(self.config.grace_period_ms);
                let kind = match tokio::time::timeout(grace, &mut handle).await {
                    Ok(_) => ErrorKind::RuleTimeout,
                    Err(_) => {
                        handle.abort();
                        ErrorKind::RuleAbandoned
                    }
                };
                warn!(rule = rule.id(), path = %event.path, kind = %kind, "rule action canceled");
                self.finish(rule.id(), event, started, started_at, Some(kind), false);
                return;
            }
        };

        for diagnostic in &effects.diagnostics {
            debug!(rule = rule.id(), kind = %diagnostic.kind, message = %diagnostic.message, "rule diagnostic");
        }

        let outcome = self.applier.apply(&effects).await;
        if outcome.failed() {
            warn!(
                rule = rule.id(),
                path = %event.path,
                completed = outcome.sub_steps_completed,
                total = outcome.sub_steps_total,
                error = outcome.error.as_deref().unwrap_or(""),
                "rule effects partially applied"
            );
            self.finish(
                rule.id(),
                event,
                started,
                started_at,
                Some(ErrorKind::RuleApplyFailed),
                outcome.partial(),
            );
        } else {
            self.finish(rule.id(), event, started, started_at, None, false);
        }
    }

    /// Record one execution: stats, quarantine bookkeeping, metrics, the
    /// execution log, and the structured outcome line.
    fn finish(
        &self,
        rule_id: &str,
        event: &FileEvent,
        started: Instant,
        started_at: DateTime<Utc>,
        error_kind: Option<ErrorKind>,
        partial: bool,
    ) {
        let duration_ms = started.elapsed().as_millis() as u64;
        let success = error_kind.is_none();

        let mut quarantined_now = false;
        if let Some(mut state) = self.state.get_mut(rule_id) {
            state.executions += 1;
            state.total_latency_ms += duration_ms;
            if success {
                state.successes += 1;
            } else if error_kind.is_some_and(|k| k.counts_toward_quarantine()) {
                let now = Instant::now();
                let window = Duration::from_secs(self.config.quarantine_window_secs);
                state.failures.push_back(now);
                while state
                    .failures
                    .front()
                    .is_some_and(|t| now.duration_since(*t) > window)
                {
                    state.failures.pop_front();
                }
                if state.failures.len() as u32 >= self.config.quarantine_threshold {
                    state.quarantined = true;
                    state.enabled = false;
                    quarantined_now = true;
                }
            }
        }
        if quarantined_now {
            error!(rule = rule_id, kind = %ErrorKind::RuleQuarantined, "rule quarantined, manual re-enable required");
        }

        metrics::counter!("weaver_rule_executions_total", "rule" => rule_id.to_string())
            .increment(1);
        if !success {
            metrics::counter!("weaver_rule_failures_total", "rule" => rule_id.to_string())
                .increment(1);
        }
        metrics::histogram!("weaver_rule_duration_ms", "rule" => rule_id.to_string())
            .record(duration_ms as f64);

        let record = ExecutionRecord {
            rule_id: rule_id.to_string(),
            path: event.path.clone(),
            started_at,
            duration_ms,
            success,
            error_kind,
            partial,
        };
        {
            let mut log = self.exec_log.lock();
            if log.len() >= self.config.execution_log_size {
                log.pop_front();
            }
            log.push_back(record);
        }

        info!(
            rule = rule_id,
            path = %event.path,
            duration_ms,
            success,
            error_kind = error_kind.map(|k| k.to_string()).unwrap_or_default(),
            "rule executed"
        );
    }

    fn is_enabled(&self, rule_id: &str) -> bool {
        self.state
            .get(rule_id)
            .map(|s| s.enabled)
            .unwrap_or(false)
    }

    // ------------------------------------------------------------------
    // Admin surface
    // ------------------------------------------------------------------

    pub fn list_rules(&self) -> Vec<RuleInfo> {
        self.rules
            .read()
            .iter()
            .map(|rule| {
                let (enabled, quarantined) = self
                    .state
                    .get(rule.id())
                    .map(|s| (s.enabled, s.quarantined))
                    .unwrap_or((false, false));
                RuleInfo {
                    id: rule.id().to_string(),
                    name: rule.name().to_string(),
                    trigger: rule.trigger(),
                    priority: rule.priority(),
                    enabled,
                    quarantined,
                    metadata: rule.metadata(),
                }
            })
            .collect()
    }

    /// Re-enable a rule, clearing quarantine and its failure window.
    pub fn enable(&self, rule_id: &str) -> bool {
        match self.state.get_mut(rule_id) {
            Some(mut state) => {
                state.enabled = true;
                state.quarantined = false;
                state.failures.clear();
                true
            }
            None => false,
        }
    }

    pub fn disable(&self, rule_id: &str) -> bool {
        match self.state.get_mut(rule_id) {
            Some(mut state) => {
                state.enabled = false;
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> EngineStats {
        let mut executions = 0;
        let mut successes = 0;
        let mut total_latency = 0;
        let mut quarantined = Vec::new();
        for entry in self.state.iter() {
            executions += entry.executions;
            successes += entry.successes;
            total_latency += entry.total_latency_ms;
            if entry.quarantined {
                quarantined.push(entry.key().clone());
            }
        }
        quarantined.sort();
        EngineStats {
            executions,
            successes,
            failures: executions - successes,
            success_rate: if executions == 0 {
                1.0
            } else {
                successes as f64 / executions as f64
            },
            avg_latency_ms: if executions == 0 {
                0.0
            } else {
                total_latency as f64 / executions as f64
            },
            quarantined,
        }
    }

    pub fn execution_log(&self) -> Vec<ExecutionRecord> {
        self.exec_log.lock().iter().cloned().collect()
    }

    /// Run every enabled `SCHEDULE` rule once. Driven by a coarse ticker.
    pub async fn tick_schedule(&self) {
        let rules: Vec<Arc<dyn Rule>> = {
            let rules = self.rules.read();
            rules
                .iter()
                .filter(|r| r.trigger() == RuleTrigger::Schedule && self.is_enabled(r.id()))
                .cloned()
                .collect()
        };
        for rule in rules {
            let event = FileEvent::new(FileEventKind::Changed, "", 0);
            self.execute_rule(&rule, &event, None).await;
        }
    }

    /// Manually run one rule, optionally against a note.
    pub async fn run_manual(&self, rule_id: &str, path: Option<&str>) -> bool {
        let rule = {
            let rules = self.rules.read();
            rules.iter().find(|r| r.id() == rule_id).cloned()
        };
        let Some(rule) = rule else { return false };
        if !self.is_enabled(rule_id) {
            return false;
        }
        let (event, note) = match path {
            Some(path) => {
                let note = self.cache.get_note(path).await.ok().flatten();
                (FileEvent::new(FileEventKind::Changed, path, 0), note)
            }
            None => (FileEvent::new(FileEventKind::Changed, "", 0), None),
        };
        self.execute_rule(&rule, &event, note).await;
        true
    }
}

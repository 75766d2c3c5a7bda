//! Debounced vault watcher.
//!
//! Observes the vault directory and emits normalized [`FileEvent`]s to a
//! single in-process subscriber with at-least-once delivery in sequence
//! order:
//!
//! - Raw filesystem events are debounced by `notify-debouncer-full`; a
//!   second coalescing pass keeps only the terminal state per path within
//!   each batch, so rapid add→modify→delete surfaces as one delete.
//! - Ignored prefixes and non-markdown paths never produce events.
//! - On start, a baseline scan diffs the vault against the caller-supplied
//!   cache snapshot and replays the difference as synthetic events before
//!   any live event is delivered.
//! - Events must be acknowledged; an un-acked (dropped or nacked) event is
//!   redelivered with backoff up to a bounded attempt count, after which a
//!   diagnostic is surfaced instead.

mod scan;

pub use scan::BaselineEntry;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use weaver_core::paths::{is_ignored, is_markdown, to_vault_path};
use weaver_core::{Diagnostic, ErrorKind, FileEvent, FileEventKind};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to start watcher: {0}")]
    Backend(#[from] notify::Error),
    #[error("vault root does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("startup scan failed: {0}")]
    Scan(String),
}

pub type Result<T> = std::result::Result<T, WatchError>;

/// Watcher configuration, decoupled from the global config crate so tests
/// can construct it directly.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub root: PathBuf,
    pub debounce: Duration,
    pub ignore: Vec<String>,
    pub queue_capacity: usize,
    /// Redeliveries before an event is dropped with a diagnostic.
    pub max_redeliveries: u32,
}

impl WatchConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            debounce: Duration::from_millis(1_000),
            ignore: Vec::new(),
            queue_capacity: 1_024,
            max_redeliveries: 5,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_ignore(mut self, ignore: Vec<String>) -> Self {
        self.ignore = ignore;
        self
    }
}

enum AckMsg {
    Done,
    Redeliver(FileEvent, u32),
}

/// A delivered event that must be acknowledged.
///
/// Dropping without [`ack`](WatchedEvent::ack) counts as a nack and the
/// event is redelivered, so a crashed consumer cannot silently lose the
/// terminal state of a path.
#[derive(Debug)]
pub struct WatchedEvent {
    pub event: FileEvent,
    attempt: u32,
    ack_tx: Option<flume::Sender<AckMsg>>,
}

impl std::fmt::Debug for AckMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AckMsg::Done => f.write_str("Done"),
            AckMsg::Redeliver(ev, n) => write!(f, "Redeliver({}, {n})", ev.path),
        }
    }
}

impl WatchedEvent {
    pub fn ack(mut self) {
        if let Some(tx) = self.ack_tx.take() {
            let _ = tx.send(AckMsg::Done);
        }
    }

    pub fn nack(self) {
        // Drop handles the redelivery signal.
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Drop for WatchedEvent {
    fn drop(&mut self) {
        if let Some(tx) = self.ack_tx.take() {
            let _ = tx.send(AckMsg::Redeliver(self.event.clone(), self.attempt + 1));
        }
    }
}

/// Running watcher handle: the event stream plus shutdown coordination.
pub struct WatcherHandle {
    events: flume::Receiver<WatchedEvent>,
    diagnostics: flume::Receiver<Diagnostic>,
    cancel: CancellationToken,
    pump: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
    /// Receive the next event; `None` once the watcher shut down and the
    /// queue drained.
    pub async fn next_event(&self) -> Option<WatchedEvent> {
        self.events.recv_async().await.ok()
    }

    pub fn try_next_event(&self) -> Option<WatchedEvent> {
        self.events.try_recv().ok()
    }

    pub fn drain_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.try_iter().collect()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.pump.await;
        info!("watcher shut down");
    }
}

/// Start watching a vault.
///
/// `baseline` is the shadow cache's last known state; differences found by
/// the startup scan are replayed as synthetic events before live events.
pub async fn start(config: WatchConfig, baseline: Vec<BaselineEntry>) -> Result<WatcherHandle> {
    if !config.root.is_dir() {
        return Err(WatchError::MissingRoot(config.root.clone()));
    }

    let (raw_tx, raw_rx) = flume::unbounded::<DebounceEventResult>();
    let mut debouncer = new_debouncer(config.debounce, None, move |result: DebounceEventResult| {
        let _ = raw_tx.send(result);
    })?;
    debouncer.watch(&config.root, RecursiveMode::Recursive)?;

    let (event_tx, event_rx) = flume::bounded::<WatchedEvent>(config.queue_capacity);
    let (diag_tx, diag_rx) = flume::unbounded::<Diagnostic>();
    let (ack_tx, ack_rx) = flume::unbounded::<AckMsg>();
    let cancel = CancellationToken::new();

    // Synthetic reconciliation events precede anything live; the debouncer
    // is already running, so changes racing the scan are buffered in
    // raw_rx and delivered right after.
    let synthetic = scan::baseline_diff(&config, &baseline, &diag_tx).await?;
    info!(events = synthetic.len(), "startup scan replay ready");

    let pump = tokio::spawn(pump_loop(
        config,
        synthetic,
        raw_rx,
        event_tx,
        diag_tx,
        ack_tx,
        ack_rx,
        cancel.clone(),
        debouncer,
    ));

    Ok(WatcherHandle {
        events: event_rx,
        diagnostics: diag_rx,
        cancel,
        pump,
    })
}

#[allow(clippy::too_many_arguments)]
async fn pump_loop(
    config: WatchConfig,
    synthetic: Vec<(FileEventKind, String, Option<String>)>,
    raw_rx: flume::Receiver<DebounceEventResult>,
    event_tx: flume::Sender<WatchedEvent>,
    diag_tx: flume::Sender<Diagnostic>,
    ack_tx: flume::Sender<AckMsg>,
    ack_rx: flume::Receiver<AckMsg>,
    cancel: CancellationToken,
    debouncer: notify_debouncer_full::Debouncer<
        notify::RecommendedWatcher,
        notify_debouncer_full::RecommendedCache,
    >,
) {
    let sequence = Arc::new(AtomicU64::new(0));
    let emit = |kind: FileEventKind, path: String, old_path: Option<String>, attempt: u32| {
        let seq = sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let mut event = FileEvent::new(kind, path, seq);
        event.old_path = old_path;
        WatchedEvent {
            event,
            attempt,
            ack_tx: Some(ack_tx.clone()),
        }
    };

    for (kind, path, old) in synthetic {
        let ev = emit(kind, path, old, 0);
        if event_tx.send_async(ev).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = ack_rx.recv_async() => {
                match msg {
                    Ok(AckMsg::Done) => {}
                    Ok(AckMsg::Redeliver(event, attempt)) => {
                        if attempt > config.max_redeliveries {
                            warn!(path = %event.path, attempt, "event redelivery exhausted");
                            let _ = diag_tx.send(
                                Diagnostic::new(
                                    ErrorKind::VaultIoError,
                                    format!("event for {} dropped after {} redeliveries", event.path, attempt - 1),
                                ),
                            );
                            continue;
                        }
                        // Exponential backoff off the hot path.
                        let delay = Duration::from_millis(100u64.saturating_mul(1 << attempt.min(6)));
                        let tx = event_tx.clone();
                        let redelivery = emit(event.kind, event.path, event.old_path, attempt);
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = tx.send_async(redelivery).await;
                        });
                    }
                    Err(_) => break,
                }
            }
            batch = raw_rx.recv_async() => {
                match batch {
                    Ok(Ok(events)) => {
                        for (kind, path, old) in coalesce_batch(&config, events) {
                            let ev = emit(kind, path, old, 0);
                            if event_tx.send_async(ev).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Err(errors)) => {
                        for error in errors {
                            warn!(error = %error, "watch backend error");
                            let _ = diag_tx.send(Diagnostic::new(
                                ErrorKind::VaultIoError,
                                format!("watch backend error: {error}"),
                            ));
                        }
                    }
                    Err(_) => break,
                }
            }
        }
    }
    drop(debouncer);
    debug!("watcher pump exited");
}

/// Collapse one debounced batch to at most one terminal event per path.
fn coalesce_batch(
    config: &WatchConfig,
    events: Vec<DebouncedEvent>,
) -> Vec<(FileEventKind, String, Option<String>)> {
    // Last state per path wins; insertion order preserved for first
    // appearance so cross-path ordering stays stable.
    let mut order: Vec<String> = Vec::new();
    let mut terminal: HashMap<String, (FileEventKind, Option<String>)> = HashMap::new();

    for debounced in events {
        for mapped in map_event(config, &debounced) {
            let (kind, path, old) = mapped;
            if !terminal.contains_key(&path) {
                order.push(path.clone());
            }
            terminal.insert(path, (kind, old));
        }
    }

    order
        .into_iter()
        .filter_map(|path| {
            terminal
                .remove(&path)
                .map(|(kind, old)| (kind, path, old))
        })
        .collect()
}

/// Normalize one notify event into zero or more (kind, path, old_path)
/// tuples, applying markdown and ignore filters.
fn map_event(
    config: &WatchConfig,
    debounced: &DebouncedEvent,
) -> Vec<(FileEventKind, String, Option<String>)> {
    use notify::event::{EventKind, ModifyKind, RenameMode};

    let rel = |p: &std::path::Path| -> Option<String> {
        let rel = p.strip_prefix(&config.root).ok()?;
        let vault_path = to_vault_path(rel);
        if !is_markdown(&vault_path) || is_ignored(&vault_path, &config.ignore) {
            return None;
        }
        Some(vault_path)
    };

    match &debounced.event.kind {
        EventKind::Create(_) => debounced
            .event
            .paths
            .iter()
            .filter_map(|p| rel(p).map(|path| (FileEventKind::Added, path, None)))
            .collect(),
        EventKind::Remove(_) => debounced
            .event
            .paths
            .iter()
            .filter_map(|p| rel(p).map(|path| (FileEventKind::Deleted, path, None)))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // Both ends observed within the window: a true rename.
            let mut from = None;
            let mut to = None;
            if let [a, b] = debounced.event.paths.as_slice() {
                from = rel(a);
                to = rel(b);
            }
            match (from, to) {
                (Some(from), Some(to)) => {
                    vec![(FileEventKind::Renamed, to, Some(from))]
                }
                // One side filtered (e.g. moved out of an ignored dir):
                // surface what remains as delete/add.
                (Some(from), None) => vec![(FileEventKind::Deleted, from, None)],
                (None, Some(to)) => vec![(FileEventKind::Added, to, None)],
                (None, None) => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => debounced
            .event
            .paths
            .iter()
            .filter_map(|p| rel(p).map(|path| (FileEventKind::Deleted, path, None)))
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => debounced
            .event
            .paths
            .iter()
            .filter_map(|p| rel(p).map(|path| (FileEventKind::Added, path, None)))
            .collect(),
        EventKind::Modify(_) => debounced
            .event
            .paths
            .iter()
            .filter_map(|p| rel(p).map(|path| (FileEventKind::Changed, path, None)))
            .collect(),
        _ => {
            trace!(kind = ?debounced.event.kind, "unmapped watch event");
            Vec::new()
        }
    }
}

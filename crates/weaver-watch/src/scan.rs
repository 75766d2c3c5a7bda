//! Startup baseline scan.
//!
//! Computes the difference between the vault on disk and the shadow
//! cache's last known state, expressed as synthetic events. Replaying them
//! before live events guarantees the cache converges after a restart, no
//! matter what changed while the engine was down.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};
use walkdir::WalkDir;

use weaver_core::paths::{is_ignored, is_markdown, to_vault_path};
use weaver_core::{content_hash, Diagnostic, ErrorKind, FileEventKind};

use crate::{WatchConfig, WatchError};

/// One cache-side note as the watcher needs it for diffing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineEntry {
    pub path: String,
    pub content_hash: String,
}

const READ_RETRIES: u32 = 3;

/// Diff disk against the baseline. Runs on the blocking pool: the scan
/// reads and hashes every note.
pub(crate) async fn baseline_diff(
    config: &WatchConfig,
    baseline: &[BaselineEntry],
    diag_tx: &flume::Sender<Diagnostic>,
) -> Result<Vec<(FileEventKind, String, Option<String>)>, WatchError> {
    let root = config.root.clone();
    let ignore = config.ignore.clone();
    let known: BTreeMap<String, String> = baseline
        .iter()
        .map(|e| (e.path.clone(), e.content_hash.clone()))
        .collect();
    let diag_tx = diag_tx.clone();

    tokio::task::spawn_blocking(move || {
        let mut events = Vec::new();
        let mut seen = Vec::new();

        for entry in WalkDir::new(&root).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "scan could not enter directory");
                    let _ = diag_tx.send(Diagnostic::new(
                        ErrorKind::VaultIoError,
                        format!("startup scan error: {e}"),
                    ));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let vault_path = to_vault_path(rel);
            if !is_markdown(&vault_path) || is_ignored(&vault_path, &ignore) {
                continue;
            }

            match read_with_retry(entry.path()) {
                Ok(bytes) => {
                    let hash = content_hash(&bytes);
                    match known.get(&vault_path) {
                        None => events.push((FileEventKind::Added, vault_path.clone(), None)),
                        Some(cached) if *cached != hash => {
                            events.push((FileEventKind::Changed, vault_path.clone(), None));
                        }
                        Some(_) => {}
                    }
                    seen.push(vault_path);
                }
                Err(e) => {
                    warn!(path = %vault_path, error = %e, "scan read failed permanently");
                    let _ = diag_tx.send(
                        Diagnostic::new(
                            ErrorKind::VaultIoError,
                            format!("startup scan could not read {vault_path}: {e}"),
                        ),
                    );
                    // Leave the baseline entry untouched; the next change
                    // event will retry through the normal pipeline.
                    seen.push(vault_path);
                }
            }
        }

        for path in known.keys() {
            if !seen.contains(path) {
                events.push((FileEventKind::Deleted, path.clone(), None));
            }
        }

        debug!(events = events.len(), "baseline diff computed");
        Ok(events)
    })
    .await
    .map_err(|e| WatchError::Scan(e.to_string()))?
}

/// Bounded retry with backoff for transient read failures during the scan.
fn read_with_retry(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut attempt = 0;
    loop {
        match std::fs::read(path) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < READ_RETRIES => {
                attempt += 1;
                warn!(path = %path.display(), attempt, error = %e, "scan read retry");
                std::thread::sleep(Duration::from_millis(50 * (1 << attempt)));
            }
            Err(e) => return Err(e),
        }
    }
}

//! Bidirectional synchronization: Vault ↔ Shadow Cache ↔ Memory.
//!
//! Direction and policy:
//! - Vault→Cache happens continuously through the watcher pipeline; this
//!   module provides the batched reconciliation used at startup and on
//!   demand (`full_sync`).
//! - Vault→Memory mirrors each indexed note's projection into the
//!   `vault/notes` namespace, keyed by path. Bodies are not mirrored.
//! - Memory→Vault never happens directly; only rule effects write notes,
//!   and they go through `VaultIo`.
//!
//! The vault always wins: a mirror entry that disagrees with the cache is
//! overwritten, and mirror entries for vanished notes are pruned.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use weaver_cache::{CacheError, ShadowCache};
use weaver_core::{Note, ParsedNote, VaultIo, VaultIoError};
use weaver_memory::{MemoryError, MemoryStore};
use weaver_parser::NoteParser;

use crate::is_ignored;

/// Memory namespace holding per-note projections.
pub const MIRROR_NAMESPACE: &str = "vault/notes";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Vault(#[from] VaultIoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Outcome of one full reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullSyncReport {
    pub notes_indexed: usize,
    /// Files that could not be read or statted; they stay out of the index
    /// until the watcher retries them.
    pub files_failed: usize,
    pub mirrors_pruned: usize,
    /// Mirror entries whose `modified_at` disagreed with the cache.
    pub conflicts_overwritten: usize,
}

/// Synchronizer owning the reconciliation and mirroring policy.
pub struct VaultSync {
    vault: Arc<dyn VaultIo>,
    cache: ShadowCache,
    memory: MemoryStore,
    parser: NoteParser,
    ignore: Vec<String>,
    batch_size: usize,
    parallelism: usize,
}

impl VaultSync {
    pub fn new(
        vault: Arc<dyn VaultIo>,
        cache: ShadowCache,
        memory: MemoryStore,
        ignore: Vec<String>,
        batch_size: usize,
        parallelism: usize,
    ) -> Self {
        Self {
            vault,
            cache,
            memory,
            parser: NoteParser::new(),
            ignore,
            batch_size: batch_size.max(1),
            parallelism: parallelism.max(1),
        }
    }

    /// Mirror one note's projection into memory. Unconditional: the vault
    /// side is authoritative, so whatever memory held is overwritten.
    pub async fn mirror_note(&self, note: &Note) -> Result<(), SyncError> {
        let projection = projection_of(note);
        self.memory
            .put(MIRROR_NAMESPACE, &note.path, &projection, 0)
            .await?;
        Ok(())
    }

    /// Drop the mirror entry for a deleted note.
    pub async fn drop_mirror(&self, path: &str) -> Result<bool, SyncError> {
        Ok(self.memory.delete(MIRROR_NAMESPACE, path).await?)
    }

    /// Whether startup should run a full reconciliation: forced after a
    /// cache rebuild, or when the vault's newest mtime is ahead of the
    /// recorded `last_sync_at` by more than `threshold_secs`.
    pub async fn needs_full_sync(&self, threshold_secs: u64) -> Result<bool, SyncError> {
        if self.cache.was_rebuilt() {
            return Ok(true);
        }
        let Some(last_sync) = self.cache.last_sync_at().await? else {
            return Ok(true);
        };
        let mut max_mtime: Option<DateTime<Utc>> = None;
        for path in self.vault.list_files(None).await? {
            if is_ignored(&path, &self.ignore) {
                continue;
            }
            if let Some(stat) = self.vault.stat(&path).await? {
                max_mtime = Some(max_mtime.map_or(stat.mtime, |m| m.max(stat.mtime)));
            }
        }
        Ok(match max_mtime {
            Some(mtime) => {
                mtime.signed_duration_since(last_sync).num_seconds() > threshold_secs as i64
            }
            None => false,
        })
    }

    /// Reconcile cache and memory to vault ground truth.
    ///
    /// Files are processed in batches with bounded parallelism; the cache
    /// swap itself is one transaction, so readers observe either the old
    /// projection or the new one.
    pub async fn full_sync(&self) -> Result<FullSyncReport, SyncError> {
        let mut report = FullSyncReport::default();
        let files: Vec<String> = self
            .vault
            .list_files(None)
            .await?
            .into_iter()
            .filter(|p| !is_ignored(p, &self.ignore))
            .collect();

        let mut parsed: Vec<(ParsedNote, DateTime<Utc>)> = Vec::with_capacity(files.len());
        for batch in files.chunks(self.batch_size) {
            let results = stream::iter(batch.iter().map(|path| {
                let vault = self.vault.clone();
                let parser = self.parser;
                async move {
                    let bytes = vault.read_file(path).await?;
                    let stat = vault.stat(path).await?;
                    let mtime = stat.map(|s| s.mtime).unwrap_or_else(Utc::now);
                    Ok::<_, VaultIoError>((parser.parse(path, &bytes), mtime))
                }
            }))
            .buffer_unordered(self.parallelism)
            .collect::<Vec<_>>()
            .await;

            for result in results {
                match result {
                    Ok(entry) => parsed.push(entry),
                    Err(e) => {
                        warn!(error = %e, "full sync skipped unreadable file");
                        report.files_failed += 1;
                    }
                }
            }
        }
        // Deterministic index order regardless of batch interleaving.
        parsed.sort_by(|a, b| a.0.path.cmp(&b.0.path));

        self.cache.full_sync(&parsed).await?;
        report.notes_indexed = parsed.len();

        // Refresh the memory mirror from the cache side of the fence.
        for (note, mtime) in &parsed {
            let cached = self.cache.get_note(&note.path).await?;
            let Some(cached) = cached else { continue };
            let existing = self.memory.get(MIRROR_NAMESPACE, &note.path).await?;
            if let Some(existing) = existing {
                let mirrored_mtime = existing.get("modified_at").and_then(|v| v.as_str());
                if mirrored_mtime != Some(mtime.to_rfc3339().as_str()) {
                    report.conflicts_overwritten += 1;
                }
            }
            self.mirror_note(&cached).await?;
        }

        // Prune mirror entries whose notes are gone.
        for entry in self.memory.list(MIRROR_NAMESPACE, None).await? {
            if !files.iter().any(|f| f == &entry.key) {
                self.memory.delete(MIRROR_NAMESPACE, &entry.key).await?;
                report.mirrors_pruned += 1;
                debug!(path = %entry.key, "pruned stale mirror entry");
            }
        }

        info!(
            notes = report.notes_indexed,
            failed = report.files_failed,
            pruned = report.mirrors_pruned,
            "vault reconciliation finished"
        );
        Ok(report)
    }
}

/// The per-note projection mirrored to memory: structured metadata only,
/// never the body.
fn projection_of(note: &Note) -> serde_json::Value {
    json!({
        "path": note.path,
        "title": note.title,
        "frontmatter": serde_json::to_value(&note.frontmatter).unwrap_or(serde_json::Value::Null),
        "tags": note.tags.iter().collect::<Vec<_>>(),
        "links": note.links.iter().map(|l| l.target.as_str()).collect::<Vec<_>>(),
        "modified_at": note.modified_at.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FsVault;
    use tempfile::TempDir;
    use weaver_cache::SqliteConfig;

    async fn setup() -> (TempDir, VaultSync, ShadowCache, MemoryStore) {
        let dir = TempDir::new().unwrap();
        let vault = Arc::new(FsVault::new(dir.path()));
        let cache = ShadowCache::open(SqliteConfig::in_memory()).unwrap();
        let memory = MemoryStore::open_in_memory().unwrap();
        let sync = VaultSync::new(
            vault,
            cache.clone(),
            memory.clone(),
            vec![".weaver/".into()],
            10,
            10,
        );
        (dir, sync, cache, memory)
    }

    #[tokio::test]
    async fn full_sync_indexes_and_mirrors() {
        let (dir, sync, cache, memory) = setup().await;
        std::fs::create_dir_all(dir.path().join("concepts")).unwrap();
        std::fs::write(dir.path().join("concepts/graph.md"), "Graph theory").unwrap();

        let report = sync.full_sync().await.unwrap();
        assert_eq!(report.notes_indexed, 1);
        assert_eq!(report.files_failed, 0);

        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.note_count, 1);

        let mirror = memory
            .get(MIRROR_NAMESPACE, "concepts/graph.md")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mirror["path"], "concepts/graph.md");
        assert!(mirror.get("body").is_none());
    }

    #[tokio::test]
    async fn full_sync_prunes_stale_mirrors() {
        let (dir, sync, _cache, memory) = setup().await;
        memory
            .put(MIRROR_NAMESPACE, "ghost.md", &json!({"path": "ghost.md"}), 0)
            .await
            .unwrap();
        std::fs::write(dir.path().join("real.md"), "content").unwrap();

        let report = sync.full_sync().await.unwrap();
        assert_eq!(report.mirrors_pruned, 1);
        assert!(memory.get(MIRROR_NAMESPACE, "ghost.md").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ignored_prefixes_are_skipped() {
        let (dir, sync, cache, _memory) = setup().await;
        std::fs::create_dir_all(dir.path().join(".weaver")).unwrap();
        std::fs::write(dir.path().join(".weaver/internal.md"), "x").unwrap();
        std::fs::write(dir.path().join("visible.md"), "x").unwrap();

        sync.full_sync().await.unwrap();
        let stats = cache.stats().await.unwrap();
        assert_eq!(stats.note_count, 1);
    }

    #[tokio::test]
    async fn needs_full_sync_after_fresh_open() {
        let (_dir, sync, _cache, _memory) = setup().await;
        // No last_sync_at recorded yet.
        assert!(sync.needs_full_sync(5).await.unwrap());

        sync.full_sync().await.unwrap();
        assert!(!sync.needs_full_sync(5).await.unwrap());
    }

    #[tokio::test]
    async fn vault_wins_over_divergent_mirror() {
        let (dir, sync, _cache, memory) = setup().await;
        std::fs::write(dir.path().join("n.md"), "fresh").unwrap();
        memory
            .put(
                MIRROR_NAMESPACE,
                "n.md",
                &json!({"path": "n.md", "modified_at": "2001-01-01T00:00:00+00:00", "tags": ["stale"]}),
                0,
            )
            .await
            .unwrap();

        let report = sync.full_sync().await.unwrap();
        assert_eq!(report.conflicts_overwritten, 1);

        let mirror = memory.get(MIRROR_NAMESPACE, "n.md").await.unwrap().unwrap();
        assert_eq!(mirror["tags"], json!([]));
    }
}

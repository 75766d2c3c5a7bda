//! Debounced file events emitted by the vault watcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal state of a path after a debounce window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileEventKind {
    Added,
    Changed,
    Deleted,
    /// Both the source disappearance and the destination appearance were
    /// observed within one debounce window. Otherwise the pair surfaces as
    /// `Deleted` then `Added`.
    Renamed,
}

/// A debounced, normalized change notification for a single vault path.
///
/// Paths are vault-relative with forward slashes, case preserved. For a
/// given path, events carry non-decreasing `sequence` numbers; within a
/// debounce window all raw changes collapse into at most one event per
/// terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: String,
    /// Source path for `Renamed` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Monotonic per-watcher sequence number.
    pub sequence: u64,
}

impl FileEvent {
    pub fn new(kind: FileEventKind, path: impl Into<String>, sequence: u64) -> Self {
        Self {
            kind,
            path: path.into(),
            old_path: None,
            timestamp: Utc::now(),
            sequence,
        }
    }

    pub fn renamed(from: impl Into<String>, to: impl Into<String>, sequence: u64) -> Self {
        Self {
            kind: FileEventKind::Renamed,
            path: to.into(),
            old_path: Some(from.into()),
            timestamp: Utc::now(),
            sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rename_carries_old_path() {
        let ev = FileEvent::renamed("a.md", "b.md", 7);
        assert_eq!(ev.kind, FileEventKind::Renamed);
        assert_eq!(ev.old_path.as_deref(), Some("a.md"));
        assert_eq!(ev.path, "b.md");
        assert_eq!(ev.sequence, 7);
    }
}

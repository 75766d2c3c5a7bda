//! The narrow contract the engine requires from the vault.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Filesystem metadata for one vault path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub mtime: DateTime<Utc>,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum VaultIoError {
    #[error("vault path not found: {0}")]
    NotFound(String),
    #[error("vault path escapes the vault root: {0}")]
    OutsideVault(String),
    #[error("vault io failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl VaultIoError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Read/write access to the vault, consumed by the engine.
///
/// All paths are vault-relative with forward slashes. Writes are atomic
/// (temp file plus rename) so readers never observe a half-written note.
#[async_trait]
pub trait VaultIo: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, VaultIoError>;

    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<(), VaultIoError>;

    async fn delete(&self, path: &str) -> Result<(), VaultIoError>;

    /// List markdown files, optionally restricted to a directory prefix.
    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<String>, VaultIoError>;

    /// `None` when the path does not exist.
    async fn stat(&self, path: &str) -> Result<Option<FileStat>, VaultIoError>;
}

//! Vault access and synchronization.
//!
//! [`FsVault`] is the filesystem implementation of the `VaultIo` contract;
//! [`sync::VaultSync`] keeps `Vault -> ShadowCache -> Memory` consistent
//! under the rule that the vault is authoritative.

pub mod sync;

pub use sync::{FullSyncReport, SyncError, VaultSync};
pub use weaver_core::paths::{is_ignored, to_vault_path};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::trace;
use walkdir::WalkDir;

use weaver_core::{FileStat, VaultIo, VaultIoError};

/// Filesystem-backed vault.
///
/// All paths crossing this boundary are vault-relative with forward
/// slashes; anything that would escape the root is rejected up front.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn absolute(&self, rel: &str) -> Result<PathBuf, VaultIoError> {
        if rel.is_empty()
            || rel.starts_with('/')
            || rel.split('/').any(|seg| seg == "..")
        {
            return Err(VaultIoError::OutsideVault(rel.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl VaultIo for FsVault {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, VaultIoError> {
        let abs = self.absolute(path)?;
        match tokio::fs::read(&abs).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VaultIoError::NotFound(path.to_string()))
            }
            Err(e) => Err(VaultIoError::io(path, e)),
        }
    }

    /// Atomic write: temp file in the target directory, then rename, so a
    /// concurrent reader sees either the old bytes or the new, never a
    /// partial file.
    async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<(), VaultIoError> {
        let abs = self.absolute(path)?;
        if let Some(parent) = abs.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VaultIoError::io(path, e))?;
        }
        let file_name = abs
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| VaultIoError::OutsideVault(path.to_string()))?;
        let tmp = abs.with_file_name(format!(".{file_name}.weaver-tmp"));

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| VaultIoError::io(path, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &abs).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(VaultIoError::io(path, e));
        }
        trace!(path, bytes = bytes.len(), "vault write");
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), VaultIoError> {
        let abs = self.absolute(path)?;
        match tokio::fs::remove_file(&abs).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VaultIoError::NotFound(path.to_string()))
            }
            Err(e) => Err(VaultIoError::io(path, e)),
        }
    }

    async fn list_files(&self, prefix: Option<&str>) -> Result<Vec<String>, VaultIoError> {
        let root = self.root.clone();
        let start = match prefix {
            Some(p) => self.absolute(p.trim_end_matches('/'))?,
            None => root.clone(),
        };
        if !start.exists() {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        for entry in WalkDir::new(&start)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(&root) {
                paths.push(to_vault_path(rel));
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>, VaultIoError> {
        let abs = self.absolute(path)?;
        match tokio::fs::metadata(&abs).await {
            Ok(meta) => {
                let mtime = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Ok(Some(FileStat {
                    mtime,
                    size: meta.len(),
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(VaultIoError::io(path, e)),
        }
    }
}

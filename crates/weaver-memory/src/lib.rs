//! Namespaced key/value memory store with TTL.
//!
//! Holds cross-session context for rules and workflows: daily task
//! rollovers, meeting action items, the vault projection mirror. Entries
//! are keyed by `(namespace, key)`; writes are atomic per key. TTL eviction
//! is best-effort: expired entries vanish lazily on read and in a periodic
//! sweep.
//!
//! Backed by its own SQLite file so the memory store and the shadow cache
//! stay independently rebuildable.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, trace};

use weaver_core::glob::{glob_to_like, has_wildcards};
use weaver_core::MemoryEntry;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to open memory store: {0}")]
    Open(String),
    #[error("memory store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("memory value is not valid JSON: {0}")]
    Value(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

/// Handle to the memory store. Cheap to clone.
#[derive(Clone)]
pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MemoryError::Open(format!("creating {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| MemoryError::Open(format!("opening {}: {e}", path.display())))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| MemoryError::Open(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS entries (
                namespace  TEXT NOT NULL,
                key        TEXT NOT NULL,
                value      TEXT NOT NULL,
                ttl_ms     INTEGER NOT NULL DEFAULT 0,
                expires_at INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            CREATE INDEX IF NOT EXISTS idx_entries_expiry ON entries(expires_at)
                WHERE expires_at != 0;
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Upsert a value. Updates `updated_at` and restarts the TTL clock.
    pub async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: &serde_json::Value,
        ttl_ms: u64,
    ) -> Result<()> {
        let now = Utc::now();
        let expires_at = if ttl_ms == 0 {
            0
        } else {
            now.timestamp_millis() + ttl_ms as i64
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO entries (namespace, key, value, ttl_ms, expires_at, created_at, updated_at)\n             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)\n             ON CONFLICT(namespace, key) DO UPDATE SET\n                value = excluded.value, ttl_ms = excluded.ttl_ms,\n                expires_at = excluded.expires_at, updated_at = excluded.updated_at",
            params![
                namespace,
                key,
                serde_json::to_string(value)?,
                ttl_ms as i64,
                expires_at,
                now.to_rfc3339(),
            ],
        )?;
        trace!(namespace, key, ttl_ms, "memory put");
        Ok(())
    }

    /// Fetch a value; expired entries are evicted and read as `None`.
    pub async fn get(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn.lock();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT value, expires_at FROM entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((raw, expires_at)) = row else {
            return Ok(None);
        };
        if expires_at != 0 && expires_at <= Utc::now().timestamp_millis() {
            conn.execute(
                "DELETE FROM entries WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
            )?;
            trace!(namespace, key, "memory entry lazily evicted");
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM entries WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(removed > 0)
    }

    /// Enumerate a namespace, optionally filtering keys by a `*`/`?` glob.
    ///
    /// Entries may expire between enumeration and a follow-up `get`;
    /// callers tolerate nulls there. Already-expired entries are excluded.
    pub async fn list(&self, namespace: &str, pattern: Option<&str>) -> Result<Vec<MemoryEntry>> {
        let now_ms = Utc::now().timestamp_millis();
        let conn = self.conn.lock();
        let mut entries = Vec::new();

        let mut push_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<()> {
            let raw: String = row.get(2)?;
            let created: String = row.get(4)?;
            let updated: String = row.get(5)?;
            entries.push(MemoryEntry {
                namespace: row.get(0)?,
                key: row.get(1)?,
                value: serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null),
                ttl_ms: row.get::<_, i64>(3)? as u64,
                created_at: created.parse().unwrap_or_else(|_| Utc::now()),
                updated_at: updated.parse().unwrap_or_else(|_| Utc::now()),
            });
            Ok(())
        };

        match pattern {
            Some(p) if has_wildcards(p) => {
                let mut stmt = conn.prepare(
                    "SELECT namespace, key, value, ttl_ms, created_at, updated_at FROM entries\n                     WHERE namespace = ?1 AND key LIKE ?2 ESCAPE '\\'\n                       AND (expires_at = 0 OR expires_at > ?3)\n                     ORDER BY key",
                )?;
                let mut rows = stmt.query(params![namespace, glob_to_like(p), now_ms])?;
                while let Some(row) = rows.next()? {
                    push_row(row)?;
                }
            }
            Some(p) => {
                let mut stmt = conn.prepare(
                    "SELECT namespace, key, value, ttl_ms, created_at, updated_at FROM entries\n                     WHERE namespace = ?1 AND key = ?2\n                       AND (expires_at = 0 OR expires_at > ?3)",
                )?;
                let mut rows = stmt.query(params![namespace, p, now_ms])?;
                while let Some(row) = rows.next()? {
                    push_row(row)?;
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT namespace, key, value, ttl_ms, created_at, updated_at FROM entries\n                     WHERE namespace = ?1 AND (expires_at = 0 OR expires_at > ?2)\n                     ORDER BY key",
                )?;
                let mut rows = stmt.query(params![namespace, now_ms])?;
                while let Some(row) = rows.next()? {
                    push_row(row)?;
                }
            }
        }
        Ok(entries)
    }

    /// Remove every expired entry; returns how many were dropped.
    pub async fn sweep(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM entries WHERE expires_at != 0 AND expires_at <= ?1",
            params![Utc::now().timestamp_millis()],
        )?;
        if removed > 0 {
            debug!(removed, "memory sweep evicted entries");
        }
        Ok(removed as u64)
    }

    /// Total live entries, for the observability gauge.
    pub async fn len(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE expires_at = 0 OR expires_at > ?1",
            params![Utc::now().timestamp_millis()],
            |r| r.get(0),
        )?;
        Ok(count)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let store = store();
        store
            .put("vault/notes", "a.md", &json!({"tags": ["x"]}), 0)
            .await
            .unwrap();
        let value = store.get("vault/notes", "a.md").await.unwrap().unwrap();
        assert_eq!(value["tags"][0], "x");
    }

    #[tokio::test]
    async fn namespaces_are_isolated() {
        let store = store();
        store.put("ns1", "k", &json!(1), 0).await.unwrap();
        assert!(store.get("ns2", "k").await.unwrap().is_none());
        assert_eq!(store.list("ns1", None).await.unwrap().len(), 1);
        assert!(store.list("ns2", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_entries_read_as_none_and_are_evicted() {
        let store = store();
        store.put("ns", "fleeting", &json!(true), 1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert!(store.get("ns", "fleeting").await.unwrap().is_none());
        // The lazy eviction already removed the row.
        assert_eq!(store.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_reports_removed_count() {
        let store = store();
        store.put("ns", "a", &json!(1), 1).await.unwrap();
        store.put("ns", "b", &json!(2), 1).await.unwrap();
        store.put("ns", "keep", &json!(3), 0).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(store.sweep().await.unwrap(), 2);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn put_updates_in_place() {
        let store = store();
        store.put("ns", "k", &json!("first"), 0).await.unwrap();
        store.put("ns", "k", &json!("second"), 0).await.unwrap();

        let entries = store.list("ns", None).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, json!("second"));
        assert!(entries[0].updated_at >= entries[0].created_at);
    }

    #[tokio::test]
    async fn list_supports_key_globs() {
        let store = store();
        store.put("daily/tasks", "2024-03-14", &json!([]), 0).await.unwrap();
        store.put("daily/tasks", "2024-03-15", &json!([]), 0).await.unwrap();
        store.put("daily/tasks", "2023-12-31", &json!([]), 0).await.unwrap();

        let hits = store.list("daily/tasks", Some("2024-*")).await.unwrap();
        assert_eq!(hits.len(), 2);
        let hits = store.list("daily/tasks", Some("2024-03-1?")).await.unwrap();
        assert_eq!(hits.len(), 2);
    }
}

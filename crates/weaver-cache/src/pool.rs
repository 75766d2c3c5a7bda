//! Shared SQLite connection handling.
//!
//! rusqlite is synchronous; a single connection behind a `parking_lot`
//! mutex keeps the dependency surface small and serializes writers, which
//! is exactly the per-note atomicity the cache needs. Callers hold the lock
//! only for the duration of one closure.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::CacheError;

/// Configuration for opening the cache database.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: String,
}

impl SqliteConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".into(),
        }
    }
}

/// A cloneable handle to one SQLite connection.
#[derive(Clone)]
pub struct SqlitePool {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePool {
    pub fn open(config: SqliteConfig) -> Result<Self, CacheError> {
        if config.path != ":memory:" {
            if let Some(parent) = Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CacheError::Open(format!("creating {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(&config.path)
            .map_err(|e| CacheError::Open(format!("opening {}: {e}", config.path)))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\n             PRAGMA foreign_keys = ON;\n             PRAGMA synchronous = NORMAL;",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, CacheError> {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }

    pub fn with_connection_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T, CacheError> {
        let mut conn = self.conn.lock();
        Ok(f(&mut conn)?)
    }
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool").finish_non_exhaustive()
    }
}

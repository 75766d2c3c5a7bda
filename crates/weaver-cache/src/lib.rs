//! SQLite-backed shadow cache: a durable, queryable projection of vault
//! state.
//!
//! The cache owns the projection and nothing else. Notes arrive as
//! [`ParsedNote`]s from the parser; every index the cache maintains (tags,
//! outgoing links by target, directories, broken links) is updated in the
//! same transaction as the note row, so readers never observe a partially
//! indexed note.
//!
//! Wikilink resolution lives here rather than in the parser because it
//! depends on which notes exist: a broken link flips to resolved within the
//! same transaction that indexes its target, and back when the target goes
//! away.

mod pool;
mod schema;

pub use pool::{SqliteConfig, SqlitePool};
pub use schema::SCHEMA_VERSION;
pub use weaver_core::glob::{escape_like, glob_to_like, has_wildcards};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use weaver_core::{ErrorKind, Frontmatter, LinkKind, Note, NoteLink, ParsedNote};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to open cache: {0}")]
    Open(String),
    #[error("cache query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cache row corrupt: {0}")]
    Corrupt(String),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::CacheWriteError
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// Pagination for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}

/// Aggregate counters over the projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub note_count: u64,
    pub tag_count: u64,
    pub link_count: u64,
    pub broken_link_count: u64,
    /// Notes no other note links to.
    pub orphan_count: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Minimal per-note state for startup reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSummary {
    pub path: String,
    pub content_hash: String,
    pub modified_at: DateTime<Utc>,
}

/// The shadow cache handle. Cheap to clone; all clones share one
/// connection.
#[derive(Debug, Clone)]
pub struct ShadowCache {
    pool: SqlitePool,
    rebuilt: bool,
}

impl ShadowCache {
    /// Open (or create) the cache database and bring the schema current.
    ///
    /// A schema version mismatch drops the projection; the caller must then
    /// run a full sync to rebuild from vault ground truth (observable via
    /// [`ShadowCache::was_rebuilt`]).
    pub fn open(config: SqliteConfig) -> Result<Self> {
        let pool = SqlitePool::open(config)?;
        let rebuilt = pool.with_connection_mut(|conn| {
            schema::apply_migrations(conn)?;
            let stored: Option<String> = conn
                .query_row(
                    "SELECT value FROM meta WHERE key = 'schema_version'",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            let rebuilt = match stored.and_then(|v| v.parse::<i64>().ok()) {
                Some(v) if v == SCHEMA_VERSION => false,
                Some(v) => {
                    warn!(stored = v, current = SCHEMA_VERSION, "cache schema version mismatch, rebuilding");
                    schema::reset(conn)?;
                    true
                }
                None => false,
            };
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)\n                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![SCHEMA_VERSION.to_string()],
            )?;
            Ok(rebuilt)
        })?;
        if rebuilt {
            info!("shadow cache rebuilt, full sync required");
        }
        Ok(Self { pool, rebuilt })
    }

    /// Whether the last `open` dropped the projection due to a schema
    /// version change.
    pub fn was_rebuilt(&self) -> bool {
        self.rebuilt
    }

    /// Insert or update one note and all of its index entries atomically.
    pub async fn upsert_note(&self, parsed: &ParsedNote, mtime: DateTime<Utc>) -> Result<()> {
        self.pool.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            upsert_in_tx(&tx, parsed, mtime)?;
            tx.commit()
        })?;
        debug!(path = %parsed.path, "note upserted");
        Ok(())
    }

    /// Remove a note; returns whether it existed. Wikilinks that resolved
    /// to it are re-resolved (and typically become broken).
    pub async fn delete_note(&self, path: &str) -> Result<bool> {
        let existed = self.pool.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            let existed = tx.execute("DELETE FROM notes WHERE path = ?1", params![path])? > 0;
            if existed {
                reresolve_links_to(&tx, path)?;
            }
            tx.commit()?;
            Ok(existed)
        })?;
        debug!(path, existed, "note deleted");
        Ok(existed)
    }

    pub async fn get_note(&self, path: &str) -> Result<Option<Note>> {
        self.pool
            .with_connection(|conn| load_note(conn, path))?
            .transpose()
    }

    /// Notes carrying a tag; the pattern supports `*` and `?` globs.
    pub async fn list_by_tag(&self, pattern: &str, page: Page) -> Result<Vec<Note>> {
        let normalized = pattern.trim_start_matches('#').to_lowercase();
        let paths: Vec<String> = self.pool.with_connection(|conn| {
            let mut collect = |sql: &str, pat: &str| -> rusqlite::Result<Vec<String>> {
                let mut stmt = conn.prepare(sql)?;
                let rows = stmt.query_map(
                    params![pat, page.limit as i64, page.offset as i64],
                    |row| row.get(0),
                )?;
                rows.collect()
            };
            if has_wildcards(&normalized) {
                collect(
                    "SELECT DISTINCT note_path FROM tags WHERE tag LIKE ?1 ESCAPE '\\'\n                     ORDER BY note_path LIMIT ?2 OFFSET ?3",
                    &glob_to_like(&normalized),
                )
            } else {
                collect(
                    "SELECT note_path FROM tags WHERE tag = ?1\n                     ORDER BY note_path LIMIT ?2 OFFSET ?3",
                    &normalized,
                )
            }
        })?;
        self.load_notes(&paths)
    }

    /// Notes under a directory prefix (vault-relative, forward slashes).
    pub async fn list_by_directory(&self, prefix: &str, page: Page) -> Result<Vec<Note>> {
        let like = format!("{}%", escape_like(prefix.trim_start_matches('/')));
        let paths: Vec<String> = self.pool.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT path FROM notes WHERE path LIKE ?1 ESCAPE '\\'\n                 ORDER BY path LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt.query_map(
                params![like, page.limit as i64, page.offset as i64],
                |row| row.get(0),
            )?;
            rows.collect()
        })?;
        self.load_notes(&paths)
    }

    /// Links from other notes that resolve to `path`.
    pub async fn incoming_links(&self, path: &str) -> Result<Vec<NoteLink>> {
        self.pool.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT source_path, target, kind, display, resolved_path, broken\n                 FROM links WHERE resolved_path = ?1 ORDER BY source_path, position",
            )?;
            let rows = stmt.query_map(params![path], link_from_row)?;
            rows.collect()
        })
    }

    pub async fn outgoing_links(&self, path: &str) -> Result<Vec<NoteLink>> {
        self.pool.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT source_path, target, kind, display, resolved_path, broken\n                 FROM links WHERE source_path = ?1 ORDER BY position",
            )?;
            let rows = stmt.query_map(params![path], link_from_row)?;
            rows.collect()
        })
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.pool.with_connection(|conn| {
            let note_count: u64 =
                conn.query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))?;
            let tag_count: u64 =
                conn.query_row("SELECT COUNT(DISTINCT tag) FROM tags", [], |r| r.get(0))?;
            let link_count: u64 =
                conn.query_row("SELECT COUNT(*) FROM links", [], |r| r.get(0))?;
            let broken_link_count: u64 =
                conn.query_row("SELECT COUNT(*) FROM links WHERE broken = 1", [], |r| {
                    r.get(0)
                })?;
            let orphan_count: u64 = conn.query_row(
                "SELECT COUNT(*) FROM notes WHERE path NOT IN\n                 (SELECT resolved_path FROM links WHERE resolved_path IS NOT NULL)",
                [],
                |r| r.get(0),
            )?;
            let last_sync_at: Option<String> = conn
                .query_row("SELECT value FROM meta WHERE key = 'last_sync_at'", [], |r| {
                    r.get(0)
                })
                .optional()?;
            Ok(CacheStats {
                note_count,
                tag_count,
                link_count,
                broken_link_count,
                orphan_count,
                last_sync_at: last_sync_at.and_then(|s| s.parse().ok()),
            })
        })
    }

    /// Every note's `(path, title)`, for title-matching passes like
    /// auto-linking. Cheap relative to loading full notes.
    pub async fn note_titles(&self) -> Result<Vec<(String, String)>> {
        self.pool.with_connection(|conn| {
            let mut stmt = conn.prepare("SELECT path, title FROM notes ORDER BY path")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }

    /// Per-note state the watcher diffs against during its startup scan.
    pub async fn snapshot(&self) -> Result<Vec<NoteSummary>> {
        self.pool.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT path, content_hash, modified_at FROM notes ORDER BY path")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?
        .into_iter()
        .map(|(path, content_hash, modified_at)| {
            Ok(NoteSummary {
                path,
                content_hash,
                modified_at: parse_ts(&modified_at)?,
            })
        })
        .collect()
    }

    /// Reconcile the projection to vault ground truth.
    ///
    /// `notes` is the complete set of parsed vault notes with their mtimes.
    /// Anything in the cache but absent from `notes` is removed. Idempotent;
    /// records `last_sync_at` on success.
    pub async fn full_sync(&self, notes: &[(ParsedNote, DateTime<Utc>)]) -> Result<()> {
        self.pool.with_connection_mut(|conn| {
            let tx = conn.transaction()?;
            {
                let keep: Vec<&str> = notes.iter().map(|(n, _)| n.path.as_str()).collect();
                let mut stmt = tx.prepare("SELECT path FROM notes")?;
                let stale: Vec<String> = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .filter_map(|r| r.ok())
                    .filter(|p| !keep.contains(&p.as_str()))
                    .collect();
                drop(stmt);
                for path in stale {
                    tx.execute("DELETE FROM notes WHERE path = ?1", params![path])?;
                    reresolve_links_to(&tx, &path)?;
                }
                for (parsed, mtime) in notes {
                    upsert_in_tx(&tx, parsed, *mtime)?;
                }
                tx.execute(
                    "INSERT INTO meta (key, value) VALUES ('last_sync_at', ?1)\n                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![Utc::now().to_rfc3339()],
                )?;
            }
            tx.commit()
        })?;
        info!(notes = notes.len(), "full sync complete");
        Ok(())
    }

    pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self.pool.with_connection(|conn| {
            conn.query_row("SELECT value FROM meta WHERE key = 'last_sync_at'", [], |r| {
                r.get(0)
            })
            .optional()
        })?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }

    fn load_notes(&self, paths: &[String]) -> Result<Vec<Note>> {
        let mut notes = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(note) = self.pool.with_connection(|conn| load_note(conn, path))? {
                notes.push(note?);
            }
        }
        Ok(notes)
    }
}

/// Full upsert of one note inside an open transaction: note row, tag rows,
/// link rows with resolution, then re-resolution of broken links elsewhere
/// that may now point at this note.
fn upsert_in_tx(
    conn: &Connection,
    parsed: &ParsedNote,
    mtime: DateTime<Utc>,
) -> rusqlite::Result<()> {
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT content_hash, created_at FROM notes WHERE path = ?1",
            params![parsed.path],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let created_at = existing
        .as_ref()
        .map(|(_, c)| c.clone())
        .unwrap_or_else(|| mtime.to_rfc3339());

    if let Some((hash, _)) = &existing {
        if *hash == parsed.content_hash {
            // Touch only; identical bytes must not churn the indexes.
            conn.execute(
                "UPDATE notes SET modified_at = ?2 WHERE path = ?1",
                params![parsed.path, mtime.to_rfc3339()],
            )?;
            return Ok(());
        }
    }

    let directory = match parsed.path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    };
    conn.execute(
        "INSERT INTO notes (path, title, directory, basename_lower, frontmatter, body,\n                            content_hash, created_at, modified_at)\n         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)\n         ON CONFLICT(path) DO UPDATE SET\n            title = excluded.title, directory = excluded.directory,\n            basename_lower = excluded.basename_lower, frontmatter = excluded.frontmatter,\n            body = excluded.body, content_hash = excluded.content_hash,\n            modified_at = excluded.modified_at",
        params![
            parsed.path,
            parsed.title,
            directory,
            parsed.basename().to_lowercase(),
            parsed.frontmatter.to_yaml(),
            parsed.body,
            parsed.content_hash,
            created_at,
            mtime.to_rfc3339(),
        ],
    )?;

    conn.execute("DELETE FROM tags WHERE note_path = ?1", params![parsed.path])?;
    for tag in &parsed.tags {
        conn.execute(
            "INSERT OR IGNORE INTO tags (note_path, tag) VALUES (?1, ?2)",
            params![parsed.path, tag],
        )?;
    }

    conn.execute(
        "DELETE FROM links WHERE source_path = ?1",
        params![parsed.path],
    )?;
    for (position, link) in parsed.links.iter().enumerate() {
        let (resolved, broken) = if link.is_external() {
            (None, false)
        } else {
            let resolved = resolve_target(conn, &link.target)?;
            // Only wikilinks participate in broken-link tracking.
            let broken = link.kind == LinkKind::Wikilink && resolved.is_none();
            (resolved, broken)
        };
        let target_basename = (link.kind == LinkKind::Wikilink)
            .then(|| basename_key(&link.target));
        conn.execute(
            "INSERT INTO links (source_path, position, target, target_basename_lower,\n                                kind, display, resolved_path, broken)\n             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                parsed.path,
                position as i64,
                link.target,
                target_basename,
                kind_str(link.kind),
                link.display,
                resolved,
                broken as i64,
            ],
        )?;
    }

    // Broken wikilinks elsewhere may now have a target.
    let key = parsed.basename().to_lowercase();
    let candidates: Vec<(i64, String)> = {
        let mut stmt = conn.prepare(
            "SELECT id, target FROM links\n             WHERE broken = 1 AND target_basename_lower = ?1 AND source_path != ?2",
        )?;
        let rows = stmt.query_map(params![key, parsed.path], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    for (id, target) in candidates {
        if let Some(resolved) = resolve_target(conn, &target)? {
            conn.execute(
                "UPDATE links SET resolved_path = ?2, broken = 0 WHERE id = ?1",
                params![id, resolved],
            )?;
        }
    }
    Ok(())
}

/// Re-resolve links whose target note just went away.
fn reresolve_links_to(conn: &Connection, path: &str) -> rusqlite::Result<()> {
    let affected: Vec<(i64, String, String)> = {
        let mut stmt =
            conn.prepare("SELECT id, target, kind FROM links WHERE resolved_path = ?1")?;
        let rows = stmt.query_map(params![path], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    for (id, target, kind) in affected {
        let resolved = resolve_target(conn, &target)?;
        let broken = kind == "wikilink" && resolved.is_none();
        conn.execute(
            "UPDATE links SET resolved_path = ?2, broken = ?3 WHERE id = ?1",
            params![id, resolved, broken as i64],
        )?;
    }
    Ok(())
}

/// Resolve a link target to an existing note path.
///
/// Targets containing `/` are path references (`.md` implied); bare targets
/// resolve case-insensitively by basename, case-preserving on storage. Ties
/// break by lexicographic path for determinism.
fn resolve_target(conn: &Connection, target: &str) -> rusqlite::Result<Option<String>> {
    if target.contains('/') {
        let candidate = if target.ends_with(".md") {
            target.to_string()
        } else {
            format!("{target}.md")
        };
        let exact: Option<String> = conn
            .query_row(
                "SELECT path FROM notes WHERE path = ?1",
                params![candidate],
                |row| row.get(0),
            )
            .optional()?;
        if exact.is_some() {
            return Ok(exact);
        }
        conn.query_row(
            "SELECT path FROM notes WHERE lower(path) = lower(?1) ORDER BY path LIMIT 1",
            params![candidate],
            |row| row.get(0),
        )
        .optional()
    } else {
        conn.query_row(
            "SELECT path FROM notes WHERE basename_lower = ?1 ORDER BY path LIMIT 1",
            params![basename_key(target)],
            |row| row.get(0),
        )
        .optional()
    }
}

fn basename_key(target: &str) -> String {
    let name = target.rsplit('/').next().unwrap_or(target);
    name.strip_suffix(".md").unwrap_or(name).to_lowercase()
}

fn kind_str(kind: LinkKind) -> &'static str {
    match kind {
        LinkKind::Wikilink => "wikilink",
        LinkKind::Markdown => "markdown",
    }
}

fn link_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<NoteLink> {
    let kind: String = row.get(2)?;
    Ok(NoteLink {
        source_path: row.get(0)?,
        target: row.get(1)?,
        kind: if kind == "wikilink" {
            LinkKind::Wikilink
        } else {
            LinkKind::Markdown
        },
        display: row.get(3)?,
        resolved_path: row.get(4)?,
        broken: row.get::<_, i64>(5)? != 0,
    })
}

type LoadedNote = std::result::Result<Note, CacheError>;

fn load_note(conn: &Connection, path: &str) -> rusqlite::Result<Option<LoadedNote>> {
    let row = conn
        .query_row(
            "SELECT path, title, frontmatter, body, content_hash, created_at, modified_at\n             FROM notes WHERE path = ?1",
            params![path],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;
    let Some((path, title, fm_yaml, body, content_hash, created_at, modified_at)) = row else {
        return Ok(None);
    };

    let tags: std::collections::BTreeSet<String> = {
        let mut stmt = conn.prepare("SELECT tag FROM tags WHERE note_path = ?1")?;
        let rows = stmt.query_map(params![path], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    let links: Vec<NoteLink> = {
        let mut stmt = conn.prepare(
            "SELECT source_path, target, kind, display, resolved_path, broken\n             FROM links WHERE source_path = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![path], link_from_row)?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let note = (|| -> LoadedNote {
        Ok(Note {
            path: path.clone(),
            title,
            frontmatter: Frontmatter::from_yaml(&fm_yaml)
                .map_err(|e| CacheError::Corrupt(format!("frontmatter for {path}: {e}")))?,
            body,
            tags,
            links,
            content_hash,
            created_at: parse_ts(&created_at)?,
            modified_at: parse_ts(&modified_at)?,
        })
    })();
    Ok(Some(note))
}

fn parse_ts(raw: &str) -> std::result::Result<DateTime<Utc>, CacheError> {
    raw.parse()
        .map_err(|e| CacheError::Corrupt(format!("timestamp {raw}: {e}")))
}

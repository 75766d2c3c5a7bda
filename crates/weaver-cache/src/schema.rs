//! Cache schema and migrations.

use rusqlite::Connection;

/// Bumped whenever the table shape changes; a mismatch forces a rebuild
/// from vault ground truth rather than an in-place migration.
pub const SCHEMA_VERSION: i64 = 1;

pub fn apply_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notes (
            path           TEXT PRIMARY KEY,
            title          TEXT NOT NULL,
            directory      TEXT NOT NULL,
            basename_lower TEXT NOT NULL,
            frontmatter    TEXT NOT NULL,
            body           TEXT NOT NULL,
            content_hash   TEXT NOT NULL,
            created_at     TEXT NOT NULL,
            modified_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notes_directory ON notes(directory);
        CREATE INDEX IF NOT EXISTS idx_notes_basename  ON notes(basename_lower);

        CREATE TABLE IF NOT EXISTS tags (
            note_path TEXT NOT NULL REFERENCES notes(path) ON DELETE CASCADE,
            tag       TEXT NOT NULL,
            PRIMARY KEY (note_path, tag)
        );
        CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag);

        CREATE TABLE IF NOT EXISTS links (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            source_path           TEXT NOT NULL REFERENCES notes(path) ON DELETE CASCADE,
            position              INTEGER NOT NULL,
            target                TEXT NOT NULL,
            target_basename_lower TEXT,
            kind                  TEXT NOT NULL,
            display               TEXT,
            resolved_path         TEXT,
            broken                INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_links_source   ON links(source_path);
        CREATE INDEX IF NOT EXISTS idx_links_target   ON links(target_basename_lower);
        CREATE INDEX IF NOT EXISTS idx_links_resolved ON links(resolved_path);
        "#,
    )
}

/// Drop everything; used when the schema version changed under us.
pub fn reset(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS links;
        DROP TABLE IF EXISTS tags;
        DROP TABLE IF EXISTS notes;
        DROP TABLE IF EXISTS meta;
        "#,
    )?;
    apply_migrations(conn)
}

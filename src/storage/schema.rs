//! Schema bootstrap
//!
//! Creates the two tables:
//! - `sync_index`: one row per node of a scope (the Index Store)
//! - `sync_changes`: append-only change log, filled by triggers on `sync_index`
//!
//! `seq` is assigned by SQLite. The core never writes `sync_changes` itself.

use rusqlite::Connection;
use crate::error::Result;

pub fn install(conn: &Connection) -> Result<()> {
    create_index_table(conn)?;
    create_changes_table(conn)?;
    create_change_triggers(conn)?;
    Ok(())
}

fn create_index_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS sync_index (
            node_id INTEGER PRIMARY KEY AUTOINCREMENT,
            repository_identifier TEXT NOT NULL,
            node_path TEXT NOT NULL,
            bytesize INTEGER NOT NULL DEFAULT 0,
            mtime INTEGER NOT NULL DEFAULT 0,
            md5 TEXT NOT NULL,
            UNIQUE(repository_identifier, node_path)
        );

        CREATE INDEX IF NOT EXISTS sync_index_fingerprint
            ON sync_index(repository_identifier, md5);
    "#)?;
    tracing::debug!("[Schema] Created sync_index table");
    Ok(())
}

fn create_changes_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(r#"
        CREATE TABLE IF NOT EXISTS sync_changes (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            repository_identifier TEXT NOT NULL,
            node_id INTEGER NOT NULL,
            type TEXT NOT NULL CHECK (type IN ('path', 'content', 'create', 'delete')),
            source TEXT,
            target TEXT
        );

        CREATE INDEX IF NOT EXISTS sync_changes_scope_node
            ON sync_changes(repository_identifier, node_id, seq);
    "#)?;
    tracing::debug!("[Schema] Created sync_changes table");
    Ok(())
}

fn create_change_triggers(conn: &Connection) -> Result<()> {
    // Watermark updates on directories change neither path nor md5,
    // so they never reach the log.
    conn.execute_batch(r#"
        CREATE TRIGGER IF NOT EXISTS sync_log_create AFTER INSERT ON sync_index
        BEGIN
            INSERT INTO sync_changes (repository_identifier, node_id, type, source, target)
            VALUES (new.repository_identifier, new.node_id, 'create', NULL, new.node_path);
        END;

        CREATE TRIGGER IF NOT EXISTS sync_log_delete AFTER DELETE ON sync_index
        BEGIN
            INSERT INTO sync_changes (repository_identifier, node_id, type, source, target)
            VALUES (old.repository_identifier, old.node_id, 'delete', old.node_path, NULL);
        END;

        CREATE TRIGGER IF NOT EXISTS sync_log_path AFTER UPDATE OF node_path ON sync_index
        WHEN old.node_path <> new.node_path
        BEGIN
            INSERT INTO sync_changes (repository_identifier, node_id, type, source, target)
            VALUES (new.repository_identifier, new.node_id, 'path', old.node_path, new.node_path);
        END;

        CREATE TRIGGER IF NOT EXISTS sync_log_content AFTER UPDATE OF md5 ON sync_index
        WHEN old.node_path = new.node_path AND old.md5 <> new.md5
        BEGIN
            INSERT INTO sync_changes (repository_identifier, node_id, type, source, target)
            VALUES (new.repository_identifier, new.node_id, 'content', new.node_path, new.node_path);
        END;
    "#)?;
    tracing::debug!("[Schema] Created change log triggers");
    Ok(())
}

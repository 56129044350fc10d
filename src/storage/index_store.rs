//! Index Store operations
//!
//! Handles all reads and writes on the `sync_index` table. Every call is
//! scoped by a [`ScopeId`]; path prefix predicates work on whole segments.

use rusqlite::{params, Connection, OptionalExtension};
use crate::error::Result;
use crate::fs::DIRECTORY_FINGERPRINT;
use crate::paths;
use crate::scope::ScopeId;
use super::like_prefix;

/// One indexed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub node_id: i64,
    pub path: String,
    pub size: i64,
    pub mtime: i64,
    pub fingerprint: String,
}

impl IndexEntry {
    pub fn is_directory(&self) -> bool {
        self.fingerprint == DIRECTORY_FINGERPRINT
    }
}

/// Values written for a node on insert or content change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryValues {
    pub path: String,
    pub size: i64,
    pub mtime: i64,
    pub fingerprint: String,
}

pub struct IndexStore<'a> {
    conn: &'a mut Connection,
}

const SELECT_ENTRY: &str = "SELECT node_id, node_path, bytesize, mtime, md5 FROM sync_index";

fn entry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IndexEntry> {
    Ok(IndexEntry {
        node_id: row.get(0)?,
        path: row.get(1)?,
        size: row.get(2)?,
        mtime: row.get(3)?,
        fingerprint: row.get(4)?,
    })
}

impl<'a> IndexStore<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, scope: &ScopeId, path: &str) -> Result<Option<IndexEntry>> {
        let sql = format!("{} WHERE repository_identifier = ?1 AND node_path = ?2", SELECT_ENTRY);
        let entry = self.conn
            .query_row(&sql, params![scope.as_str(), path], entry_from_row)
            .optional()?;
        Ok(entry)
    }

    /// Insert a node, or overwrite its metadata when the path is already known.
    pub fn upsert(&self, scope: &ScopeId, values: &EntryValues) -> Result<i64> {
        let mut stmt = self.conn.prepare_cached(UPSERT_SQL)?;
        let node_id = stmt.query_row(
            params![scope.as_str(), values.path, values.size, values.mtime, values.fingerprint],
            |row| row.get(0),
        )?;
        tracing::debug!("[IndexStore] Indexed {} in {} (node_id: {})", values.path, scope, node_id);
        Ok(node_id)
    }

    /// Upsert many nodes in one transaction.
    pub fn upsert_batch(&mut self, scope: &ScopeId, batch: &[EntryValues]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for values in batch {
                stmt.query_row(
                    params![scope.as_str(), values.path, values.size, values.mtime, values.fingerprint],
                    |row| row.get::<_, i64>(0),
                )?;
            }
        }
        tx.commit()?;
        Ok(batch.len())
    }

    /// Overwrite size, mtime and fingerprint of a single row.
    pub fn update_content(&self, scope: &ScopeId, values: &EntryValues) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_index SET bytesize = ?1, mtime = ?2, md5 = ?3
             WHERE repository_identifier = ?4 AND node_path = ?5",
            params![values.size, values.mtime, values.fingerprint, scope.as_str(), values.path],
        )?;
        Ok(rows)
    }

    /// Advance a directory's watermark.
    pub fn touch_watermark(&self, scope: &ScopeId, path: &str, mtime: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE sync_index SET mtime = ?1 WHERE repository_identifier = ?2 AND node_path = ?3",
            params![mtime, scope.as_str(), path],
        )?;
        Ok(rows)
    }

    /// Delete a node and everything below it.
    pub fn delete_subtree(&self, scope: &ScopeId, path: &str) -> Result<usize> {
        delete_subtree_on(&*self.conn, scope, path)
    }

    /// Move a single row, replacing the row that held the destination.
    pub fn rename_entry(&mut self, scope: &ScopeId, old_path: &str, new_path: &str) -> Result<usize> {
        if old_path == new_path {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM sync_index WHERE repository_identifier = ?1 AND node_path = ?2",
            params![scope.as_str(), new_path],
        )?;
        let rows = tx.execute(
            "UPDATE sync_index SET node_path = ?1 WHERE repository_identifier = ?2 AND node_path = ?3",
            params![new_path, scope.as_str(), old_path],
        )?;
        tx.commit()?;
        Ok(rows)
    }

    /// Move a node and all its descendants from `old_base` to `new_base`.
    ///
    /// Rows already occupying the destination are dropped first: the move
    /// replaced them on disk.
    pub fn rebase_subtree(&mut self, scope: &ScopeId, old_base: &str, new_base: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        if !paths::is_within_or_self(old_base, new_base) {
            delete_subtree_on(&tx, scope, new_base)?;
        }

        let moved: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(
                r"SELECT node_id, node_path FROM sync_index
                  WHERE repository_identifier = ?1
                    AND (node_path = ?2 OR node_path LIKE ?3 ESCAPE '\')",
            )?;
            let rows = stmt.query_map(
                params![scope.as_str(), old_base, like_prefix(&paths::child_prefix(old_base))],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE sync_index SET node_path = ?1 WHERE node_id = ?2")?;
            for (node_id, path) in &moved {
                if let Some(rebased) = paths::rebase(path, old_base, new_base) {
                    updated += stmt.execute(params![rebased, node_id])?;
                }
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Every directory row of the scope with its watermark.
    pub fn directories(&self, scope: &ScopeId) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT node_path, mtime FROM sync_index
             WHERE repository_identifier = ?1 AND md5 = ?2
             ORDER BY node_path",
        )?;
        let rows = stmt.query_map(params![scope.as_str(), DIRECTORY_FINGERPRINT], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        let mut dirs = Vec::new();
        for r in rows { dirs.push(r?); }
        Ok(dirs)
    }

    /// Immediate children of a directory, one level only.
    pub fn children(&self, scope: &ScopeId, dir: &str) -> Result<Vec<IndexEntry>> {
        let prefix = like_prefix(&paths::child_prefix(dir));
        let nested = format!("{}/%", prefix);
        let sql = format!(
            r"{} WHERE repository_identifier = ?1
                AND node_path LIKE ?2 ESCAPE '\'
                AND node_path NOT LIKE ?3 ESCAPE '\'
                AND node_path <> '/'
              ORDER BY node_path",
            SELECT_ENTRY
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![scope.as_str(), prefix, nested], entry_from_row)?;
        let mut children = Vec::new();
        for r in rows { children.push(r?); }
        Ok(children)
    }

    /// Total bytes of every file row in the scope.
    pub fn space_usage(&self, scope: &ScopeId) -> Result<u64> {
        let total: Option<i64> = self.conn.query_row(
            "SELECT SUM(bytesize) FROM sync_index WHERE repository_identifier = ?1 AND md5 <> ?2",
            params![scope.as_str(), DIRECTORY_FINGERPRINT],
            |row| row.get(0),
        )?;
        Ok(total.unwrap_or(0).max(0) as u64)
    }

    pub fn count(&self, scope: &ScopeId) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sync_index WHERE repository_identifier = ?1",
            params![scope.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

const UPSERT_SQL: &str = "INSERT INTO sync_index (repository_identifier, node_path, bytesize, mtime, md5)
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT(repository_identifier, node_path) DO UPDATE SET
         bytesize = excluded.bytesize,
         mtime = excluded.mtime,
         md5 = excluded.md5
     RETURNING node_id";

fn delete_subtree_on(conn: &Connection, scope: &ScopeId, path: &str) -> Result<usize> {
    let rows = if path == "/" {
        conn.execute("DELETE FROM sync_index WHERE repository_identifier = ?1", params![scope.as_str()])?
    } else {
        conn.execute(
            r"DELETE FROM sync_index
              WHERE repository_identifier = ?1
                AND (node_path = ?2 OR node_path LIKE ?3 ESCAPE '\')",
            params![scope.as_str(), path, like_prefix(&paths::child_prefix(path))],
        )?
    };
    tracing::debug!("[IndexStore] Deleted {} rows under {} in {}", rows, path, scope);
    Ok(rows)
}

//! Change Log reads
//!
//! Rows are streamed to a callback in node-major, sequence-minor order,
//! each joined with the node's current index row.

use rusqlite::{params, Connection};
use crate::error::Result;
use crate::feed::{ChangeRecord, NodeSnapshot};
use crate::scope::ScopeId;
use super::like_prefix;

pub struct ChangeLog<'a> {
    conn: &'a Connection,
}

impl<'a> ChangeLog<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Visit every change of `scope` with `seq > since`.
    ///
    /// With `prefix`, only rows whose source or target lies below it are
    /// visited.
    pub fn scan_since<F>(&self, scope: &ScopeId, since: i64, prefix: Option<&str>, mut callback: F) -> Result<()>
    where F: FnMut(ChangeRecord) -> Result<()>
    {
        let mut stmt = self.conn.prepare(
            r"SELECT c.seq, c.repository_identifier, c.node_id, c.type, c.source, c.target,
                     i.bytesize, i.md5, i.mtime, i.node_path, i.repository_identifier
              FROM sync_changes c
              LEFT JOIN sync_index i ON c.node_id = i.node_id
              WHERE c.repository_identifier = ?1
                AND c.seq > ?2
                AND (?3 IS NULL OR c.source LIKE ?3 ESCAPE '\' OR c.target LIKE ?3 ESCAPE '\')
              ORDER BY c.node_id ASC, c.seq ASC",
        )?;

        let pattern = prefix.map(like_prefix);
        let rows = stmt.query_map(params![scope.as_str(), since, pattern], |row| {
            Ok(ChangeRecord {
                seq: row.get(0)?,
                repository_identifier: row.get(1)?,
                node_id: row.get(2)?,
                change_type: row.get(3)?,
                source: row.get(4)?,
                target: row.get(5)?,
                node: NodeSnapshot {
                    bytesize: row.get(6)?,
                    md5: row.get(7)?,
                    mtime: row.get(8)?,
                    node_path: row.get(9)?,
                    repository_identifier: row.get(10)?,
                },
            })
        })?;

        for row in rows {
            callback(row?)?;
        }
        Ok(())
    }

    /// Highest sequence number of the whole log, across every scope.
    pub fn max_seq(&self) -> Result<Option<i64>> {
        let max = self.conn.query_row("SELECT MAX(seq) FROM sync_changes", [], |row| row.get(0))?;
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ChangeType;
    use crate::storage::schema;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::install(&conn).unwrap();
        conn.execute_batch(r"
            INSERT INTO sync_index (repository_identifier, node_path, md5, bytesize) VALUES ('repo', '/team/a.txt', 'h', 3);
            INSERT INTO sync_index (repository_identifier, node_path, md5) VALUES ('repo', '/other/b.txt', 'h');
            INSERT INTO sync_index (repository_identifier, node_path, md5) VALUES ('elsewhere', '/team/c.txt', 'h');
            UPDATE sync_index SET node_path = '/team/a2.txt' WHERE node_path = '/team/a.txt';
        ").unwrap();
        conn
    }

    fn collect(conn: &Connection, since: i64, prefix: Option<&str>) -> Vec<ChangeRecord> {
        let mut out = Vec::new();
        ChangeLog::new(conn).scan_since(&ScopeId::from("repo"), since, prefix, |r| { out.push(r); Ok(()) }).unwrap();
        out
    }

    #[test]
    fn test_scan_orders_by_node_then_seq() {
        let conn = seeded();
        let rows = collect(&conn, 0, None);
        let keys: Vec<(i64, i64)> = rows.iter().map(|r| (r.node_id, r.seq)).collect();
        assert_eq!(keys, vec![(1, 1), (1, 4), (2, 2)]);
        assert_eq!(rows[1].change_type, ChangeType::Path);
        assert_eq!(rows[0].node.node_path.as_deref(), Some("/team/a2.txt"));
        assert_eq!(rows[0].node.bytesize, Some(3));
    }

    #[test]
    fn test_scan_cursor_and_prefix() {
        let conn = seeded();
        assert_eq!(collect(&conn, 1, None).len(), 2);
        let team: Vec<i64> = collect(&conn, 0, Some("/team/")).iter().map(|r| r.seq).collect();
        assert_eq!(team, vec![1, 4]);
    }

    #[test]
    fn test_deleted_node_has_empty_snapshot() {
        let conn = seeded();
        conn.execute("DELETE FROM sync_index WHERE node_path = '/other/b.txt'", []).unwrap();
        let rows = collect(&conn, 4, None);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].change_type, ChangeType::Delete);
        assert_eq!(rows[0].node, NodeSnapshot::default());
    }

    #[test]
    fn test_max_seq_is_global() {
        let conn = seeded();
        assert_eq!(ChangeLog::new(&conn).max_seq().unwrap(), Some(4));

        let empty = Connection::open_in_memory().unwrap();
        schema::install(&empty).unwrap();
        assert_eq!(ChangeLog::new(&empty).max_seq().unwrap(), None);
    }
}

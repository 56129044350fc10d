//! Database connection management
//!
//! A [`Database`] is only a location. Every operation opens its own
//! connection through [`Database::connect`] and drops it when done, so no
//! connection is shared between requests or threads.

use std::path::{Path, PathBuf};
use std::time::Duration;
use rusqlite::Connection;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection, creating the database directory if needed.
    pub fn connect(&self) -> Result<Connection> {
        let db_dir = self.path.parent()
            .ok_or_else(|| SyncError::InvalidPath(format!("Invalid database path: {}", self.path.display())))?;

        if !db_dir.as_os_str().is_empty() {
            std::fs::create_dir_all(db_dir)?;
        }

        let conn = Connection::open(&self.path)?;

        // Enable WAL mode so feed readers never block the maintainer
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", WAL, |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case(WAL) {
            tracing::warn!("[Database] journal_mode is {} instead of WAL for {}", mode, self.path.display());
        }

        conn.pragma_update(None, "synchronous", NORMAL)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Ok(conn)
    }

    /// Create the index and change tables if they do not exist yet.
    pub fn install(&self) -> Result<()> {
        let conn = self.connect()?;
        super::schema::install(&conn)?;
        tracing::info!("[Database] Schema installed at: {}", self.path.display());
        Ok(())
    }
}

// SQL pragma constants
const WAL: &str = "WAL";
const NORMAL: &str = "NORMAL";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_connect_creates_directory_and_enables_wal() {
        let temp = TempDir::new().unwrap();
        let db = Database::new(temp.path().join("nested").join("index.db"));
        db.install().unwrap();

        let conn = db.connect().unwrap();
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0)).unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('sync_index', 'sync_changes')",
            [],
            |r| r.get(0),
        ).unwrap();
        assert_eq!(tables, 2);
    }
}

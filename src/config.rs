//! Configuration file handling.
//!
//! ```toml
//! database = "/var/lib/syncable/index.db"
//! observe_storage_changes = true
//! reconcile_interval_secs = 300
//! debounce_ms = 500
//!
//! [[repositories]]
//! id = "team"
//! root = "/srv/team"
//! security_scope = "group"
//! recycle_bin = ".trash"
//! ignore = [".git", "node_modules"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{Result, SyncError};
use crate::scope::{Repository, SecurityScope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// SQLite file holding the index and the change log.
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Reconcile a scope against disk before answering a feed request.
    #[serde(default = "default_true")]
    pub observe_storage_changes: bool,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    /// Quiet period the watcher waits for before flushing events.
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub id: String,
    pub root: PathBuf,
    #[serde(default)]
    pub security_scope: SecurityScope,
    #[serde(default)]
    pub recycle_bin: Option<String>,
    /// Path segment names never indexed.
    #[serde(default)]
    pub ignore: Vec<String>,
}

fn default_database() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("syncable")
        .join("index.db")
}

fn default_true() -> bool {
    true
}

fn default_reconcile_interval() -> u64 {
    300
}

fn default_debounce() -> u64 {
    500
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            observe_storage_changes: true,
            reconcile_interval_secs: default_reconcile_interval(),
            debounce_ms: default_debounce(),
            repositories: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("[Config] {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (i, repo) in self.repositories.iter().enumerate() {
            if repo.id.trim().is_empty() {
                return Err(SyncError::InvalidConfig(format!("repository #{} has an empty id", i + 1)));
            }
            if self.repositories[..i].iter().any(|r| r.id == repo.id) {
                return Err(SyncError::InvalidConfig(format!("repository id '{}' is declared twice", repo.id)));
            }
        }
        Ok(())
    }

    pub fn repository(&self, id: &str) -> Result<&RepositoryConfig> {
        self.repositories
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| SyncError::UnknownRepository(id.to_string()))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Watcher events carry absolute, resolved paths; roots must match them.
fn absolute_root(root: &Path) -> PathBuf {
    match fs::canonicalize(root) {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::warn!("[Config] Cannot resolve repository root {}: {}", root.display(), e);
            if root.is_absolute() {
                root.to_path_buf()
            } else {
                std::env::current_dir().map(|cwd| cwd.join(root)).unwrap_or_else(|_| root.to_path_buf())
            }
        }
    }
}

impl RepositoryConfig {
    pub fn to_repository(&self) -> Repository {
        let mut repository = Repository::new(self.id.clone(), absolute_root(&self.root))
            .with_security_scope(self.security_scope);
        if let Some(bin) = &self.recycle_bin {
            repository = repository.with_recycle_bin(bin.clone());
        }
        repository
    }
}

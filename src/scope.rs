//! Repositories, users, scope identifiers and nodes.
//!
//! Every index row and change row is partitioned by a [`ScopeId`]. The id
//! is derived on each access from the repository and, for per-user or
//! per-group repositories, from the user the node belongs to.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::paths;

/// How a repository partitions its index between users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityScope {
    /// One index shared by every user.
    #[default]
    Shared,
    /// One index per user id.
    User,
    /// One index per group path.
    Group,
}

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: String,
    pub root: PathBuf,
    pub security_scope: SecurityScope,
    /// Recycle bin folder name, relative to the root (e.g. `.trash`).
    pub recycle_bin: Option<String>,
}

impl Repository {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            security_scope: SecurityScope::Shared,
            recycle_bin: None,
        }
    }

    pub fn with_security_scope(mut self, scope: SecurityScope) -> Self {
        self.security_scope = scope;
        self
    }

    pub fn with_recycle_bin(mut self, recycle_bin: impl Into<String>) -> Self {
        self.recycle_bin = Some(recycle_bin.into());
        self
    }

    /// Absolute location of a logical path inside this repository.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let normalized = paths::normalize(path);
        let mut url = self.root.clone();
        for segment in normalized.split('/').filter(|s| !s.is_empty()) {
            url.push(segment);
        }
        url
    }

    /// Logical path of an absolute location, if it lies under the root.
    pub fn logical_path(&self, abs: &Path) -> Option<String> {
        let relative = abs.strip_prefix(&self.root).ok()?;
        let joined: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(paths::normalize(&joined.join("/")))
    }

    /// Slash-rooted logical path of the recycle bin.
    pub fn recycle_path(&self) -> Option<String> {
        self.recycle_bin
            .as_deref()
            .map(|bin| bin.trim_matches('/'))
            .filter(|bin| !bin.is_empty())
            .map(paths::normalize)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub group_path: String,
}

impl User {
    pub fn new(id: impl Into<String>, group_path: impl Into<String>) -> Self {
        Self { id: id.into(), group_path: group_path.into() }
    }
}

/// Tenancy key of the index and change tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn compute(repository: &Repository, user: Option<&User>) -> Self {
        let mut parts = vec![repository.id.clone()];
        match (repository.security_scope, user) {
            (SecurityScope::Shared, _) => {}
            (SecurityScope::User, Some(user)) => parts.push(user.id.clone()),
            (SecurityScope::Group, Some(user)) => parts.push(user.group_path.clone()),
            (scope, None) => {
                tracing::warn!(
                    "[Scope] Repository {} is {:?}-scoped but no user was given",
                    repository.id, scope
                );
            }
        }
        Self(parts.join("-"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ScopeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file or directory as seen by the lifecycle notifications.
#[derive(Debug, Clone)]
pub struct Node {
    repository: Arc<Repository>,
    user: Option<Arc<User>>,
    path: String,
}

impl Node {
    pub fn new(repository: Arc<Repository>, user: Option<Arc<User>>, path: &str) -> Self {
        Self { repository, user, path: paths::normalize(path) }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    pub fn user(&self) -> Option<&Arc<User>> {
        self.user.as_ref()
    }

    pub fn url(&self) -> PathBuf {
        self.repository.resolve(&self.path)
    }

    pub fn scope(&self) -> ScopeId {
        ScopeId::compute(&self.repository, self.user.as_deref())
    }

    /// Sibling node sharing this node's repository and user.
    pub fn at(&self, path: &str) -> Node {
        Node::new(Arc::clone(&self.repository), self.user.clone(), path)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.repository.id == other.repository.id && self.user == other.user
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_id_by_security_scope() {
        let user = User::new("alice", "/team");
        let shared = Repository::new("docs", "/srv/docs");
        let per_user = Repository::new("home", "/srv/home").with_security_scope(SecurityScope::User);
        let per_group = Repository::new("team", "/srv/team").with_security_scope(SecurityScope::Group);

        assert_eq!(ScopeId::compute(&shared, Some(&user)).as_str(), "docs");
        assert_eq!(ScopeId::compute(&per_user, Some(&user)).as_str(), "home-alice");
        assert_eq!(ScopeId::compute(&per_group, Some(&user)).as_str(), "team-/team");
        assert_eq!(ScopeId::compute(&per_user, None).as_str(), "home");
    }

    #[test]
    fn test_resolve_and_logical_path() {
        let repo = Repository::new("docs", "/srv/docs");
        assert_eq!(repo.resolve("/a/b.txt"), PathBuf::from("/srv/docs/a/b.txt"));
        assert_eq!(repo.resolve("/"), PathBuf::from("/srv/docs"));
        assert_eq!(repo.logical_path(Path::new("/srv/docs/a/b.txt")).as_deref(), Some("/a/b.txt"));
        assert_eq!(repo.logical_path(Path::new("/srv/docs")).as_deref(), Some("/"));
        assert_eq!(repo.logical_path(Path::new("/srv/other")), None);
    }

    #[test]
    fn test_recycle_path() {
        assert_eq!(Repository::new("r", "/x").with_recycle_bin(".trash").recycle_path().as_deref(), Some("/.trash"));
        assert_eq!(Repository::new("r", "/x").with_recycle_bin("/").recycle_path(), None);
        assert_eq!(Repository::new("r", "/x").recycle_path(), None);
    }
}

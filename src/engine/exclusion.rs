//! Which nodes are kept out of the index.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use crate::scope::Node;
use crate::paths;

/// Per-repository ignore file, one name per line, `#` for comments.
pub const IGNORE_FILE: &str = ".syncignore";

pub trait ExclusionPolicy: Send + Sync {
    fn is_excluded(&self, node: &Node) -> bool;
}

/// Index everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExcludeNothing;

impl ExclusionPolicy for ExcludeNothing {
    fn is_excluded(&self, _node: &Node) -> bool {
        false
    }
}

/// Excludes any node with a path segment equal to one of the names.
/// The repository's recycle bin is never excluded.
#[derive(Debug, Default, Clone)]
pub struct IgnoredNames {
    names: HashSet<String>,
}

impl IgnoredNames {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = names
            .into_iter()
            .map(|name| {
                let name: String = name.into();
                name.trim().to_string()
            })
            .filter(|n| !n.is_empty() && !n.starts_with('#'))
            .collect();
        Self { names }
    }

    /// Configured names plus those listed in the root's ignore file.
    pub fn load<I, S>(root: &Path, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rules = Self::new(names);
        if let Ok(content) = fs::read_to_string(root.join(IGNORE_FILE)) {
            rules.names.extend(Self::new(content.lines()).names);
        }
        rules
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        path.split('/').any(|segment| self.names.contains(segment))
    }
}

impl ExclusionPolicy for IgnoredNames {
    fn is_excluded(&self, node: &Node) -> bool {
        if let Some(bin) = node.repository().recycle_path() {
            if paths::is_within_or_self(node.path(), &bin) {
                return false;
            }
        }
        self.matches(node.path())
    }
}

/// Ignore rules keyed by repository id.
#[derive(Debug, Default, Clone)]
pub struct ExclusionTable {
    rules: HashMap<String, IgnoredNames>,
}

impl ExclusionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, repository_id: impl Into<String>, rules: IgnoredNames) {
        self.rules.insert(repository_id.into(), rules);
    }

    pub fn get(&self, repository_id: &str) -> Option<&IgnoredNames> {
        self.rules.get(repository_id)
    }
}

impl ExclusionPolicy for ExclusionTable {
    fn is_excluded(&self, node: &Node) -> bool {
        self.rules
            .get(&node.repository().id)
            .map_or(false, |rules| rules.is_excluded(node))
    }
}

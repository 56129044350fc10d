//! Restricting a feed to one folder and rebasing paths onto it.

use crate::paths;
use super::record::{ChangeRecord, ChangeType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    root: String,
}

impl PathFilter {
    /// `None` when the path normalizes to the repository root, which
    /// filters nothing.
    pub fn new(path: &str) -> Option<Self> {
        let root = paths::normalize(path);
        if root == "/" {
            return None;
        }
        Some(Self { root })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Prefix shared by every path the filter lets through.
    pub fn prefix(&self) -> String {
        paths::child_prefix(&self.root)
    }

    /// Drop a record unrelated to the filter, or rewrite it as seen from
    /// inside the filter root: moves across the boundary become creates or
    /// deletes, and every remaining path is made relative to the root.
    pub fn apply(&self, record: ChangeRecord) -> Option<ChangeRecord> {
        let inside = |p: &Option<String>| p.as_deref().map_or(false, |p| paths::is_within(p, &self.root));
        let source_in = inside(&record.source);
        let target_in = inside(&record.target);
        if !source_in && !target_in {
            return None;
        }

        let mut change_type = record.change_type;
        if change_type == ChangeType::Path {
            if !source_in {
                change_type = ChangeType::Create;
            } else if !target_in {
                change_type = ChangeType::Delete;
            }
        }

        let strip = |p: Option<String>| p.and_then(|p| paths::strip_base(&p, &self.root).map(String::from));
        let mut node = record.node;
        node.node_path = strip(node.node_path);

        Some(ChangeRecord {
            change_type,
            source: strip(record.source),
            target: strip(record.target),
            node,
            ..record
        })
    }
}

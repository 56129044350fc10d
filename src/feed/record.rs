//! Change records as sent to clients.

use std::fmt;
use std::str::FromStr;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::paths;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Path,
    Content,
    Create,
    Delete,
}

impl ChangeType {
    /// Rank used when several events of one node are flattened.
    pub fn priority(self) -> u8 {
        match self {
            ChangeType::Path => 0,
            ChangeType::Content => 1,
            ChangeType::Create => 2,
            ChangeType::Delete => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Path => "path",
            ChangeType::Content => "content",
            ChangeType::Create => "create",
            ChangeType::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown change type: {0}")]
pub struct UnknownChangeType(String);

impl FromStr for ChangeType {
    type Err = UnknownChangeType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "path" => Ok(ChangeType::Path),
            "content" => Ok(ChangeType::Content),
            "create" => Ok(ChangeType::Create),
            "delete" => Ok(ChangeType::Delete),
            other => Err(UnknownChangeType(other.to_string())),
        }
    }
}

impl FromSql for ChangeType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Current state of the node a change refers to. Every field is `None`
/// once the node has left the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub bytesize: Option<i64>,
    pub md5: Option<String>,
    pub mtime: Option<i64>,
    pub node_path: Option<String>,
    pub repository_identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub seq: i64,
    pub repository_identifier: String,
    pub node_id: i64,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub source: Option<String>,
    pub target: Option<String>,
    pub node: NodeSnapshot,
}

impl ChangeRecord {
    /// Hide moves through the recycle bin: leaving the bin is a creation,
    /// entering it is a deletion.
    pub fn reclassify_recycled(self, recycle_path: &str) -> Self {
        if self.change_type != ChangeType::Path {
            return self;
        }
        let in_bin = |p: &Option<String>| p.as_deref().map_or(false, |p| paths::is_within_or_self(p, recycle_path));
        if in_bin(&self.source) {
            Self { change_type: ChangeType::Create, source: None, ..self }
        } else if in_bin(&self.target) {
            Self { change_type: ChangeType::Delete, target: None, ..self }
        } else {
            self
        }
    }

    /// Fold a later event of the same node into this one.
    pub fn merge(self, later: ChangeRecord) -> Self {
        let change_type = if later.change_type.priority() > self.change_type.priority() {
            later.change_type
        } else {
            self.change_type
        };
        Self { seq: later.seq, target: later.target, change_type, ..self }
    }

    /// A flattened record whose net effect is nothing: the node came back
    /// to where it started without a content change.
    pub fn is_noop(&self) -> bool {
        self.source == self.target && self.change_type != ChangeType::Content
    }
}

//! syncable: change tracking for synchronized file storage
//!
//! Three cooperating parts share one SQLite database:
//! - Index Maintainer (applies node lifecycle events to the index)
//! - Storage Reconciler (finds changes made directly on disk)
//! - Change Feed (serves everything since a client's cursor)
//!
//! The change log itself is written by the database, from triggers on the
//! index table.

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod fs;
pub mod librarian;
pub mod paths;
pub mod scope;
pub mod service;
pub mod storage;

pub use config::{RepositoryConfig, SyncConfig};
pub use engine::{IndexMaintainer, NodeChange, NodeChangeObserver, ReconcileReport, StorageReconciler};
pub use error::{Result, SyncError};
pub use feed::{ChangeFeed, ChangeRecord, ChangeType, FeedOptions, FeedParams, FeedQuery, NodeSnapshot};
pub use scope::{Node, Repository, ScopeId, SecurityScope, User};
pub use service::SyncService;
pub use storage::Database;

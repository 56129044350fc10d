//! The Index Maintainer
//!
//! Applies node lifecycle events to the index. It is the only writer of
//! `sync_index`; the change log follows from its writes.

use std::sync::Arc;
use walkdir::WalkDir;
use crate::error::Result;
use crate::fs::{FileStat, FileSystem, DIRECTORY_FINGERPRINT};
use crate::scope::Node;
use crate::storage::{Database, EntryValues, IndexStore};
use super::exclusion::{ExcludeNothing, ExclusionPolicy};
use super::observer::{NodeChange, NodeChangeObserver};

pub struct IndexMaintainer {
    db: Database,
    fs: Arc<dyn FileSystem>,
    exclusion: Arc<dyn ExclusionPolicy>,
}

fn describe(node: Option<&Node>) -> &str {
    node.map_or("-", Node::path)
}

impl IndexMaintainer {
    pub fn new(db: Database, fs: Arc<dyn FileSystem>) -> Self {
        Self { db, fs, exclusion: Arc::new(ExcludeNothing) }
    }

    pub fn with_exclusion(mut self, exclusion: Arc<dyn ExclusionPolicy>) -> Self {
        self.exclusion = exclusion;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Apply one lifecycle event. Failures are logged and swallowed so a
    /// broken index never fails the filesystem operation that triggered it.
    pub fn update_index(&self, old: Option<&Node>, new: Option<&Node>, is_copy: bool) {
        if let Err(e) = self.try_update_index(old, new, is_copy) {
            tracing::error!(
                "[Maintainer] Failed to index {} -> {}: {}",
                describe(old), describe(new), e
            );
        }
    }

    pub fn try_update_index(&self, old: Option<&Node>, new: Option<&Node>, is_copy: bool) -> Result<()> {
        let new = match new {
            Some(node) if self.exclusion.is_excluded(node) => {
                if old.is_none() || is_copy {
                    tracing::debug!("[Maintainer] Ignoring excluded node {}", node.path());
                    return Ok(());
                }
                tracing::debug!("[Maintainer] Target {} is excluded, treating as deletion", node.path());
                None
            }
            other => other,
        };

        match (old, new) {
            (None, None) => Ok(()),
            (Some(old), None) => self.remove(old),
            (None, Some(new)) => self.create(new),
            (Some(_), Some(new)) if is_copy => self.create(new),
            (Some(old), Some(new)) if old.path() == new.path() => self.content_changed(new),
            (Some(old), Some(new)) => self.moved(old, new),
        }
    }

    pub fn index_node(&self, node: &Node) {
        self.update_index(None, Some(node), false);
    }

    pub fn clear_index_for_node(&self, node: &Node) {
        self.update_index(Some(node), None, false);
    }

    fn create(&self, node: &Node) -> Result<()> {
        let url = node.url();
        let stat = self.fs.stat(&url)?;
        let scope = node.scope();
        let mut conn = self.db.connect()?;
        let mut store = IndexStore::new(&mut conn);

        if !stat.is_dir {
            let values = self.file_values(node.path().to_string(), &url, stat)?;
            store.upsert(&scope, &values)?;
            tracing::debug!("[Maintainer] INSERT {}", node.path());
            return Ok(());
        }

        let batch = self.collect_subtree(node, stat);
        let count = store.upsert_batch(&scope, &batch)?;
        tracing::debug!("[Maintainer] INSERT {} ({} entries)", node.path(), count);
        Ok(())
    }

    fn remove(&self, node: &Node) -> Result<()> {
        let mut conn = self.db.connect()?;
        let store = IndexStore::new(&mut conn);
        let rows = store.delete_subtree(&node.scope(), node.path())?;
        tracing::debug!("[Maintainer] DELETE {} ({} entries)", node.path(), rows);
        Ok(())
    }

    fn content_changed(&self, node: &Node) -> Result<()> {
        let url = node.url();
        let stat = self.fs.stat(&url)?;
        if stat.is_dir {
            tracing::debug!("[Maintainer] Ignoring content change on directory {}", node.path());
            return Ok(());
        }

        let values = self.file_values(node.path().to_string(), &url, stat)?;
        let scope = node.scope();
        let mut conn = self.db.connect()?;
        let store = IndexStore::new(&mut conn);
        if store.update_content(&scope, &values)? == 0 {
            store.upsert(&scope, &values)?;
            tracing::debug!("[Maintainer] INSERT {} (content change on unknown node)", node.path());
        } else {
            tracing::debug!("[Maintainer] UPDATE CONTENT {} ({} bytes)", node.path(), values.size);
        }
        Ok(())
    }

    fn moved(&self, old: &Node, new: &Node) -> Result<()> {
        let scope = old.scope();
        let leaf = self.fs.stat(&new.url()).ok().map(|stat| !stat.is_dir);
        let mut conn = self.db.connect()?;
        let mut store = IndexStore::new(&mut conn);

        let moved = if leaf == Some(true) {
            tracing::debug!("[Maintainer] UPDATE LEAF PATH {} -> {}", old.path(), new.path());
            store.rename_entry(&scope, old.path(), new.path())?
        } else {
            tracing::debug!("[Maintainer] UPDATE FOLDER PATH {} -> {}", old.path(), new.path());
            store.rebase_subtree(&scope, old.path(), new.path())?
        };
        drop(store);
        drop(conn);

        if moved == 0 && leaf.is_some() {
            tracing::debug!("[Maintainer] {} was not indexed, indexing {} instead", old.path(), new.path());
            return self.create(new);
        }
        Ok(())
    }

    fn file_values(&self, path: String, url: &std::path::Path, stat: FileStat) -> Result<EntryValues> {
        let fingerprint = self.fs.fingerprint(url)?;
        Ok(EntryValues { path, size: stat.size as i64, mtime: stat.mtime, fingerprint })
    }

    /// Rows for a directory and everything below it. Unreadable entries are
    /// skipped with a warning.
    fn collect_subtree(&self, root: &Node, root_stat: FileStat) -> Vec<EntryValues> {
        let mut batch = vec![EntryValues {
            path: root.path().to_string(),
            size: root_stat.size as i64,
            mtime: root_stat.mtime,
            fingerprint: DIRECTORY_FINGERPRINT.to_string(),
        }];
        let repository = root.repository();

        let walker = WalkDir::new(root.url())
            .min_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                repository
                    .logical_path(entry.path())
                    .map_or(false, |path| !self.exclusion.is_excluded(&root.at(&path)))
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("[Maintainer] Skipping unreadable entry under {}: {}", root.path(), e);
                    continue;
                }
            };
            let Some(path) = repository.logical_path(entry.path()) else { continue };
            let values = self.fs.stat(entry.path()).and_then(|stat| {
                if stat.is_dir {
                    Ok(EntryValues { path, size: stat.size as i64, mtime: stat.mtime, fingerprint: DIRECTORY_FINGERPRINT.to_string() })
                } else {
                    let fingerprint = self.fs.fingerprint(entry.path())?;
                    Ok(EntryValues { path, size: stat.size as i64, mtime: stat.mtime, fingerprint })
                }
            });
            match values {
                Ok(values) => batch.push(values),
                Err(e) => tracing::warn!("[Maintainer] Skipping {}: {}", entry.path().display(), e),
            }
        }
        batch
    }
}

impl NodeChangeObserver for IndexMaintainer {
    fn on_node_change(&self, change: &NodeChange) {
        self.update_index(change.old.as_ref(), change.new.as_ref(), change.copy);
    }
}

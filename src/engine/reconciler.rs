//! The Storage Reconciler
//!
//! Detects changes made directly on disk, behind the application's back,
//! and replays them as synthetic lifecycle events. Directory rows carry a
//! watermark (their `mtime` at the last pass); only directories whose live
//! mtime moved past it are listed and diffed.

use std::collections::HashMap;
use std::sync::Arc;
use serde::Serialize;
use crate::error::Result;
use crate::fs::FileSystem;
use crate::paths;
use crate::scope::{Node, Repository, ScopeId, User};
use crate::storage::{Database, IndexEntry, IndexStore};
use super::exclusion::{ExcludeNothing, ExclusionPolicy};
use super::observer::{NodeChange, NodeChangeObserver};

/// What one pass found.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub directories: usize,
    pub candidates: usize,
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    pub errors: usize,
}

impl ReconcileReport {
    pub fn changes(&self) -> usize {
        self.created + self.modified + self.deleted
    }
}

/// A directory whose listing must be diffed.
struct Candidate {
    path: String,
    /// Live mtime, committed as the new watermark once diffed. The root has
    /// no row and keeps none.
    observed_mtime: Option<i64>,
    children: HashMap<String, IndexEntry>,
}

pub struct StorageReconciler {
    db: Database,
    fs: Arc<dyn FileSystem>,
    observer: Arc<dyn NodeChangeObserver>,
    exclusion: Arc<dyn ExclusionPolicy>,
}

impl StorageReconciler {
    pub fn new(db: Database, fs: Arc<dyn FileSystem>, observer: Arc<dyn NodeChangeObserver>) -> Self {
        Self { db, fs, observer, exclusion: Arc::new(ExcludeNothing) }
    }

    /// Items matching `exclusion` are never reported as new.
    pub fn with_exclusion(mut self, exclusion: Arc<dyn ExclusionPolicy>) -> Self {
        self.exclusion = exclusion;
        self
    }

    pub fn reconcile_scope(&self, repository: &Arc<Repository>, user: Option<&Arc<User>>) -> Result<ReconcileReport> {
        let root = Node::new(Arc::clone(repository), user.cloned(), "/");
        let scope = root.scope();
        let mut report = ReconcileReport::default();

        let (vanished, candidates) = self.collect(&root, &scope, &mut report)?;

        let mut removed: Vec<String> = Vec::new();
        for path in vanished {
            if is_removed(&removed, &path) {
                continue;
            }
            tracing::debug!("[Reconciler] Folder deleted directly on storage: {}", path);
            self.observer.on_node_change(&NodeChange::deleted(root.at(&path)));
            report.deleted += 1;
            removed.push(path);
        }

        let mut conn = self.db.connect()?;
        let store = IndexStore::new(&mut conn);
        for candidate in candidates {
            if is_removed(&removed, &candidate.path) {
                continue;
            }
            if let Err(e) = self.diff(&root, &candidate, &mut removed, &mut report) {
                tracing::warn!("[Reconciler] Could not diff {}: {}", candidate.path, e);
                report.errors += 1;
                continue;
            }
            if let Some(mtime) = candidate.observed_mtime {
                store.touch_watermark(&scope, &candidate.path, mtime)?;
            }
        }

        tracing::info!(
            "[Reconciler] {}: {} dirs, {} candidates, +{} ~{} -{} ({} errors)",
            scope, report.directories, report.candidates,
            report.created, report.modified, report.deleted, report.errors
        );
        Ok(report)
    }

    /// Read phase: find vanished and modified directories and snapshot the
    /// stored children of the latter. No observer runs while the
    /// connection is open.
    fn collect(&self, root: &Node, scope: &ScopeId, report: &mut ReconcileReport) -> Result<(Vec<String>, Vec<Candidate>)> {
        let mut conn = self.db.connect()?;
        let store = IndexStore::new(&mut conn);

        let mut directories: Vec<(String, Option<i64>)> = vec![("/".to_string(), None)];
        directories.extend(
            store.directories(scope)?
                .into_iter()
                .filter(|(path, _)| path != "/")
                .map(|(path, mtime)| (path, Some(mtime))),
        );
        report.directories = directories.len();

        let mut vanished = Vec::new();
        let mut candidates = Vec::new();
        for (path, watermark) in directories {
            let stat = match self.fs.stat(&root.repository().resolve(&path)) {
                Ok(stat) if stat.is_dir => stat,
                Ok(_) | Err(_) if path == "/" => {
                    tracing::warn!("[Reconciler] Repository root {} is not a readable directory", root.url().display());
                    report.errors += 1;
                    continue;
                }
                _ => {
                    vanished.push(path);
                    continue;
                }
            };

            let stale = watermark.map_or(true, |w| stat.mtime > w);
            if !stale {
                continue;
            }

            let children = store
                .children(scope, &path)?
                .into_iter()
                .map(|entry| (paths::file_name(&entry.path).to_string(), entry))
                .collect();
            candidates.push(Candidate {
                observed_mtime: watermark.map(|_| stat.mtime),
                path,
                children,
            });
        }
        report.candidates = candidates.len();
        Ok((vanished, candidates))
    }

    fn diff(&self, root: &Node, candidate: &Candidate, removed: &mut Vec<String>, report: &mut ReconcileReport) -> Result<()> {
        let repository = root.repository();
        let listing = self.fs.list(&repository.resolve(&candidate.path))?;

        for name in &listing {
            if name.starts_with('.') {
                continue;
            }
            let path = paths::join(&candidate.path, name);
            match candidate.children.get(name) {
                None if self.exclusion.is_excluded(&root.at(&path)) => {}
                None => {
                    tracing::debug!("[Reconciler] New item detected on storage: {}", path);
                    self.observer.on_node_change(&NodeChange::discovered(root.at(&path)));
                    report.created += 1;
                }
                Some(entry) => {
                    let stat = match self.fs.stat(&repository.resolve(&path)) {
                        Ok(stat) => stat,
                        Err(e) => {
                            tracing::debug!("[Reconciler] {} vanished while diffing: {}", path, e);
                            continue;
                        }
                    };
                    let already_removed = is_removed(removed, &path);
                    if already_removed || stat.is_dir != entry.is_directory() {
                        // Same name, different kind: replace the stale rows.
                        if !already_removed {
                            tracing::debug!("[Reconciler] Item replaced on storage: {}", path);
                            self.observer.on_node_change(&NodeChange::deleted(root.at(&path)));
                            report.deleted += 1;
                            removed.push(path.clone());
                        }
                        if !self.exclusion.is_excluded(&root.at(&path)) {
                            self.observer.on_node_change(&NodeChange::discovered(root.at(&path)));
                            report.created += 1;
                        }
                    } else if !stat.is_dir && stat.mtime > entry.mtime {
                        tracing::debug!("[Reconciler] Item modified directly on storage: {}", path);
                        self.observer.on_node_change(&NodeChange::modified(root.at(&path)));
                        report.modified += 1;
                    }
                }
            }
        }

        for (name, entry) in &candidate.children {
            if listing.iter().any(|n| n == name) || is_removed(removed, &entry.path) {
                continue;
            }
            tracing::debug!("[Reconciler] Item deleted directly on storage: {}", entry.path);
            self.observer.on_node_change(&NodeChange::deleted(root.at(&entry.path)));
            report.deleted += 1;
            removed.push(entry.path.clone());
        }
        Ok(())
    }
}

fn is_removed(removed: &[String], path: &str) -> bool {
    removed.iter().any(|r| paths::is_within_or_self(path, r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, SystemTime};
    use filetime::FileTime;
    use tempfile::TempDir;
    use crate::engine::{IndexMaintainer, ObserverSet, RecordingObserver};
    use crate::fs::LocalFs;

    struct Fixture {
        _root: TempDir,
        _db_dir: TempDir,
        repo: Arc<Repository>,
        db: Database,
        recorder: Arc<RecordingObserver>,
        reconciler: StorageReconciler,
    }

    impl Fixture {
        fn new() -> Self {
            let root = TempDir::new().unwrap();
            let db_dir = TempDir::new().unwrap();
            let db = Database::new(db_dir.path().join("index.db"));
            db.install().unwrap();
            let fs: Arc<dyn FileSystem> = Arc::new(LocalFs::new());

            let recorder = Arc::new(RecordingObserver::new());
            let observers = ObserverSet::new();
            observers.register(Arc::new(IndexMaintainer::new(db.clone(), fs.clone())));
            observers.register(recorder.clone());

            let reconciler = StorageReconciler::new(db.clone(), fs, Arc::new(observers));
            let repo = Arc::new(Repository::new("docs", root.path()));
            Self { _root: root, _db_dir: db_dir, repo, db, recorder, reconciler }
        }

        fn url(&self, path: &str) -> std::path::PathBuf {
            self.repo.resolve(path)
        }

        fn write(&self, path: &str, content: &str) {
            let url = self.url(path);
            fs::create_dir_all(url.parent().unwrap()).unwrap();
            fs::write(url, content).unwrap();
        }

        fn reconcile(&self) -> ReconcileReport {
            self.reconciler.reconcile_scope(&self.repo, None).unwrap()
        }

        fn indexed(&self, path: &str) -> Option<IndexEntry> {
            let mut conn = self.db.connect().unwrap();
            IndexStore::new(&mut conn).get(&ScopeId::from("docs"), path).unwrap()
        }
    }

    /// Push an mtime into the future so second-granularity watermarks see it.
    fn bump(path: &Path, secs: u64) {
        let t = FileTime::from_system_time(SystemTime::now() + Duration::from_secs(secs));
        filetime::set_file_mtime(path, t).unwrap();
    }

    #[test]
    fn test_first_pass_discovers_and_second_is_quiet() {
        let fx = Fixture::new();
        fx.write("/a.txt", "a");
        fx.write("/docs/b.txt", "b");
        fx.write("/docs/sub/c.txt", "c");
        fx.write("/.hidden", "h");

        let first = fx.reconcile();
        assert_eq!(first.created, 2);
        assert!(fx.indexed("/docs/sub/c.txt").is_some());
        assert!(fx.indexed("/.hidden").is_none());
        assert!(fx.recorder.take().iter().all(|c| c.new_item));

        let second = fx.reconcile();
        assert_eq!(second.changes(), 0);
        assert_eq!(second.candidates, 1);
        assert_eq!(second.directories, 3);
        assert!(fx.recorder.take().is_empty());
    }

    #[test]
    fn test_detects_create_modify_delete_in_candidate() {
        let fx = Fixture::new();
        fx.write("/docs/b.txt", "b");
        fx.write("/docs/gone.txt", "g");
        fx.reconcile();
        fx.recorder.take();

        fx.write("/docs/new.txt", "n");
        fx.write("/docs/b.txt", "bbb");
        bump(&fx.url("/docs/b.txt"), 100);
        fs::remove_file(fx.url("/docs/gone.txt")).unwrap();
        bump(&fx.url("/docs"), 100);

        let report = fx.reconcile();
        assert_eq!((report.created, report.modified, report.deleted), (1, 1, 1));
        assert!(fx.indexed("/docs/new.txt").is_some());
        assert!(fx.indexed("/docs/gone.txt").is_none());
        assert_eq!(fx.indexed("/docs/b.txt").unwrap().size, 3);

        assert_eq!(fx.reconcile().changes(), 0);
    }

    #[test]
    fn test_unchanged_watermark_skips_directory() {
        let fx = Fixture::new();
        fx.write("/docs/b.txt", "b");
        fx.reconcile();

        // Content edits do not move the parent's mtime: nothing to see.
        fx.write("/docs/b.txt", "changed");
        bump(&fx.url("/docs/b.txt"), 100);
        let report = fx.reconcile();
        assert_eq!(report.modified, 0);
    }

    #[test]
    fn test_vanished_folder_is_deleted_once() {
        let fx = Fixture::new();
        fx.write("/docs/sub/c.txt", "c");
        fx.write("/keep.txt", "k");
        fx.reconcile();
        fx.recorder.take();

        fs::remove_dir_all(fx.url("/docs")).unwrap();
        let report = fx.reconcile();
        assert_eq!(report.deleted, 1);
        assert!(fx.indexed("/docs").is_none());
        assert!(fx.indexed("/docs/sub/c.txt").is_none());
        assert!(fx.indexed("/keep.txt").is_some());

        let changes = fx.recorder.take();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old.as_ref().unwrap().path(), "/docs");

        assert_eq!(fx.reconcile().changes(), 0);
    }

    #[test]
    fn test_excluded_items_are_not_reported() {
        let mut fx = Fixture::new();
        fx.write("/a.txt", "a");
        fx.write("/tmp/scratch", "s");
        let observer: Arc<dyn NodeChangeObserver> = fx.recorder.clone();
        fx.reconciler = StorageReconciler::new(fx.db.clone(), Arc::new(LocalFs::new()), observer)
            .with_exclusion(Arc::new(crate::engine::IgnoredNames::new(vec!["tmp"])));

        assert_eq!(fx.reconcile().created, 1);
        assert_eq!(fx.recorder.take().len(), 1);
    }

    #[test]
    fn test_new_subfolder_is_indexed_whole() {
        let fx = Fixture::new();
        fx.write("/docs/b.txt", "b");
        fx.reconcile();

        fx.write("/docs/fresh/deep/x.txt", "x");
        bump(&fx.url("/docs"), 100);
        let report = fx.reconcile();
        assert_eq!(report.created, 1);
        assert!(fx.indexed("/docs/fresh").unwrap().is_directory());
        assert!(fx.indexed("/docs/fresh/deep/x.txt").is_some());
        assert_eq!(fx.reconcile().changes(), 0);
    }

    #[test]
    fn test_directory_replaced_by_file_converges() {
        let fx = Fixture::new();
        fx.write("/p/x/inner.txt", "i");
        fx.reconcile();
        fx.recorder.take();

        fs::remove_dir_all(fx.url("/p/x")).unwrap();
        fx.write("/p/x", "file");
        bump(&fx.url("/p"), 100);

        let report = fx.reconcile();
        assert_eq!((report.created, report.deleted), (1, 1));
        let entry = fx.indexed("/p/x").unwrap();
        assert!(!entry.is_directory());
        assert_eq!(entry.size, 4);
        assert!(fx.indexed("/p/x/inner.txt").is_none());
        assert_eq!(fx.reconcile().changes(), 0);
    }

    #[test]
    fn test_file_replaced_by_directory_converges() {
        let fx = Fixture::new();
        fx.write("/p/x", "file");
        fx.reconcile();
        fx.recorder.take();

        fs::remove_file(fx.url("/p/x")).unwrap();
        fx.write("/p/x/inner.txt", "i");
        bump(&fx.url("/p"), 100);

        let report = fx.reconcile();
        assert_eq!((report.created, report.deleted), (1, 1));
        assert!(fx.indexed("/p/x").unwrap().is_directory());
        assert!(fx.indexed("/p/x/inner.txt").is_some());

        let changes = fx.recorder.take();
        assert_eq!(changes.len(), 2);
        assert!(changes[0].new.is_none());
        assert!(changes[1].new_item);
        assert_eq!(fx.reconcile().changes(), 0);
    }
}

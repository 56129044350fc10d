// FILE: src/librarian.rs
use crate::engine::{ExclusionPolicy, IgnoredNames, NodeChange, NodeChangeObserver};
use crate::error::{Result, SyncError};
use crate::scope::{Node, Repository, User};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A repository root under watch, with the rules of what to drop.
#[derive(Clone)]
pub struct WatchRoot {
    pub repository: Arc<Repository>,
    pub user: Option<Arc<User>>,
    pub ignore: IgnoredNames,
}

impl WatchRoot {
    pub fn new(repository: Arc<Repository>, user: Option<Arc<User>>, ignore: IgnoredNames) -> Self {
        Self { repository, user, ignore }
    }

    /// Node for an absolute path, if it is under the root and not ignored.
    fn node(&self, abs_path: &Path) -> Option<Node> {
        let path = self.repository.logical_path(abs_path)?;
        if path == "/" {
            return None;
        }
        let node = Node::new(Arc::clone(&self.repository), self.user.clone(), &path);
        if self.ignore.is_excluded(&node) {
            return None;
        }
        Some(node)
    }
}

/// Watches repository roots and reports what changes on disk as it
/// happens, between reconciliation passes.
pub struct Librarian {
    roots: Vec<WatchRoot>,
    observer: Arc<dyn NodeChangeObserver>,
    debounce: Duration,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl Librarian {
    pub fn new(observer: Arc<dyn NodeChangeObserver>, debounce: Duration) -> Self {
        Self { roots: Vec::new(), observer, debounce, thread_handle: None }
    }

    pub fn add_root(&mut self, root: WatchRoot) {
        self.roots.push(root);
    }

    pub fn start(&mut self, cancel: CancellationToken) -> Result<()> {
        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())
            .map_err(|e| SyncError::Other(e.into()))?;
        for root in &self.roots {
            watcher
                .watch(&root.repository.root, RecursiveMode::Recursive)
                .map_err(|e| SyncError::Other(e.into()))?;
            tracing::info!("[Librarian] Watching {} ({})", root.repository.root.display(), root.repository.id);
        }

        let roots = self.roots.clone();
        let observer = Arc::clone(&self.observer);
        let debounce = self.debounce;
        self.thread_handle = Some(thread::spawn(move || {
            Self::watcher_loop(watcher, rx, roots, observer, debounce, cancel);
        }));
        Ok(())
    }

    /// Wait for the watcher thread to exit after cancellation.
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("[Librarian] Watcher thread panicked");
            }
        }
    }

    fn watcher_loop(
        _watcher: RecommendedWatcher,
        rx: mpsc::Receiver<notify::Result<Event>>,
        roots: Vec<WatchRoot>,
        observer: Arc<dyn NodeChangeObserver>,
        debounce: Duration,
        cancel: CancellationToken,
    ) {
        let mut pending: Vec<Event> = Vec::new();
        let mut last_activity = Instant::now();

        loop {
            if cancel.is_cancelled() {
                break;
            }
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(Ok(event)) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                        pending.push(event);
                        last_activity = Instant::now();
                    }
                }
                Ok(Err(e)) => tracing::warn!("[Librarian] Watch error: {}", e),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if !pending.is_empty() && last_activity.elapsed() >= debounce {
                        let events = std::mem::take(&mut pending);
                        for change in translate_batch(&events, &roots) {
                            observer.on_node_change(&change);
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    tracing::warn!("[Librarian] Event channel closed");
                    break;
                }
            }
        }
        tracing::info!("[Librarian] Stopped");
    }
}

fn root_for<'r>(roots: &'r [WatchRoot], abs_path: &Path) -> Option<&'r WatchRoot> {
    roots.iter().find(|r| abs_path.starts_with(&r.repository.root))
}

/// Translate a debounced batch, dropping data modifications of nodes the
/// same batch already creates.
pub fn translate_batch(events: &[Event], roots: &[WatchRoot]) -> Vec<NodeChange> {
    let mut changes: Vec<NodeChange> = Vec::new();
    for event in events {
        for change in translate(event, roots) {
            let redundant = change.old.is_some()
                && change.old == change.new
                && changes.iter().any(|c| c.old.is_none() && c.new == change.new);
            if !redundant {
                changes.push(change);
            }
        }
    }
    changes
}

/// Lifecycle changes carried by one notify event.
pub fn translate(event: &Event, roots: &[WatchRoot]) -> Vec<NodeChange> {
    let node_of = |p: &Path| root_for(roots, p).and_then(|root| root.node(p));
    let mut changes = Vec::new();

    match event.kind {
        EventKind::Create(_) => {
            changes.extend(event.paths.iter().filter_map(|p| node_of(p.as_path())).map(NodeChange::created));
        }
        EventKind::Remove(_) => {
            changes.extend(event.paths.iter().filter_map(|p| node_of(p.as_path())).map(NodeChange::deleted));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            match (node_of(event.paths[0].as_path()), node_of(event.paths[1].as_path())) {
                (Some(old), Some(new)) if Arc::ptr_eq(old.repository(), new.repository()) => {
                    changes.push(NodeChange::moved(old, new))
                }
                (Some(old), Some(new)) => {
                    changes.push(NodeChange::deleted(old));
                    changes.push(NodeChange::created(new));
                }
                (Some(old), None) => changes.push(NodeChange::deleted(old)),
                (None, Some(new)) => changes.push(NodeChange::created(new)),
                (None, None) => {}
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            changes.extend(event.paths.iter().filter_map(|p| node_of(p.as_path())).map(NodeChange::deleted));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            changes.extend(event.paths.iter().filter_map(|p| node_of(p.as_path())).map(NodeChange::created));
        }
        EventKind::Modify(ModifyKind::Name(_)) => {
            for path in &event.paths {
                if let Some(node) = node_of(path.as_path()) {
                    changes.push(if path.exists() { NodeChange::created(node) } else { NodeChange::deleted(node) });
                }
            }
        }
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            for path in event.paths.iter().filter(|p| p.is_file()) {
                if let Some(node) = node_of(path.as_path()) {
                    changes.push(NodeChange::modified(node));
                }
            }
        }
        _ => {}
    }

    for change in &changes {
        tracing::debug!(
            "[Librarian] {} -> {}",
            change.old.as_ref().map_or("-", |n| n.path()),
            change.new.as_ref().map_or("-", |n| n.path())
        );
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RecordingObserver;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::fs;
    use tempfile::TempDir;

    fn roots(temp: &TempDir) -> Vec<WatchRoot> {
        let repo = Arc::new(Repository::new("docs", temp.path()));
        vec![WatchRoot::new(repo, None, IgnoredNames::new(vec![".git"]))]
    }

    fn paths_of(changes: &[NodeChange]) -> Vec<(Option<String>, Option<String>)> {
        changes
            .iter()
            .map(|c| (c.old.as_ref().map(|n| n.path().to_string()), c.new.as_ref().map(|n| n.path().to_string())))
            .collect()
    }

    #[test]
    fn test_create_and_remove() {
        let temp = TempDir::new().unwrap();
        let roots = roots(&temp);

        let created = translate(&Event::new(EventKind::Create(CreateKind::File)).add_path(temp.path().join("a.txt")), &roots);
        assert_eq!(paths_of(&created), vec![(None, Some("/a.txt".to_string()))]);

        let removed = translate(&Event::new(EventKind::Remove(RemoveKind::Any)).add_path(temp.path().join("d").join("b.txt")), &roots);
        assert_eq!(paths_of(&removed), vec![(Some("/d/b.txt".to_string()), None)]);
    }

    #[test]
    fn test_rename_both() {
        let temp = TempDir::new().unwrap();
        let roots = roots(&temp);
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(temp.path().join("x.txt"))
            .add_path(temp.path().join("y.txt"));

        let changes = translate(&event, &roots);
        assert_eq!(paths_of(&changes), vec![(Some("/x.txt".to_string()), Some("/y.txt".to_string()))]);
        assert!(!changes[0].copy);
    }

    #[test]
    fn test_rename_into_ignored_is_deletion() {
        let temp = TempDir::new().unwrap();
        let roots = roots(&temp);
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(temp.path().join("x.txt"))
            .add_path(temp.path().join(".git").join("x.txt"));

        let changes = translate(&event, &roots);
        assert_eq!(paths_of(&changes), vec![(Some("/x.txt".to_string()), None)]);
    }

    #[test]
    fn test_outside_and_ignored_paths_are_dropped() {
        let temp = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let roots = roots(&temp);

        let event = Event::new(EventKind::Create(CreateKind::Any))
            .add_path(elsewhere.path().join("a.txt"))
            .add_path(temp.path().join(".git").join("HEAD"))
            .add_path(temp.path().to_path_buf());
        assert!(translate(&event, &roots).is_empty());
    }

    #[test]
    fn test_data_modify_only_for_files() {
        let temp = TempDir::new().unwrap();
        let roots = roots(&temp);
        fs::write(temp.path().join("a.txt"), "a").unwrap();
        fs::create_dir(temp.path().join("dir")).unwrap();

        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(temp.path().join("a.txt"))
            .add_path(temp.path().join("dir"));
        let changes = translate(&event, &roots);
        assert_eq!(paths_of(&changes), vec![(Some("/a.txt".to_string()), Some("/a.txt".to_string()))]);
    }

    #[test]
    fn test_batch_drops_modify_after_create() {
        let temp = TempDir::new().unwrap();
        let roots = roots(&temp);
        fs::write(temp.path().join("a.txt"), "a").unwrap();

        let events = vec![
            Event::new(EventKind::Create(CreateKind::File)).add_path(temp.path().join("a.txt")),
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any))).add_path(temp.path().join("a.txt")),
        ];
        let changes = translate_batch(&events, &roots);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].old.is_none());
    }

    #[test]
    fn test_start_and_cancel() {
        let temp = TempDir::new().unwrap();
        let recorder = Arc::new(RecordingObserver::new());
        let mut librarian = Librarian::new(recorder, Duration::from_millis(20));
        for root in roots(&temp) {
            librarian.add_root(root);
        }
        let cancel = CancellationToken::new();
        librarian.start(cancel.clone()).unwrap();
        cancel.cancel();
        librarian.join();
    }
}

//! Node lifecycle notifications.

use std::sync::{Arc, RwLock};
use crate::scope::Node;

/// One filesystem lifecycle event.
///
/// `old` absent means the node was created; `new` absent means it was
/// deleted; equal paths mean its content changed; different paths mean it
/// moved (or was copied, with `copy`).
#[derive(Debug, Clone)]
pub struct NodeChange {
    pub old: Option<Node>,
    pub new: Option<Node>,
    pub copy: bool,
    /// Set on creations discovered by a reconciliation pass.
    pub new_item: bool,
}

impl NodeChange {
    pub fn created(node: Node) -> Self {
        Self { old: None, new: Some(node), copy: false, new_item: false }
    }

    /// A creation found on disk rather than reported by the application.
    pub fn discovered(node: Node) -> Self {
        Self { new_item: true, ..Self::created(node) }
    }

    pub fn deleted(node: Node) -> Self {
        Self { old: Some(node), new: None, copy: false, new_item: false }
    }

    pub fn modified(node: Node) -> Self {
        Self { old: Some(node.clone()), new: Some(node), copy: false, new_item: false }
    }

    pub fn moved(old: Node, new: Node) -> Self {
        Self { old: Some(old), new: Some(new), copy: false, new_item: false }
    }

    pub fn copied(source: Node, copy: Node) -> Self {
        Self { old: Some(source), new: Some(copy), copy: true, new_item: false }
    }
}

pub trait NodeChangeObserver: Send + Sync {
    fn on_node_change(&self, change: &NodeChange);
}

/// Fan-out to every registered observer, in registration order.
#[derive(Default, Clone)]
pub struct ObserverSet {
    observers: Arc<RwLock<Vec<Arc<dyn NodeChangeObserver>>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn NodeChangeObserver>) {
        self.observers.write().unwrap_or_else(|e| e.into_inner()).push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NodeChangeObserver for ObserverSet {
    fn on_node_change(&self, change: &NodeChange) {
        let observers = self.observers.read().unwrap_or_else(|e| e.into_inner()).clone();
        for observer in observers {
            observer.on_node_change(change);
        }
    }
}

/// Observer that keeps every change it sees. Handy for inspecting what a
/// reconciliation pass or a watcher would report.
#[derive(Default)]
pub struct RecordingObserver {
    changes: std::sync::Mutex<Vec<NodeChange>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<NodeChange> {
        std::mem::take(&mut *self.changes.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl NodeChangeObserver for RecordingObserver {
    fn on_node_change(&self, change: &NodeChange) {
        self.changes.lock().unwrap_or_else(|e| e.into_inner()).push(change.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Repository;

    #[test]
    fn test_observer_set_fans_out() {
        let repo = Arc::new(Repository::new("docs", "/srv/docs"));
        let first = Arc::new(RecordingObserver::new());
        let second = Arc::new(RecordingObserver::new());
        let set = ObserverSet::new();
        set.register(first.clone());
        set.register(second.clone());
        assert_eq!(set.len(), 2);

        set.on_node_change(&NodeChange::discovered(Node::new(repo, None, "/a.txt")));

        let seen = first.take();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].new_item);
        assert!(seen[0].old.is_none());
        assert_eq!(second.take().len(), 1);
    }

    #[test]
    fn test_constructors() {
        let repo = Arc::new(Repository::new("docs", "/srv/docs"));
        let a = Node::new(repo.clone(), None, "/a");
        let b = Node::new(repo, None, "/b");

        let modified = NodeChange::modified(a.clone());
        assert_eq!(modified.old, modified.new);

        let copied = NodeChange::copied(a.clone(), b.clone());
        assert!(copied.copy);
        let moved = NodeChange::moved(a, b);
        assert!(!moved.copy);
        assert_ne!(moved.old, moved.new);
    }
}

//! The sync service: one object wiring the index, the reconciler and the
//! feed for a set of repositories.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use crate::config::SyncConfig;
use crate::engine::{
    ExclusionTable, IgnoredNames, IndexMaintainer, NodeChangeObserver, ObserverSet,
    ReconcileReport, StorageReconciler,
};
use crate::error::{Result, SyncError};
use crate::feed::{ChangeFeed, ChangesPage, FeedParams, FeedQuery};
use crate::fs::{FileSystem, LocalFs};
use crate::librarian::WatchRoot;
use crate::scope::{Node, Repository, ScopeId, User};
use crate::storage::{Database, IndexStore};

struct RepositoryEntry {
    repository: Arc<Repository>,
    ignore: IgnoredNames,
}

pub struct SyncService {
    db: Database,
    fs: Arc<dyn FileSystem>,
    maintainer: Arc<IndexMaintainer>,
    exclusions: Arc<ExclusionTable>,
    observers: ObserverSet,
    repositories: HashMap<String, RepositoryEntry>,
    observe_storage_changes: bool,
}

impl SyncService {
    pub fn new(db: Database, fs: Arc<dyn FileSystem>, repositories: Vec<(Repository, IgnoredNames)>) -> Self {
        let mut exclusions = ExclusionTable::new();
        let mut entries = HashMap::new();
        for (repository, ignore) in repositories {
            exclusions.insert(repository.id.clone(), ignore.clone());
            entries.insert(repository.id.clone(), RepositoryEntry { repository: Arc::new(repository), ignore });
        }

        let exclusions = Arc::new(exclusions);
        let maintainer = Arc::new(
            IndexMaintainer::new(db.clone(), Arc::clone(&fs)).with_exclusion(exclusions.clone()),
        );
        let observers = ObserverSet::new();
        observers.register(maintainer.clone());

        Self { db, fs, maintainer, exclusions, observers, repositories: entries, observe_storage_changes: true }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        let repositories = config
            .repositories
            .iter()
            .map(|rc| (rc.to_repository(), IgnoredNames::load(&rc.root, rc.ignore.iter().cloned())))
            .collect();
        Self::new(Database::new(&config.database), Arc::new(LocalFs::new()), repositories)
            .with_observe_storage_changes(config.observe_storage_changes)
    }

    pub fn with_observe_storage_changes(mut self, enabled: bool) -> Self {
        self.observe_storage_changes = enabled;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn install(&self) -> Result<()> {
        self.db.install()
    }

    pub fn repository(&self, id: &str) -> Result<Arc<Repository>> {
        self.repositories
            .get(id)
            .map(|entry| Arc::clone(&entry.repository))
            .ok_or_else(|| SyncError::UnknownRepository(id.to_string()))
    }

    pub fn repositories(&self) -> impl Iterator<Item = &Arc<Repository>> {
        self.repositories.values().map(|entry| &entry.repository)
    }

    /// Lifecycle hook to call on every filesystem operation the
    /// application performs.
    pub fn observer(&self) -> Arc<dyn NodeChangeObserver> {
        Arc::new(self.observers.clone())
    }

    /// Extra listener notified after the index is updated.
    pub fn register_observer(&self, observer: Arc<dyn NodeChangeObserver>) {
        self.observers.register(observer);
    }

    pub fn maintainer(&self) -> &Arc<IndexMaintainer> {
        &self.maintainer
    }

    pub fn index_node(&self, node: &Node) {
        self.maintainer.index_node(node);
    }

    pub fn reconcile(&self, repository: &Arc<Repository>, user: Option<&Arc<User>>) -> Result<ReconcileReport> {
        let reconciler = StorageReconciler::new(self.db.clone(), Arc::clone(&self.fs), self.observer())
            .with_exclusion(self.exclusions.clone());
        reconciler.reconcile_scope(repository, user)
    }

    fn prepare_query(&self, repository: &Arc<Repository>, user: Option<&Arc<User>>, params: FeedParams) -> FeedQuery {
        if self.observe_storage_changes {
            if let Err(e) = self.reconcile(repository, user) {
                tracing::warn!("[Feed] Reconciliation of {} failed, serving the log as is: {}", repository.id, e);
            }
        }
        let scope = ScopeId::compute(repository, user.map(|u| u.as_ref()));
        FeedQuery::new(scope, params).with_recycle_path(repository.recycle_path())
    }

    /// Answer a feed request in its wire format. Returns the checkpoint.
    pub fn changes<W: Write>(
        &self,
        repository: &Arc<Repository>,
        user: Option<&Arc<User>>,
        params: FeedParams,
        out: W,
    ) -> Result<i64> {
        let query = self.prepare_query(repository, user, params);
        let conn = self.db.connect()?;
        ChangeFeed::new(&conn).write_to(&query, out)
    }

    pub fn collect_changes(
        &self,
        repository: &Arc<Repository>,
        user: Option<&Arc<User>>,
        params: FeedParams,
    ) -> Result<ChangesPage> {
        let query = self.prepare_query(repository, user, params);
        let conn = self.db.connect()?;
        ChangeFeed::new(&conn).collect(&query)
    }

    /// Bytes used by the files of a scope, according to the index.
    pub fn space_usage(&self, repository: &Arc<Repository>, user: Option<&Arc<User>>) -> Result<u64> {
        let scope = ScopeId::compute(repository, user.map(|u| u.as_ref()));
        let mut conn = self.db.connect()?;
        IndexStore::new(&mut conn).space_usage(&scope)
    }

    /// Roots for the watcher, one per repository.
    pub fn watch_roots(&self, user: Option<&Arc<User>>) -> Vec<WatchRoot> {
        self.repositories
            .values()
            .map(|entry| WatchRoot::new(Arc::clone(&entry.repository), user.cloned(), entry.ignore.clone()))
            .collect()
    }
}

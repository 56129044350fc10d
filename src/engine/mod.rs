// FILE: src/engine/mod.rs
pub mod exclusion;
pub mod maintainer;
pub mod observer;
pub mod reconciler;

pub use exclusion::{ExcludeNothing, ExclusionPolicy, ExclusionTable, IgnoredNames, IGNORE_FILE};
pub use maintainer::IndexMaintainer;
pub use observer::{NodeChange, NodeChangeObserver, ObserverSet, RecordingObserver};
pub use reconciler::{ReconcileReport, StorageReconciler};

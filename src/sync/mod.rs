//! The watch-coalesce-dispatch engine.
//!
//! One coordinator task per watched directory consumes a stream of
//! filesystem events and decides when to dispatch a sync, enforcing
//! at-most-one-in-flight per directory and suppressing trigger storms during
//! the initial scan. Directories are fully independent; nothing here is a
//! global lock.

pub mod coordinator;
pub mod orchestrator;
pub mod watcher;

pub use coordinator::{coordinator_task, DirectorySyncStatus};
pub use orchestrator::{expand_config, spawn_apps, start, AppWatchSpecs};
pub use watcher::watch_directory_task;

use crate::config::WatchSpec;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One notification from a directory's filesystem watcher.
///
/// Only additions and content modifications exist here: deletions, renames
/// away, and metadata-only touches are dropped at the watcher, because this
/// engine never propagates deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    AddFile(PathBuf),
    AddDir(PathBuf),
    ModifyFile(PathBuf),
    /// One-shot signal: the startup enumeration for this watch root is done.
    ScanComplete,
}

impl WatchEvent {
    /// Whether this event can trigger a sync.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, WatchEvent::ScanComplete)
    }

    /// The affected path, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            WatchEvent::AddFile(path)
            | WatchEvent::AddDir(path)
            | WatchEvent::ModifyFile(path) => Some(path),
            WatchEvent::ScanComplete => None,
        }
    }
}

/// The executor seam the coordinator dispatches through.
///
/// The production implementation is [`crate::rsync::RsyncRunner`]; tests
/// drive the state machine with recording fakes. Implementations must not
/// return errors: a failed sync is logged inside the runner and the
/// directory simply becomes eligible again.
#[async_trait::async_trait]
pub trait SyncRunner: Send + Sync + 'static {
    async fn sync(&self, spec: &WatchSpec);
}

/// Shared mirror of each directory's `syncing` flag within one app.
///
/// Used only to decide whether a blank separator line should precede a burst
/// of logs. Best-effort and cosmetic; the correctness mechanism is each
/// coordinator's own [`DirectorySyncStatus`].
#[derive(Clone)]
pub struct ActiveSyncRegistry {
    flags: Arc<Vec<AtomicBool>>,
}

impl ActiveSyncRegistry {
    pub fn new(len: usize) -> Self {
        Self {
            flags: Arc::new((0..len).map(|_| AtomicBool::new(false)).collect()),
        }
    }

    /// Record whether the directory at `slot` has a sync in flight.
    pub fn set_syncing(&self, slot: usize, syncing: bool) {
        if let Some(flag) = self.flags.get(slot) {
            flag.store(syncing, Ordering::Relaxed);
        }
    }

    /// Whether any directory in the app currently has a sync in flight.
    pub fn any_syncing(&self) -> bool {
        self.flags.iter().any(|flag| flag.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actionable_kinds() {
        assert!(WatchEvent::AddFile(PathBuf::from("/a")).is_actionable());
        assert!(WatchEvent::AddDir(PathBuf::from("/a")).is_actionable());
        assert!(WatchEvent::ModifyFile(PathBuf::from("/a")).is_actionable());
        assert!(!WatchEvent::ScanComplete.is_actionable());
    }

    #[test]
    fn test_registry_tracks_flags() {
        let registry = ActiveSyncRegistry::new(2);
        assert!(!registry.any_syncing());

        registry.set_syncing(0, true);
        assert!(registry.any_syncing());

        registry.set_syncing(0, false);
        registry.set_syncing(1, true);
        assert!(registry.any_syncing());

        registry.set_syncing(1, false);
        assert!(!registry.any_syncing());
    }

    #[test]
    fn test_registry_out_of_range_slot_is_noop() {
        let registry = ActiveSyncRegistry::new(1);
        registry.set_syncing(5, true);
        assert!(!registry.any_syncing());
    }
}

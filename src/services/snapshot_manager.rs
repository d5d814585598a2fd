//! Per-iteration snapshots of the source tree for rollback.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Snapshot;
use crate::services::source_tree::SourceTree;

/// In-memory per-iteration copies of the source tree.
pub struct SnapshotManager {
    tree: Arc<SourceTree>,
    snapshots: BTreeMap<u32, Snapshot>,
}

impl SnapshotManager {
    /// Empty manager over `tree`.
    pub fn new(tree: Arc<SourceTree>) -> Self {
        Self {
            tree,
            snapshots: BTreeMap::new(),
        }
    }

    /// Capture the tree as it stands at the start of `iteration`.
    pub fn take(&mut self, iteration: u32) -> DomainResult<&Snapshot> {
        let snapshot = Snapshot::new(iteration, self.tree.capture()?);
        debug!(
            iteration,
            files = snapshot.file_count(),
            bytes = snapshot.total_bytes(),
            "Snapshot captured"
        );
        self.snapshots.insert(iteration, snapshot);
        self.get(iteration)
    }

    /// Snapshot taken at `iteration`.
    pub fn get(&self, iteration: u32) -> DomainResult<&Snapshot> {
        self.snapshots
            .get(&iteration)
            .ok_or(DomainError::SnapshotNotFound(iteration))
    }

    /// Restore the tree to the snapshot of `iteration`. Returns the paths that
    /// changed.
    pub fn restore(&self, iteration: u32) -> DomainResult<Vec<String>> {
        let snapshot = self.get(iteration)?;
        let current = Snapshot::new(iteration, self.tree.capture()?);
        let changed = snapshot.changed_paths(&current);
        self.tree.restore(&snapshot.files)?;
        info!(iteration, changed = changed.len(), "Source tree restored");
        Ok(changed)
    }

    /// Whether the tree still matches the snapshot of `iteration`.
    pub fn unchanged_since(&self, iteration: u32) -> DomainResult<bool> {
        let snapshot = self.get(iteration)?;
        Ok(self.tree.capture()? == snapshot.files)
    }

    /// Number of snapshots held.
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Whether no snapshot has been taken.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Drop every snapshot.
    pub fn gc(&mut self) {
        self.snapshots.clear();
    }
}

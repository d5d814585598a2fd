//! Full-tree source snapshots used for rollback.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// A full capture of the mutable source tree, keyed by relative path.
///
/// Restoring a snapshot must reproduce a byte-identical tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Iteration the snapshot belongs to.
    pub iteration: u32,
    /// File contents by path relative to the application root.
    pub files: BTreeMap<String, Vec<u8>>,
    /// When the snapshot was taken.
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Snapshot of `files`, stamped now.
    pub fn new(iteration: u32, files: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            iteration,
            files,
            captured_at: Utc::now(),
        }
    }

    /// Number of files captured.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Sum of captured file sizes.
    pub fn total_bytes(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    /// Paths whose content differs between two snapshots, including files
    /// present in only one of them.
    pub fn changed_paths(&self, other: &Snapshot) -> Vec<String> {
        let mut changed: Vec<String> = self
            .files
            .iter()
            .filter(|(path, content)| other.files.get(*path) != Some(*content))
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(
            other
                .files
                .keys()
                .filter(|path| !self.files.contains_key(*path))
                .cloned(),
        );
        changed.sort();
        changed
    }
}

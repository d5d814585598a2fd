//! Single-writer access to the target application's source tree.
//!
//! Every read and write of application source, and every snapshot capture or
//! restore, goes through one lock so no mutation can interleave with a
//! restore.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use walkdir::WalkDir;

use crate::domain::errors::{DomainError, DomainResult};

/// Directories never captured or scanned.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "node_modules",
    ".venv",
    "venv",
    "target",
    ".patchloop",
    ".pytest_cache",
    ".mypy_cache",
];

/// The target application's files, with all reads and writes serialized.
#[derive(Debug)]
pub struct SourceTree {
    root: PathBuf,
    lock: Mutex<()>,
}

impl SourceTree {
    /// Tree rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    /// Application root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn guard(&self) -> DomainResult<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| DomainError::Snapshot("source tree lock poisoned".to_string()))
    }

    /// Absolute path for an app-relative path. Rejects paths escaping the root.
    pub fn resolve(&self, rel: &Path) -> DomainResult<PathBuf> {
        if rel.is_absolute() || rel.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(DomainError::RepairApplication {
                path: rel.to_path_buf(),
                reason: "path escapes application root".to_string(),
            });
        }
        Ok(self.root.join(rel))
    }

    /// Whether `rel` names an existing file inside the root.
    pub fn exists(&self, rel: &Path) -> bool {
        self.resolve(rel).is_ok_and(|p| p.is_file())
    }

    /// Read `rel` as UTF-8.
    pub fn read(&self, rel: &Path) -> DomainResult<String> {
        let path = self.resolve(rel)?;
        let _guard = self.guard()?;
        fs::read_to_string(&path).map_err(|e| DomainError::RepairApplication {
            path: rel.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write `content` to `rel`, creating parent directories.
    pub fn write(&self, rel: &Path, content: &str) -> DomainResult<()> {
        let path = self.resolve(rel)?;
        let _guard = self.guard()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content).map_err(|e| DomainError::RepairApplication {
            path: rel.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// App-relative paths (with `/` separators) of every file not under a
    /// skipped directory.
    fn walk(&self) -> Vec<(String, PathBuf)> {
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_skipped(e))
        {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let rel = path
                .strip_prefix(&self.root)
                .unwrap_or(path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push((rel, path.to_path_buf()));
        }
        out.sort();
        out
    }

    /// Contents of every Python source file, keyed by app-relative path.
    pub fn python_sources(&self) -> DomainResult<BTreeMap<String, String>> {
        let _guard = self.guard()?;
        let mut sources = BTreeMap::new();
        for (rel, path) in self.walk() {
            if !rel.ends_with(".py") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(&path) {
                sources.insert(rel, content);
            }
        }
        Ok(sources)
    }

    /// Byte-exact capture of every file in the tree.
    pub fn capture(&self) -> DomainResult<BTreeMap<String, Vec<u8>>> {
        let _guard = self.guard()?;
        let mut files = BTreeMap::new();
        for (rel, path) in self.walk() {
            let bytes = fs::read(&path)
                .map_err(|e| DomainError::Snapshot(format!("read {rel}: {e}")))?;
            files.insert(rel, bytes);
        }
        Ok(files)
    }

    /// Rewrite the tree to exactly `files`: captured files are rewritten and
    /// files created since capture are deleted.
    pub fn restore(&self, files: &BTreeMap<String, Vec<u8>>) -> DomainResult<()> {
        let _guard = self.guard()?;
        for (rel, path) in self.walk() {
            if !files.contains_key(&rel) {
                fs::remove_file(&path)
                    .map_err(|e| DomainError::Snapshot(format!("remove {rel}: {e}")))?;
            }
        }
        for (rel, bytes) in files {
            let path = self.root.join(rel);
            if fs::read(&path).is_ok_and(|current| &current == bytes) {
                continue;
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, bytes)
                .map_err(|e| DomainError::Snapshot(format!("write {rel}: {e}")))?;
        }
        Ok(())
    }

    /// Map a path seen in a trace (often absolute, often inside a container)
    /// onto an existing app-relative file by trying successively shorter
    /// suffixes.
    pub fn locate(&self, reported: &str) -> Option<PathBuf> {
        let normalized = reported.replace('\\', "/");
        let parts: Vec<&str> = normalized.split('/').filter(|p| !p.is_empty()).collect();
        (0..parts.len())
            .map(|start| PathBuf::from(parts[start..].join("/")))
            .find(|candidate| self.exists(candidate))
    }
}

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}

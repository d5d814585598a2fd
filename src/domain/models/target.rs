//! Handle to the generated application under repair.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The application supplied by the upstream generation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetHandle {
    /// Application root directory.
    pub root_path: PathBuf,
    /// Language/framework tag, e.g. `python-fastapi`.
    pub framework: String,
}

impl TargetHandle {
    /// Handle for the application at `root_path`.
    pub fn new(root_path: impl Into<PathBuf>, framework: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            framework: framework.into(),
        }
    }

    /// Application root directory.
    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Whether the deterministic repair procedures understand this target's
    /// source language.
    pub fn supports_deterministic_repairs(&self) -> bool {
        let tag = self.framework.to_lowercase();
        tag.contains("python") || tag.contains("fastapi") || tag.contains("flask")
    }
}

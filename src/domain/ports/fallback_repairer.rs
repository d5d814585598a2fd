//! Fallback repairer port: the external (LLM-powered) repair collaborator.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::Violation;

/// What the fallback repairer reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackOutcome {
    /// Whether any file was changed.
    pub success: bool,
    /// Files changed, relative to the application root.
    pub repaired_files: Vec<PathBuf>,
    /// What the repairer did, or why it declined.
    pub description: String,
}

impl FallbackOutcome {
    /// Outcome for a repair that changed nothing.
    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            repaired_files: Vec::new(),
            description: reason.into(),
        }
    }
}

/// Repairs violations no deterministic procedure could handle.
///
/// Invoked only after the known-fix cache, the anti-pattern store, and every
/// ranked candidate failed for a violation.
#[async_trait]
pub trait FallbackRepairer: Send + Sync {
    /// Attempt a repair of `violations` in the tree under `app_path`.
    async fn repair(
        &self,
        violations: &[Violation],
        raw_logs: &str,
        app_path: &Path,
    ) -> DomainResult<FallbackOutcome>;
}

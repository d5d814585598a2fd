//! Pattern store port: cross-run memory of fixes that worked and fixes that
//! did not.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AntiPattern, AntiPatternScope, FixPattern, FixPatternKey};

/// Persistent, cross-run learning store.
///
/// Implementations must be safe to share across tasks; the orchestrator
/// holds one behind an `Arc`.
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Look up the known fix for a key, if one was ever recorded.
    async fn get_known_fix(&self, key: &FixPatternKey) -> DomainResult<Option<FixPattern>>;

    /// Record a fix that resolved its violation.
    ///
    /// Upserts by key: an existing pattern gets its fragments replaced and
    /// its success count incremented.
    async fn put_successful_fix(&self, pattern: &FixPattern) -> DomainResult<()>;

    /// Record that the known fix for `key` was applied but did not help.
    async fn record_failed_fix(&self, key: &FixPatternKey) -> DomainResult<()>;

    /// Anti-patterns recorded for a scope.
    async fn get_anti_patterns(&self, scope: &AntiPatternScope) -> DomainResult<Vec<AntiPattern>>;

    /// Store a new anti-pattern.
    async fn put_anti_pattern(&self, anti_pattern: &AntiPattern) -> DomainResult<()>;

    /// Note that an anti-pattern prevented a bad fragment from surviving.
    async fn increment_prevented(&self, id: Uuid) -> DomainResult<()>;

    /// Most recently updated known fixes, newest first.
    async fn list_known_fixes(&self, limit: usize) -> DomainResult<Vec<FixPattern>>;
}

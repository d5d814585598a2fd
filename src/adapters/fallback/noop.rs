//! Fallback repairer used when no endpoint is configured.

use std::path::Path;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Violation;
use crate::domain::ports::{FallbackOutcome, FallbackRepairer};

/// Declines every request. Used when no fallback service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFallbackRepairer;

#[async_trait]
impl FallbackRepairer for NoopFallbackRepairer {
    async fn repair(
        &self,
        violations: &[Violation],
        _raw_logs: &str,
        _app_path: &Path,
    ) -> DomainResult<FallbackOutcome> {
        Ok(FallbackOutcome::declined(format!(
            "no fallback repairer configured ({} violations left unrepaired)",
            violations.len()
        )))
    }
}

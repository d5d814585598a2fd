//! Client for an external LLM-backed repair service.
//!
//! The service receives the unrepaired violations, the captured service logs,
//! and the application path, edits the files in place, and reports which
//! files it touched. It shares the filesystem with the engine.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Violation;
use crate::domain::ports::{FallbackOutcome, FallbackRepairer};

/// Logs beyond this many bytes are cut from the front before sending.
const MAX_LOG_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize)]
struct RepairRequest<'a> {
    violations: &'a [Violation],
    raw_logs: &'a str,
    app_path: String,
}

/// Sends unrepaired violations to an external repair service over HTTP.
pub struct HttpFallbackRepairer {
    http_client: ReqwestClient,
    endpoint: String,
}

impl HttpFallbackRepairer {
    /// Client for `endpoint` with a per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> DomainResult<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
        })
    }
}

fn tail(logs: &str) -> &str {
    if logs.len() <= MAX_LOG_BYTES {
        return logs;
    }
    let mut start = logs.len() - MAX_LOG_BYTES;
    while !logs.is_char_boundary(start) {
        start += 1;
    }
    &logs[start..]
}

#[async_trait]
impl FallbackRepairer for HttpFallbackRepairer {
    #[instrument(skip_all, fields(endpoint = %self.endpoint, violations = violations.len()))]
    async fn repair(
        &self,
        violations: &[Violation],
        raw_logs: &str,
        app_path: &Path,
    ) -> DomainResult<FallbackOutcome> {
        let request = RepairRequest {
            violations,
            raw_logs: tail(raw_logs),
            app_path: app_path.to_string_lossy().into_owned(),
        };
        debug!("Sending violations to fallback repairer");

        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            warn!(status = status.as_u16(), "Fallback repairer rejected request");
            return Err(DomainError::FallbackFailed(format!("{status}: {body}")));
        }

        let outcome: FallbackOutcome = response
            .json()
            .await
            .map_err(|e| DomainError::FallbackFailed(format!("invalid response: {e}")))?;
        info!(
            success = outcome.success,
            files = outcome.repaired_files.len(),
            "Fallback repairer responded"
        );
        Ok(outcome)
    }
}

//! Domain errors for the smoke-driven repair engine.

use std::path::PathBuf;

use thiserror::Error;

/// Truncate captured logs so error messages stay readable.
fn log_tail(logs: &str) -> String {
    const MAX: usize = 2_000;
    if logs.len() <= MAX {
        return logs.to_string();
    }
    let mut start = logs.len() - MAX;
    while !logs.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &logs[start..])
}

/// Domain-level errors that can occur in the repair engine.
///
/// Regressions and repair cycles are deliberately absent: those are terminal
/// states of a run and are reported on the result, not raised.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The target did not become healthy; carries the captured log output.
    #[error("Target service failed to start: {reason}\n{}", log_tail(.logs))]
    StartupFailed {
        /// What the runtime reported.
        reason: String,
        /// Output captured from the target.
        logs: String,
    },

    /// Rebuilding the target after a repair failed.
    #[error("Rebuild failed: {0}")]
    RebuildFailed(String),

    /// A scenario request could not be sent or read.
    #[error("Scenario execution failed: {0}")]
    ScenarioExecution(String),

    /// A fix could not be written to `path`.
    #[error("Could not apply repair to {}: {reason}", .path.display())]
    RepairApplication {
        /// File the fix targeted.
        path: PathBuf,
        /// Why the write was refused or failed.
        reason: String,
    },

    /// Snapshot capture or restore failed.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// No snapshot was taken for the requested iteration.
    #[error("Snapshot not found for iteration {0}")]
    SnapshotNotFound(u32),

    /// Shutdown was requested while work was in flight.
    #[error("Run cancelled")]
    Cancelled,

    /// A scenario file failed to parse or validate.
    #[error("Invalid scenario: {0}")]
    InvalidScenario(String),

    /// The application IR could not be read.
    #[error("Invalid application IR: {0}")]
    InvalidIr(String),

    /// The external fallback repairer errored or returned nothing usable.
    #[error("Fallback repair failed: {0}")]
    FallbackFailed(String),

    /// Pattern store failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// JSON or YAML (de)serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Filesystem error outside snapshot handling.
    #[error("I/O error: {0}")]
    Io(String),

    /// Transport error talking to the target or fallback service.
    #[error("HTTP error: {0}")]
    Http(String),
}

/// Result alias for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for DomainError {
    fn from(err: serde_yaml::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for DomainError {
    fn from(err: reqwest::Error) -> Self {
        DomainError::Http(err.to_string())
    }
}

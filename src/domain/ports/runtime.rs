//! Runtime ports: lifecycle of the target service and smoke-suite execution.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Scenario, SmokeRun, TargetHandle};

// ---------------------------------------------------------------------------
// LogBuffer
// ---------------------------------------------------------------------------

/// Shared, append-only buffer of process or container output.
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<String>>,
}

impl LogBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line of output.
    pub fn push_line(&self, line: &str) {
        if let Ok(mut buf) = self.inner.lock() {
            buf.push_str(line);
            buf.push('\n');
        }
    }

    /// Append a raw chunk of output.
    pub fn push_str(&self, chunk: &str) {
        if let Ok(mut buf) = self.inner.lock() {
            buf.push_str(chunk);
        }
    }

    /// Copy of everything captured so far.
    pub fn contents(&self) -> String {
        self.inner.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Byte length of the captured output, used to slice new output.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// ApplicationRuntime
// ---------------------------------------------------------------------------

/// A running instance of the target service.
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    /// Unique per started instance.
    pub id: Uuid,
    /// Base URL scenarios are sent to.
    pub base_url: String,
    /// Output captured from the instance.
    pub logs: LogBuffer,
}

impl RuntimeHandle {
    /// Handle with a fresh id and an empty log buffer.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            base_url: base_url.into(),
            logs: LogBuffer::new(),
        }
    }
}

/// Starts, stops, and rebuilds the target service.
///
/// `start` blocks until the service answers its readiness path or the
/// startup timeout elapses; on timeout or crash it returns
/// [`DomainError::StartupFailed`](crate::domain::errors::DomainError::StartupFailed)
/// carrying whatever output was captured.
#[async_trait]
pub trait ApplicationRuntime: Send + Sync {
    /// Start the target and wait until it answers its readiness path.
    async fn start(&self, target: &TargetHandle) -> DomainResult<RuntimeHandle>;

    /// Stop an instance. Stopping an already-exited instance is not an error.
    async fn stop(&self, handle: &RuntimeHandle) -> DomainResult<()>;

    /// Rebuild the service after source changes. A no-op for runtimes that
    /// pick up source changes on start.
    async fn rebuild(&self, target: &TargetHandle) -> DomainResult<()>;

    /// Output captured from an instance so far.
    async fn collect_logs(&self, handle: &RuntimeHandle) -> String {
        handle.logs.contents()
    }
}

// ---------------------------------------------------------------------------
// SmokeHarness
// ---------------------------------------------------------------------------

/// Runs a full smoke suite against a fresh instance of the target.
///
/// This is the seam the orchestrator drives; `RuntimeHarness` is the
/// production implementation.
#[async_trait]
pub trait SmokeHarness: Send + Sync {
    /// Start the target, execute every scenario, stop the target.
    ///
    /// When `shutdown` fires mid-suite the instance is still stopped and the
    /// call returns
    /// [`DomainError::Cancelled`](crate::domain::errors::DomainError::Cancelled).
    async fn run_suite(
        &self,
        target: &TargetHandle,
        scenarios: &[Scenario],
        shutdown: Option<&mut broadcast::Receiver<()>>,
    ) -> DomainResult<SmokeRun>;

    /// Rebuild the target after a batch of fixes.
    async fn rebuild(&self, target: &TargetHandle) -> DomainResult<()>;
}

/// Resolves once shutdown is signalled. A closed channel never resolves; a
/// lagged one counts as signalled.
pub async fn wait_for_shutdown(rx: &mut broadcast::Receiver<()>) {
    match rx.recv().await {
        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {}
        Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
    }
}

//! Runs the target as a local child process.
//!
//! The start command runs through `sh -c` in its own process group so that
//! stopping it also stops whatever server the shell launched.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{join_url, run_rebuild, wait_until_ready, NotReady};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{RuntimeConfig, TargetHandle};
use crate::domain::ports::{ApplicationRuntime, LogBuffer, RuntimeHandle};

/// Time a stopped service gets between SIGTERM and SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Runs the target as a local child process started from a shell command.
pub struct ProcessRuntime {
    config: RuntimeConfig,
    client: reqwest::Client,
    children: Mutex<HashMap<Uuid, Child>>,
}

impl ProcessRuntime {
    /// Runtime using the start command and health settings in `config`.
    pub fn new(config: RuntimeConfig) -> DomainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.poll_interval_ms.max(100) * 4))
            .build()?;
        Ok(Self {
            config,
            client,
            children: Mutex::new(HashMap::new()),
        })
    }

    fn spawn(&self, target: &TargetHandle) -> std::io::Result<Child> {
        Command::new("sh")
            .arg("-c")
            .arg(&self.config.start_command)
            .current_dir(target.root())
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
    }
}

/// Copy a child's output into the log buffer line by line.
fn drain<R>(stream: R, logs: LogBuffer)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            logs.push_line(&line);
        }
    });
}

/// SIGTERM the child's process group, then kill it if it outlives `grace`.
async fn terminate(mut child: Child, grace: Duration) {
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM failed, process group likely gone");
        }
    }
    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(?status, "Service exited"),
        Ok(Err(e)) => warn!(error = %e, "Error waiting for service to exit"),
        Err(_) => {
            warn!("Service ignored SIGTERM, forcing kill");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill service");
            }
        }
    }
}

#[async_trait]
impl ApplicationRuntime for ProcessRuntime {
    async fn start(&self, target: &TargetHandle) -> DomainResult<RuntimeHandle> {
        let handle = RuntimeHandle::new(self.config.base_url.clone());
        let mut child = self.spawn(target).map_err(|e| DomainError::StartupFailed {
            reason: format!("failed to spawn `{}`: {e}", self.config.start_command),
            logs: String::new(),
        })?;
        if let Some(stdout) = child.stdout.take() {
            drain(stdout, handle.logs.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            drain(stderr, handle.logs.clone());
        }
        info!(command = %self.config.start_command, app = %target.root().display(), "Service starting");

        let url = join_url(&self.config.base_url, &self.config.readiness_path);
        let ready = wait_until_ready(
            &self.client,
            &url,
            Duration::from_millis(self.config.poll_interval_ms),
            Duration::from_secs(self.config.startup_timeout_secs),
            || match child.try_wait() {
                Ok(Some(status)) => Some(status.to_string()),
                Ok(None) => None,
                Err(e) => Some(e.to_string()),
            },
        )
        .await;

        match ready {
            Ok(()) => {
                self.children.lock().await.insert(handle.id, child);
                Ok(handle)
            }
            Err(not_ready) => {
                let reason = match not_ready {
                    NotReady::Exited(status) => format!("service exited during startup ({status})"),
                    NotReady::TimedOut => format!(
                        "{url} not ready after {}s",
                        self.config.startup_timeout_secs
                    ),
                };
                terminate(child, STOP_GRACE).await;
                // Let the drain tasks flush what the process wrote last.
                tokio::task::yield_now().await;
                Err(DomainError::StartupFailed {
                    reason,
                    logs: handle.logs.contents(),
                })
            }
        }
    }

    async fn stop(&self, handle: &RuntimeHandle) -> DomainResult<()> {
        let child = self.children.lock().await.remove(&handle.id);
        if let Some(child) = child {
            terminate(child, STOP_GRACE).await;
            info!(id = %handle.id, "Service stopped");
        }
        Ok(())
    }

    async fn rebuild(&self, target: &TargetHandle) -> DomainResult<()> {
        let Some(command) = &self.config.rebuild_command else {
            return Ok(());
        };
        info!(command = %command, "Rebuilding service");
        run_rebuild(
            command,
            target.root(),
            &self.config.env,
            Duration::from_secs(self.config.rebuild_timeout_secs),
        )
        .await
    }
}

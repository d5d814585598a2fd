//! `ApplicationRuntime` adapters: a local child process or a compose project.

pub mod compose;
pub mod process;

pub use compose::ComposeRuntime;
pub use process::ProcessRuntime;

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

use crate::domain::errors::{DomainError, DomainResult};

/// Run `command` through `sh -c` in `cwd`, killing it after `limit`.
pub(crate) async fn run_shell(
    command: &str,
    cwd: &Path,
    env: &BTreeMap<String, String>,
    limit: Duration,
) -> DomainResult<Output> {
    debug!(command, cwd = %cwd.display(), "Running shell command");
    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    match timeout(limit, child).await {
        Ok(output) => Ok(output?),
        Err(_) => Err(DomainError::Io(format!(
            "`{command}` timed out after {}s",
            limit.as_secs()
        ))),
    }
}

/// Combined stdout and stderr of a finished command.
pub(crate) fn output_text(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/// Run a rebuild command, failing on a non-zero exit.
pub(crate) async fn run_rebuild(
    command: &str,
    cwd: &Path,
    env: &BTreeMap<String, String>,
    limit: Duration,
) -> DomainResult<()> {
    let output = run_shell(command, cwd, env, limit)
        .await
        .map_err(|e| DomainError::RebuildFailed(e.to_string()))?;
    if output.status.success() {
        return Ok(());
    }
    Err(DomainError::RebuildFailed(format!(
        "`{command}` exited with {}: {}",
        output.status,
        output_text(&output).trim()
    )))
}

/// Why readiness polling gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum NotReady {
    Exited(String),
    TimedOut,
}

/// Poll `url` until it answers below 500, the deadline passes, or
/// `exited` reports that the service died.
pub(crate) async fn wait_until_ready<F>(
    client: &reqwest::Client,
    url: &str,
    interval: Duration,
    limit: Duration,
    mut exited: F,
) -> Result<(), NotReady>
where
    F: FnMut() -> Option<String>,
{
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = exited() {
            return Err(NotReady::Exited(status));
        }
        match client.get(url).send().await {
            Ok(resp) if resp.status().as_u16() < 500 => {
                debug!(url, status = resp.status().as_u16(), "Service ready");
                return Ok(());
            }
            Ok(resp) => debug!(url, status = resp.status().as_u16(), "Service not ready"),
            Err(e) => debug!(url, error = %e, "Readiness check failed"),
        }
        if Instant::now() + interval > deadline {
            return Err(NotReady::TimedOut);
        }
        sleep(interval).await;
    }
}

/// Join a base URL and a path without doubling the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

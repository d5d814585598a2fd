//! Runs the target as a `docker compose` project rooted at the app directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::{join_url, output_text, run_rebuild, run_shell, wait_until_ready};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{RuntimeConfig, TargetHandle};
use crate::domain::ports::{ApplicationRuntime, RuntimeHandle};

const COMPOSE_TIMEOUT: Duration = Duration::from_secs(120);

/// Runs the target as a docker compose project.
pub struct ComposeRuntime {
    config: RuntimeConfig,
    client: reqwest::Client,
    /// `docker compose` or an equivalent binary.
    compose: String,
    /// Project directory of each running handle.
    projects: Mutex<HashMap<Uuid, PathBuf>>,
}

impl ComposeRuntime {
    /// Runtime using the compose file and health settings in `config`.
    pub fn new(config: RuntimeConfig) -> DomainResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.poll_interval_ms.max(100) * 4))
            .build()?;
        Ok(Self {
            config,
            client,
            compose: "docker compose".to_string(),
            projects: Mutex::new(HashMap::new()),
        })
    }

    /// Use a different compose binary, e.g. `podman-compose`.
    pub fn with_compose_command(mut self, compose: impl Into<String>) -> Self {
        self.compose = compose.into();
        self
    }

    fn command(&self, args: &str) -> String {
        format!("{} {args}", self.compose)
    }

    async fn logs(&self, root: &Path) -> String {
        match run_shell(&self.command("logs --no-color"), root, &self.config.env, COMPOSE_TIMEOUT).await {
            Ok(output) => output_text(&output),
            Err(e) => {
                warn!(error = %e, "Failed to collect compose logs");
                String::new()
            }
        }
    }

    async fn down(&self, root: &Path) -> DomainResult<()> {
        let output = run_shell(&self.command("down"), root, &self.config.env, COMPOSE_TIMEOUT).await?;
        if !output.status.success() {
            warn!(output = %output_text(&output).trim(), "compose down reported failure");
        }
        Ok(())
    }
}

#[async_trait]
impl ApplicationRuntime for ComposeRuntime {
    async fn start(&self, target: &TargetHandle) -> DomainResult<RuntimeHandle> {
        let handle = RuntimeHandle::new(self.config.base_url.clone());
        let up = run_shell(
            &self.command("up -d"),
            target.root(),
            &self.config.env,
            Duration::from_secs(self.config.startup_timeout_secs).max(COMPOSE_TIMEOUT),
        )
        .await
        .map_err(|e| DomainError::StartupFailed {
            reason: e.to_string(),
            logs: String::new(),
        })?;
        if !up.status.success() {
            return Err(DomainError::StartupFailed {
                reason: format!("compose up exited with {}", up.status),
                logs: output_text(&up),
            });
        }
        info!(app = %target.root().display(), "Compose project starting");

        let url = join_url(&self.config.base_url, &self.config.readiness_path);
        let ready = wait_until_ready(
            &self.client,
            &url,
            Duration::from_millis(self.config.poll_interval_ms),
            Duration::from_secs(self.config.startup_timeout_secs),
            || None,
        )
        .await;
        if ready.is_err() {
            let logs = self.logs(target.root()).await;
            if let Err(e) = self.down(target.root()).await {
                warn!(error = %e, "Failed to stop compose project");
            }
            return Err(DomainError::StartupFailed {
                reason: format!("{url} not ready after {}s", self.config.startup_timeout_secs),
                logs,
            });
        }
        self.projects
            .lock()
            .await
            .insert(handle.id, target.root().to_path_buf());
        Ok(handle)
    }

    async fn stop(&self, handle: &RuntimeHandle) -> DomainResult<()> {
        let root = self.projects.lock().await.remove(&handle.id);
        match root {
            Some(root) => self.down(&root).await,
            None => Ok(()),
        }
    }

    async fn rebuild(&self, target: &TargetHandle) -> DomainResult<()> {
        let command = self
            .config
            .rebuild_command
            .clone()
            .unwrap_or_else(|| self.command("build"));
        info!(command = %command, "Rebuilding compose project");
        run_rebuild(
            &command,
            target.root(),
            &self.config.env,
            Duration::from_secs(self.config.rebuild_timeout_secs),
        )
        .await
    }

    async fn collect_logs(&self, handle: &RuntimeHandle) -> String {
        let root = self.projects.lock().await.get(&handle.id).cloned();
        match root {
            Some(root) => self.logs(&root).await,
            None => handle.logs.contents(),
        }
    }
}

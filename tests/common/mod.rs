//! Common test utilities for integration tests
//!
//! Provides scripted harnesses, fallback repairers, and violation builders
//! shared across the integration test files.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::broadcast;

use patchloop::domain::errors::{DomainError, DomainResult};
use patchloop::domain::models::{
    HttpMethod, Scenario, ScenarioResult, ScenarioStep, SmokeRun, StackTrace, TargetHandle,
    Violation,
};
use patchloop::domain::ports::{wait_for_shutdown, FallbackOutcome, FallbackRepairer, SmokeHarness};

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Write `content` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write fixture file");
}

pub fn read_file(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).expect("Failed to read fixture file")
}

pub fn target(root: &Path) -> TargetHandle {
    TargetHandle::new(root, "python-fastapi")
}

/// One smoke scenario per name; the harnesses never execute them.
pub fn scenarios(names: &[&str]) -> Vec<Scenario> {
    names
        .iter()
        .map(|name| {
            Scenario::single(
                *name,
                ScenarioStep {
                    method: HttpMethod::Get,
                    path: "/health".to_string(),
                    body: None,
                    fields: Vec::new(),
                    expected_status: 200,
                    extract: Vec::new(),
                },
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Violations and runs
// ---------------------------------------------------------------------------

/// A traceless 500 on `GET {endpoint}`.
pub fn server_error(endpoint: &str) -> Violation {
    Violation {
        endpoint: endpoint.to_string(),
        http_method: HttpMethod::Get,
        expected_status: 200,
        actual_status: 500,
        error_kind: "HTTPError".to_string(),
        error_message: "Internal Server Error".to_string(),
        stack_trace: None,
        scenario_name: Some(format!("GET {endpoint}")),
    }
}

pub fn trace(kind: &str, message: &str) -> StackTrace {
    StackTrace {
        exception_kind: kind.to_string(),
        exception_message: message.to_string(),
        source_file: None,
        source_line: None,
        function: None,
        raw_text: format!(
            "Traceback (most recent call last):\n  File \"/app/app/main.py\", line 1, in <module>\n{kind}: {message}"
        ),
    }
}

/// A suite run with `passed` passing scenarios followed by one failing
/// scenario per violation.
pub fn smoke_run(passed: usize, violations: &[Violation]) -> SmokeRun {
    let mut results: Vec<ScenarioResult> = (0..passed)
        .map(|i| ScenarioResult {
            scenario_name: format!("passing {i}"),
            passed: true,
            failed_step: None,
            violation: None,
            extracted: BTreeMap::new(),
            duration_ms: 3,
        })
        .collect();
    results.extend(violations.iter().map(|v| ScenarioResult {
        scenario_name: v.scenario_name.clone().unwrap_or_else(|| v.id()),
        passed: false,
        failed_step: Some(0),
        violation: Some(v.clone()),
        extracted: BTreeMap::new(),
        duration_ms: 5,
    }));
    SmokeRun {
        results,
        raw_logs: "INFO:     Application startup complete.\n".to_string(),
    }
}

// ---------------------------------------------------------------------------
// ScriptedHarness
// ---------------------------------------------------------------------------

/// What a scripted suite run does.
#[derive(Debug, Clone)]
pub enum Step {
    Run(SmokeRun),
    StartupFailure(String),
    /// Runs until shutdown is signalled, then stops the instance.
    Hang,
}

/// Replays a fixed sequence of suite outcomes; the last one repeats.
pub struct ScriptedHarness {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    runs: AtomicUsize,
    rebuilds: AtomicUsize,
    interrupted: AtomicUsize,
    fail_rebuilds: bool,
}

impl ScriptedHarness {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            runs: AtomicUsize::new(0),
            rebuilds: AtomicUsize::new(0),
            interrupted: AtomicUsize::new(0),
            fail_rebuilds: false,
        }
    }

    /// Every rebuild reports a build error.
    pub fn with_failing_rebuilds(mut self) -> Self {
        self.fail_rebuilds = true;
        self
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn rebuilds(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }

    /// Suites that were stopped by a shutdown signal.
    pub fn interrupted(&self) -> usize {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut last = self.last.lock().unwrap();
        if let Some(step) = self.steps.lock().unwrap().pop_front() {
            *last = Some(step);
        }
        last.clone().expect("ScriptedHarness needs at least one step")
    }
}

#[async_trait]
impl SmokeHarness for ScriptedHarness {
    async fn run_suite(
        &self,
        _target: &TargetHandle,
        _scenarios: &[Scenario],
        shutdown: Option<&mut broadcast::Receiver<()>>,
    ) -> DomainResult<SmokeRun> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Run(run) => Ok(run),
            Step::StartupFailure(reason) => Err(DomainError::StartupFailed {
                reason,
                logs: "Traceback (most recent call last):\nImportError: cannot import name 'Base'".to_string(),
            }),
            Step::Hang => {
                let Some(rx) = shutdown else {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    return Ok(SmokeRun::default());
                };
                wait_for_shutdown(rx).await;
                self.interrupted.fetch_add(1, Ordering::SeqCst);
                Err(DomainError::Cancelled)
            }
        }
    }

    async fn rebuild(&self, _target: &TargetHandle) -> DomainResult<()> {
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        if self.fail_rebuilds {
            return Err(DomainError::RebuildFailed("docker build exited with 1".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SourceHarness
// ---------------------------------------------------------------------------

/// Judges the live source tree: each iteration's outcome is computed from
/// what is on disk, the way a real service would behave after a rebuild.
pub struct SourceHarness<F> {
    judge: F,
    rebuilds: AtomicUsize,
}

impl<F> SourceHarness<F>
where
    F: Fn(&Path) -> SmokeRun + Send + Sync,
{
    pub fn new(judge: F) -> Self {
        Self {
            judge,
            rebuilds: AtomicUsize::new(0),
        }
    }

    pub fn rebuilds(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> SmokeHarness for SourceHarness<F>
where
    F: Fn(&Path) -> SmokeRun + Send + Sync,
{
    async fn run_suite(
        &self,
        target: &TargetHandle,
        _scenarios: &[Scenario],
        _shutdown: Option<&mut broadcast::Receiver<()>>,
    ) -> DomainResult<SmokeRun> {
        Ok((self.judge)(target.root()))
    }

    async fn rebuild(&self, _target: &TargetHandle) -> DomainResult<()> {
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fallback repairers
// ---------------------------------------------------------------------------

/// Appends a numbered line to `rel` on every call and reports success.
pub struct EditingFallback {
    rel: String,
    calls: AtomicUsize,
}

impl EditingFallback {
    pub fn new(rel: &str) -> Self {
        Self {
            rel: rel.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FallbackRepairer for EditingFallback {
    async fn repair(&self, violations: &[Violation], _raw_logs: &str, app_path: &Path) -> DomainResult<FallbackOutcome> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let path = app_path.join(&self.rel);
        let mut content = fs::read_to_string(&path).unwrap_or_default();
        content.push_str(&format!("# fallback edit {n}\n"));
        fs::write(&path, content)?;
        Ok(FallbackOutcome {
            success: true,
            repaired_files: vec![self.rel.clone().into()],
            description: format!("Patched {} violation(s)", violations.len()),
        })
    }
}

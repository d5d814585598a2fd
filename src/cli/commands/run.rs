//! Implementation of the `patchloop run` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use indicatif::ProgressBar;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::adapters::fallback;
use crate::adapters::memory::InMemoryPatternStore;
use crate::adapters::runtime::{ComposeRuntime, ProcessRuntime};
use crate::adapters::scenarios::{load_ir, FileScenarioSource, IrScenarioSource};
use crate::adapters::sqlite::{open_pattern_store, PoolConfig};
use crate::cli::output::{create_progress_bar, output, CommandOutput, ProgressBarExt, TableFormatter};
use crate::domain::models::{
    ApplicationIr, Config, RepairEvent, RuntimeMode, Scenario, SmokeRepairResult, TargetHandle,
};
use crate::domain::ports::{PatternStore, ScenarioSource, SmokeHarness};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{Engine, RepairOrchestrator, RuntimeHarness};

/// Arguments for `run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Root directory of the application to repair
    #[arg(long, default_value = ".")]
    pub app: PathBuf,

    /// Scenario catalog (YAML or JSON); derived from the IR when omitted
    #[arg(long)]
    pub scenarios: Option<PathBuf>,

    /// Application IR (YAML or JSON)
    #[arg(long)]
    pub ir: Option<PathBuf>,

    /// Language/framework tag of the application
    #[arg(long, default_value = "python-fastapi")]
    pub framework: String,

    /// Override repair.max_iterations
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Override repair.target_pass_rate
    #[arg(long)]
    pub target: Option<f64>,

    /// Keep learned patterns in memory only
    #[arg(long)]
    pub no_store: bool,
}

/// Result of `run`
#[derive(Debug, Serialize)]
pub struct RunOutput {
    /// Final report of the repair loop
    #[serde(flatten)]
    pub result: SmokeRepairResult,
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        let result = &self.result;
        let mut sections = vec![
            formatter.format_status(result.status),
            result.summary(),
            format!("\nIterations:\n{}", formatter.format_iterations(&result.iterations)),
        ];
        if !result.fixes_applied.is_empty() {
            sections.push(format!("\nFixes:\n{}", formatter.format_fixes(&result.fixes_applied)));
        }
        if !result.unresolved.is_empty() {
            sections.push(format!(
                "\nUnresolved:\n{}",
                formatter.format_unresolved(&result.unresolved)
            ));
        }
        sections.join("\n")
    }
}

/// Run the repair loop. Returns whether the target pass rate was reached.
pub async fn execute(args: RunArgs, mut config: Config, json_mode: bool) -> Result<bool> {
    if let Some(n) = args.max_iterations {
        config.repair.max_iterations = n;
    }
    if let Some(target) = args.target {
        config.repair.target_pass_rate = target;
    }
    ConfigLoader::validate(&config)?;

    let app = args
        .app
        .canonicalize()
        .with_context(|| format!("Application directory {} not found", args.app.display()))?;
    let target = TargetHandle::new(&app, &args.framework);

    let ir = Arc::new(match &args.ir {
        Some(path) => load_ir(path).await.context("Failed to load application IR")?,
        None => ApplicationIr::default(),
    });
    let scenarios = load_scenarios(args.scenarios.as_deref(), &ir).await?;

    let store = open_store(&config, args.no_store).await?;
    let mut engine = Engine::new(&config.repair, Arc::clone(&ir), store);
    if let Err(e) = engine.warm_up().await {
        warn!(error = %e, "Could not seed confidence model from pattern store");
    }

    let harness: Arc<dyn SmokeHarness> = match config.runtime.mode {
        RuntimeMode::Process => Arc::new(RuntimeHarness::new(
            ProcessRuntime::new(config.runtime.clone())?,
            &config.runtime,
            Arc::clone(&ir),
        )?),
        RuntimeMode::Compose => Arc::new(RuntimeHarness::new(
            ComposeRuntime::new(config.runtime.clone())?,
            &config.runtime,
            Arc::clone(&ir),
        )?),
    };

    let (event_tx, event_rx) = mpsc::channel(64);
    let orchestrator = RepairOrchestrator::new(harness, config.repair.clone())
        .with_fallback(fallback::from_config(&config.fallback)?)
        .with_events(event_tx);

    let progress = (!json_mode).then(|| create_progress_bar(u64::from(config.repair.max_iterations)));
    let reporter = tokio::spawn(report_progress(event_rx, progress.clone()));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    let result = orchestrator
        .run(&mut engine, &target, &scenarios, Some(shutdown_rx))
        .await;
    ctrl_c.abort();
    // Dropping the orchestrator closes the event channel so the reporter ends.
    drop(orchestrator);
    let _ = reporter.await;

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            if let Some(pb) = &progress {
                pb.finish_error("repair run failed");
            }
            return Err(e).context("Repair run failed");
        }
    };
    if let Some(pb) = &progress {
        if result.target_reached {
            pb.finish_success(result.status.as_str());
        } else {
            pb.finish_error(result.status.as_str());
        }
    }

    let reached = result.target_reached;
    output(&RunOutput { result }, json_mode);
    Ok(reached)
}

async fn load_scenarios(path: Option<&Path>, ir: &Arc<ApplicationIr>) -> Result<Vec<Scenario>> {
    let scenarios = match path {
        Some(path) => FileScenarioSource::new(path).load_scenarios().await?,
        None if !ir.endpoints.is_empty() => {
            IrScenarioSource::new(Arc::clone(ir)).load_scenarios().await?
        }
        None => bail!("No scenarios: pass --scenarios, or --ir with endpoints"),
    };
    if scenarios.is_empty() {
        bail!("Scenario source produced no scenarios");
    }
    Ok(scenarios)
}

async fn open_store(config: &Config, no_store: bool) -> Result<Arc<dyn PatternStore>> {
    if no_store {
        debug!("Using in-memory pattern store");
        return Ok(Arc::new(InMemoryPatternStore::default()));
    }
    let path = Path::new(&config.database.path);
    let store = open_pattern_store(path, Some(PoolConfig::from(&config.database)))
        .await
        .with_context(|| format!("Failed to open pattern store at {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn report_progress(mut rx: mpsc::Receiver<RepairEvent>, progress: Option<ProgressBar>) {
    while let Some(event) = rx.recv().await {
        debug!(?event, "Repair event");
        let Some(pb) = &progress else { continue };
        match event {
            RepairEvent::RunStarted { scenario_count, .. } => {
                pb.set_message(format!("running {scenario_count} scenarios"));
            }
            RepairEvent::IterationCompleted(p) => {
                pb.inc(1);
                pb.note(format!(
                    "iteration {}: {:.1}% passing, {} violation(s), {} repair(s)",
                    p.iteration,
                    p.pass_rate * 100.0,
                    p.violations_count,
                    p.repairs_applied
                ));
            }
            RepairEvent::RepairApplied { strategy, file, .. } => {
                pb.set_message(format!("{strategy} repair in {file}"));
            }
            RepairEvent::RolledBack {
                from_iteration,
                to_iteration,
                reverted_fixes,
            } => pb.note(format!(
                "regression: rolled back iteration {from_iteration} to {to_iteration}, {reverted_fixes} fix(es) reverted"
            )),
            RepairEvent::RunFinished { .. } => {}
        }
    }
}

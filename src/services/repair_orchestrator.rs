//! The smoke-driven repair loop.
//!
//! Each iteration snapshots the source tree, runs the smoke suite, asks the
//! convergence monitor whether to continue, learns from the previous
//! iteration's fixes, and applies at most one fix per violation:
//!
//! 1. replay a known fix from the pattern store,
//! 2. apply a learned anti-pattern correction,
//! 3. classify, attribute, generate and rank candidates, applying the first
//!    one whose procedure succeeds,
//! 4. batch everything left to the fallback repairer.
//!
//! A regression restores the previous snapshot, marks that iteration's fixes
//! reverted, and stores them as anti-patterns.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    AntiPattern, AntiPatternScope, ApplicationIr, FixOrigin, FixPattern, FixPatternKey, FixType,
    IterationRecord, MutationRecord, MutationResult, RepairConfig, RepairEvent, RepairFix,
    RepairStatus, Scenario, SmokeRepairResult, SmokeRun, StrategyType, TargetHandle,
    UnresolvedViolation, Violation,
};
use crate::domain::ports::{FallbackRepairer, PatternStore, SmokeHarness};
use crate::services::candidate_generator::RepairCandidateGenerator;
use crate::services::causal_chain::CausalChainBuilder;
use crate::services::confidence_ranker::{ConfidenceModel, ConfidenceRanker};
use crate::services::convergence_monitor::{ConvergenceMonitor, Verdict};
use crate::services::failure_classifier::FailureClassifier;
use crate::services::repair_procedures::misc::ensure_used_imports;
use crate::services::repair_procedures::source_edit::line_diff;
use crate::services::repair_procedures::{self, replace_fragment, ProcedureError, TextEdit};
use crate::services::snapshot_manager::SnapshotManager;
use crate::services::source_locator::SourceLocator;
use crate::services::source_tree::SourceTree;

/// Known fixes loaded into the confidence model at warm-up.
const WARM_UP_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Learning state for one repair run.
///
/// Owns everything that changes as the run progresses: the convergence
/// history, the in-run confidence model, and the causal-chain history. Build
/// a fresh engine per run; only the pattern store outlives it.
pub struct Engine {
    store: Arc<dyn PatternStore>,
    ir: Arc<ApplicationIr>,
    confidence: ConfidenceModel,
    monitor: ConvergenceMonitor,
    causal: CausalChainBuilder,
}

impl Engine {
    /// Fresh per-run state over `store`, seeded from `config`.
    pub fn new(
        config: &RepairConfig,
        ir: Arc<ApplicationIr>,
        store: Arc<dyn PatternStore>,
    ) -> Self {
        Self {
            store,
            causal: CausalChainBuilder::new(Arc::clone(&ir)),
            ir,
            confidence: ConfidenceModel::new(),
            monitor: ConvergenceMonitor::new(config),
        }
    }

    /// Seed the confidence model from stored known fixes. Returns how many
    /// patterns were loaded.
    pub async fn warm_up(&mut self) -> DomainResult<usize> {
        let patterns = self.store.list_known_fixes(WARM_UP_LIMIT).await?;
        self.confidence.seed(&patterns);
        debug!(patterns = patterns.len(), "Confidence model seeded");
        Ok(patterns.len())
    }

    /// Convergence monitor for the run.
    pub fn monitor(&self) -> &ConvergenceMonitor {
        &self.monitor
    }

    /// Causal chain builder for the run.
    pub fn causal(&self) -> &CausalChainBuilder {
        &self.causal
    }

    /// Per-signature success history for the run.
    pub fn confidence(&self) -> &ConfidenceModel {
        &self.confidence
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// A fix written this iteration, awaiting the next smoke run's verdict.
#[derive(Debug)]
struct PendingFix {
    fix_index: usize,
    mutation_indices: Vec<usize>,
    key: FixPatternKey,
    constraint: String,
    signature: String,
}

/// The most recent repair attempt for a violation, for the final report.
#[derive(Debug, Clone)]
struct Attempt {
    strategy: Option<StrategyType>,
    confidence: Option<f64>,
    reason: String,
}

/// A mutation ready to be written.
struct Proposal {
    path: PathBuf,
    before: String,
    edit: TextEdit,
    fix_type: FixType,
    strategy: StrategyType,
    origin: FixOrigin,
    description: String,
    confidence: Option<f64>,
}

struct RunState {
    tree: Arc<SourceTree>,
    snapshots: SnapshotManager,
    iteration: u32,
    deterministic: bool,
    shutdown: Option<broadcast::Receiver<()>>,
    cancelled: bool,
    regressed: bool,
    initial_pass_rate: Option<f64>,
    iterations: Vec<IterationRecord>,
    fixes: Vec<RepairFix>,
    mutations: Vec<MutationRecord>,
    pending: Vec<PendingFix>,
    attempts: HashMap<String, Attempt>,
}

impl RunState {
    fn new(target: &TargetHandle, shutdown: Option<broadcast::Receiver<()>>) -> Self {
        let tree = Arc::new(SourceTree::new(target.root()));
        Self {
            snapshots: SnapshotManager::new(Arc::clone(&tree)),
            tree,
            iteration: 0,
            deterministic: target.supports_deterministic_repairs(),
            shutdown,
            cancelled: false,
            regressed: false,
            initial_pass_rate: None,
            iterations: Vec::new(),
            fixes: Vec::new(),
            mutations: Vec::new(),
            pending: Vec::new(),
            attempts: HashMap::new(),
        }
    }

    /// Non-blocking check of the shutdown channel. A closed channel never
    /// cancels; a lagged one does.
    fn shutdown_requested(&mut self) -> bool {
        if self.cancelled {
            return true;
        }
        let requested = self.shutdown.as_mut().is_some_and(|rx| {
            matches!(
                rx.try_recv(),
                Ok(()) | Err(broadcast::error::TryRecvError::Lagged(_))
            )
        });
        self.cancelled = requested;
        requested
    }

    fn note(
        &mut self,
        violation_id: &str,
        strategy: Option<StrategyType>,
        confidence: Option<f64>,
        reason: impl Into<String>,
    ) {
        self.attempts.insert(
            violation_id.to_string(),
            Attempt {
                strategy,
                confidence,
                reason: reason.into(),
            },
        );
    }

    fn attempted_strategy(&self, violation_id: &str) -> Option<StrategyType> {
        self.attempts.get(violation_id).and_then(|a| a.strategy)
    }

    /// Record a fix that was never written.
    fn record_failed_fix(
        &mut self,
        violation: &Violation,
        strategy: StrategyType,
        origin: FixOrigin,
        reason: &str,
    ) {
        self.fixes.push(RepairFix {
            file_path: PathBuf::new(),
            fix_type: FixType::Fallback,
            strategy_type: strategy,
            origin,
            description: format!("Unrepaired: {}", violation.id()),
            old_fragment: String::new(),
            new_fragment: String::new(),
            success: false,
            reverted: false,
            violation_id: violation.id(),
            endpoint: violation.endpoint.clone(),
            iteration: self.iteration,
            confidence: None,
            failure_reason: Some(reason.to_string()),
        });
    }
}

/// Per-iteration counters.
#[derive(Debug, Default, Clone, Copy)]
struct PhaseCounts {
    attempted: usize,
    written: usize,
}

// ---------------------------------------------------------------------------
// RepairOrchestrator
// ---------------------------------------------------------------------------

/// Drives the repair loop against a [`SmokeHarness`].
pub struct RepairOrchestrator<H: SmokeHarness + ?Sized> {
    harness: Arc<H>,
    fallback: Option<Arc<dyn FallbackRepairer>>,
    config: RepairConfig,
    classifier: FailureClassifier,
    ranker: ConfidenceRanker,
    event_tx: Option<mpsc::Sender<RepairEvent>>,
}

impl<H: SmokeHarness + ?Sized> RepairOrchestrator<H> {
    /// Orchestrator with no fallback, no pattern store and no event sink.
    pub fn new(harness: Arc<H>, config: RepairConfig) -> Self {
        Self {
            harness,
            fallback: None,
            ranker: ConfidenceRanker::new(config.ranking),
            classifier: FailureClassifier::new(),
            config,
            event_tx: None,
        }
    }

    /// Delegate violations no deterministic procedure could fix.
    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackRepairer>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Stream progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<RepairEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run the loop until a terminal status.
    ///
    /// Fails only when the target cannot start on the first iteration or the
    /// source tree cannot be snapshotted or restored; every other problem is
    /// folded into the report.
    #[instrument(skip_all, fields(app = %target.root().display()))]
    pub async fn run(
        &self,
        engine: &mut Engine,
        target: &TargetHandle,
        scenarios: &[Scenario],
        shutdown: Option<broadcast::Receiver<()>>,
    ) -> DomainResult<SmokeRepairResult> {
        let mut run = RunState::new(target, shutdown);
        info!(
            scenarios = scenarios.len(),
            max_iterations = self.config.max_iterations,
            target_pass_rate = self.config.target_pass_rate,
            "Starting repair run"
        );
        self.emit(RepairEvent::RunStarted {
            app_path: target.root().display().to_string(),
            scenario_count: scenarios.len(),
        })
        .await;

        let mut status = RepairStatus::Running;
        while !status.is_terminal() {
            if run.shutdown_requested() {
                status = RepairStatus::Cancelled;
                break;
            }
            run.iteration += 1;
            let iteration = run.iteration;
            let started = Instant::now();
            run.snapshots.take(iteration)?;

            let Some(outcome) = self.run_suite(&mut run, target, scenarios).await else {
                info!(iteration, "Run cancelled during smoke suite");
                status = RepairStatus::Cancelled;
                break;
            };
            let (smoke, startup_failed) = match outcome {
                Ok(smoke) => (smoke, false),
                Err(DomainError::StartupFailed { reason, logs }) if iteration == 1 => {
                    error!(reason = %reason, "Target failed to start on the first iteration");
                    return Err(DomainError::StartupFailed { reason, logs });
                }
                Err(DomainError::StartupFailed { reason, .. }) => {
                    warn!(iteration, reason = %reason, "Target failed to start, scoring iteration as 0.0");
                    (SmokeRun::default(), true)
                }
                Err(e) => return Err(e),
            };
            let pass_rate = if startup_failed { 0.0 } else { smoke.pass_rate() };
            let violations = smoke.violations();
            run.initial_pass_rate.get_or_insert(pass_rate);
            info!(
                iteration,
                pass_rate,
                violations = violations.len(),
                "Smoke suite finished"
            );

            let signatures = violations.iter().map(Violation::signature).collect();
            let verdict = engine.monitor.record_iteration(pass_rate, signatures);

            let mut record = IterationRecord {
                iteration,
                pass_rate,
                violations: violations.clone(),
                repairs_applied: 0,
                repairs_successful: 0,
                startup_failed,
                rebuild_failed: false,
                duration_ms: 0,
            };

            if verdict == Verdict::Stop(RepairStatus::Regressed) {
                self.roll_back(engine, &mut run).await?;
            } else {
                self.resolve_pending(engine, &mut run, &violations).await;
            }

            status = verdict.status();
            if status.is_terminal() {
                info!(iteration, status = %status, "Repair loop stopping");
            } else {
                let counts = self
                    .repair_phase(engine, &mut run, target, &violations, &smoke.raw_logs)
                    .await;
                record.repairs_applied = counts.attempted;
                record.repairs_successful = counts.written;
                if run.cancelled {
                    status = RepairStatus::Cancelled;
                } else if counts.written > 0 {
                    if let Err(e) = self.harness.rebuild(target).await {
                        warn!(iteration, error = %e, "Rebuild after repairs failed");
                        record.rebuild_failed = true;
                    }
                }
            }

            record.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.emit(RepairEvent::IterationCompleted(record.progress()))
                .await;
            run.iterations.push(record);
        }

        let result = Self::finish(engine, run, status);
        info!(summary = %result.summary(), "Repair run finished");
        self.emit(RepairEvent::RunFinished {
            status: result.status,
            final_pass_rate: result.final_pass_rate,
        })
        .await;
        Ok(result)
    }

    /// Run the suite; the harness watches the shutdown channel and stops the
    /// target itself. `None` means cancelled.
    async fn run_suite(
        &self,
        run: &mut RunState,
        target: &TargetHandle,
        scenarios: &[Scenario],
    ) -> Option<DomainResult<SmokeRun>> {
        match self
            .harness
            .run_suite(target, scenarios, run.shutdown.as_mut())
            .await
        {
            Err(DomainError::Cancelled) => {
                run.cancelled = true;
                None
            }
            other => Some(other),
        }
    }

    // -----------------------------------------------------------------------
    // Learning
    // -----------------------------------------------------------------------

    /// Undo the previous iteration's fixes after a regression.
    async fn roll_back(&self, engine: &mut Engine, run: &mut RunState) -> DomainResult<()> {
        let from = run.iteration;
        let to = from - 1;
        let changed = run.snapshots.restore(to)?;
        let pending = std::mem::take(&mut run.pending);
        let reverted = pending.len();

        for p in pending {
            for &m in &p.mutation_indices {
                run.mutations[m].result = MutationResult::Reverted;
            }
            let fix = &mut run.fixes[p.fix_index];
            fix.reverted = true;
            engine.monitor.revert_repair(&p.constraint);
            engine.confidence.record(&p.signature, false);

            if fix.old_fragment.is_empty() || fix.new_fragment.is_empty() {
                continue;
            }
            let anti_pattern = AntiPattern::new(
                AntiPatternScope::Endpoint(fix.endpoint.clone()),
                fix.new_fragment.clone(),
                fix.old_fragment.clone(),
                format!("{} regressed the suite: {}", fix.fix_type, fix.description),
            )
            .with_target_file(fix.file_path.clone());
            if let Err(e) = engine.store.put_anti_pattern(&anti_pattern).await {
                warn!(error = %e, "Failed to store anti-pattern");
            }
        }
        engine.causal.forget_reverted(to);
        run.regressed = true;

        warn!(
            from_iteration = from,
            to_iteration = to,
            reverted_fixes = reverted,
            changed_files = changed.len(),
            "Regression detected, source tree rolled back"
        );
        self.emit(RepairEvent::RolledBack {
            from_iteration: from,
            to_iteration: to,
            reverted_fixes: reverted,
        })
        .await;
        Ok(())
    }

    /// Judge last iteration's fixes by whether their violation disappeared.
    async fn resolve_pending(&self, engine: &mut Engine, run: &mut RunState, violations: &[Violation]) {
        let still_failing: HashSet<String> = violations.iter().map(Violation::id).collect();
        for p in std::mem::take(&mut run.pending) {
            let fix = &run.fixes[p.fix_index];
            let resolved = !still_failing.contains(&fix.violation_id);
            let result = if resolved {
                MutationResult::Success
            } else {
                MutationResult::Failure
            };
            for &m in &p.mutation_indices {
                run.mutations[m].result = result;
            }
            engine.confidence.record(&p.signature, resolved);
            debug!(violation = %fix.violation_id, fix = %fix.fix_type, resolved, "Fix outcome measured");

            let learned = if resolved {
                if fix.origin == FixOrigin::Fallback || fix.old_fragment.is_empty() {
                    continue;
                }
                engine
                    .store
                    .put_successful_fix(&FixPattern {
                        key: p.key.clone(),
                        strategy_type: fix.strategy_type,
                        fix_type: fix.fix_type,
                        target_file: fix.file_path.clone(),
                        old_fragment: fix.old_fragment.clone(),
                        new_fragment: fix.new_fragment.clone(),
                        success_count: 1,
                        failure_count: 0,
                        updated_at: Utc::now(),
                    })
                    .await
            } else {
                engine.store.record_failed_fix(&p.key).await
            };
            if let Err(e) = learned {
                warn!(key = %p.key, error = %e, "Failed to update pattern store");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Repair
    // -----------------------------------------------------------------------

    #[instrument(skip_all, fields(iteration = run.iteration, violations = violations.len()))]
    async fn repair_phase(
        &self,
        engine: &mut Engine,
        run: &mut RunState,
        target: &TargetHandle,
        violations: &[Violation],
        raw_logs: &str,
    ) -> PhaseCounts {
        let mut counts = PhaseCounts::default();
        let mut deferred = Vec::new();
        let mut seen = HashSet::new();

        for violation in violations {
            let constraint = violation.id();
            if !seen.insert(constraint.clone()) {
                continue;
            }
            if run.shutdown_requested() {
                info!(iteration = run.iteration, "Cancellation requested, stopping repairs");
                break;
            }
            if counts.attempted >= self.config.max_repairs_per_iteration {
                run.note(&constraint, None, None, "Per-iteration repair limit reached");
                continue;
            }
            if !engine.monitor.can_repair(&constraint) {
                debug!(constraint = %constraint, "Constraint repair cap reached");
                let strategy = run.attempted_strategy(&constraint);
                run.note(
                    &constraint,
                    strategy,
                    None,
                    format!(
                        "Repair cap of {} fixes reached",
                        self.config.max_repairs_per_constraint
                    ),
                );
                continue;
            }
            counts.attempted += 1;
            if self.repair_violation(engine, run, violation).await {
                counts.written += 1;
            } else {
                deferred.push(violation.clone());
            }
        }

        if !deferred.is_empty() && !run.cancelled {
            counts.written += self
                .fallback_phase(engine, run, target, &deferred, raw_logs)
                .await;
        }
        counts
    }

    /// Try every deterministic source of a fix. Returns whether one was
    /// written.
    async fn repair_violation(&self, engine: &mut Engine, run: &mut RunState, violation: &Violation) -> bool {
        let key = FixPatternKey::new(
            &violation.error_kind,
            &violation.endpoint,
            violation.exception_kind(),
        );
        let trace = violation.stack_trace.as_ref();
        let classification = self.classifier.explain(violation, trace);
        let strategy = classification.strategy;
        debug!(
            violation = %violation.id(),
            strategy = %strategy,
            rule = ?classification.rule,
            "Violation classified"
        );

        if self.try_known_fix(engine, run, violation, &key).await {
            return true;
        }
        if self.try_anti_patterns(engine, run, violation, &key, strategy).await {
            return true;
        }

        if !run.deterministic {
            run.note(&violation.id(), Some(strategy), None, "No deterministic procedures for this framework");
            return false;
        }
        if !strategy.has_deterministic_procedure() {
            run.note(&violation.id(), Some(strategy), None, format!("No deterministic procedure for {strategy}"));
            return false;
        }

        let chain = engine.causal.attribute(violation);
        if let Some(constraint) = &chain.root_cause.constraint_id {
            let radius = engine.causal.graph().blast_radius(constraint);
            debug!(
                constraint = %constraint,
                co_affected = radius.co_affected.len(),
                risk = radius.risk_level.as_str(),
                "Blast radius"
            );
        }

        let sources = match run.tree.python_sources() {
            Ok(sources) => sources,
            Err(e) => {
                warn!(error = %e, "Failed to read application sources");
                run.note(&violation.id(), Some(strategy), None, e.to_string());
                return false;
            }
        };
        let locator = SourceLocator::new(sources);
        let ir = Arc::clone(&engine.ir);
        let candidates = RepairCandidateGenerator::new(&ir, &locator).generate(strategy, violation, trace);
        let ranked = self
            .ranker
            .rank(candidates, &chain, violation, &ir, &engine.confidence);
        let top = ranked.first().map(|c| c.confidence);

        let mut reason = format!("No applicable candidate for {strategy}");
        for candidate in ranked {
            if candidate.fix_type == FixType::Fallback {
                continue;
            }
            if candidate.target_file.as_os_str().is_empty() || !run.tree.exists(&candidate.target_file) {
                reason = format!("No source file located for {}", candidate.fix_type);
                continue;
            }
            let before = match run.tree.read(&candidate.target_file) {
                Ok(content) => content,
                Err(e) => {
                    reason = e.to_string();
                    continue;
                }
            };
            match repair_procedures::apply(&candidate, &before) {
                Ok(edit) => {
                    let proposal = Proposal {
                        path: candidate.target_file.clone(),
                        before,
                        edit,
                        fix_type: candidate.fix_type,
                        strategy: candidate.strategy_type,
                        origin: FixOrigin::Procedure,
                        description: candidate.description.clone(),
                        confidence: Some(candidate.confidence),
                    };
                    if self.commit(engine, run, violation, &key, proposal).await {
                        return true;
                    }
                    reason = format!("Failed to write {}", candidate.target_file.display());
                }
                Err(e @ (ProcedureError::AlreadyApplied(_) | ProcedureError::NotApplicable(_))) => {
                    debug!(fix = %candidate.fix_type, reason = %e, "Candidate skipped");
                    reason = e.to_string();
                }
                Err(e) => reason = e.to_string(),
            }
        }
        run.note(&violation.id(), Some(strategy), top, reason);
        false
    }

    async fn try_known_fix(
        &self,
        engine: &mut Engine,
        run: &mut RunState,
        violation: &Violation,
        key: &FixPatternKey,
    ) -> bool {
        let pattern = match engine.store.get_known_fix(key).await {
            Ok(Some(p)) if p.success_rate() >= self.config.known_fix_min_success_rate => p,
            Ok(_) => return false,
            Err(e) => {
                warn!(key = %key, error = %e, "Known-fix lookup failed");
                return false;
            }
        };
        let Ok(before) = run.tree.read(&pattern.target_file) else {
            return false;
        };
        if before.contains(&pattern.new_fragment) {
            return false;
        }
        let Some(mut edit) = replace_fragment(&before, &pattern.old_fragment, &pattern.new_fragment) else {
            return false;
        };
        edit.new_source = ensure_used_imports(&edit.new_source, &pattern.new_fragment);
        debug!(key = %key, success_rate = pattern.success_rate(), "Replaying known fix");
        let proposal = Proposal {
            path: pattern.target_file.clone(),
            before,
            edit,
            fix_type: pattern.fix_type,
            strategy: pattern.strategy_type,
            origin: FixOrigin::KnownFix,
            description: format!("Replay known {} fix for {key}", pattern.fix_type),
            confidence: Some(pattern.success_rate()),
        };
        self.commit(engine, run, violation, key, proposal).await
    }

    async fn try_anti_patterns(
        &self,
        engine: &mut Engine,
        run: &mut RunState,
        violation: &Violation,
        key: &FixPatternKey,
        strategy: StrategyType,
    ) -> bool {
        let mut scopes = vec![AntiPatternScope::Endpoint(violation.endpoint.clone())];
        if let Some(entity) = engine.causal.entity_for(violation) {
            scopes.push(AntiPatternScope::Entity(entity));
        }
        if let Some(kind) = violation.exception_kind() {
            scopes.push(AntiPatternScope::ExceptionKind(kind.to_string()));
        }

        for scope in scopes {
            let anti_patterns = match engine.store.get_anti_patterns(&scope).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(scope = scope.value(), error = %e, "Anti-pattern lookup failed");
                    continue;
                }
            };
            for anti_pattern in anti_patterns {
                let files: Vec<PathBuf> = match &anti_pattern.target_file {
                    Some(file) => vec![file.clone()],
                    None => run
                        .tree
                        .python_sources()
                        .map(|s| s.into_keys().map(PathBuf::from).collect())
                        .unwrap_or_default(),
                };
                for file in files {
                    let Ok(before) = run.tree.read(&file) else {
                        continue;
                    };
                    let Some(edit) = replace_fragment(
                        &before,
                        &anti_pattern.wrong_fragment,
                        &anti_pattern.correct_fragment,
                    ) else {
                        continue;
                    };
                    let proposal = Proposal {
                        path: file,
                        before,
                        edit,
                        fix_type: FixType::AntiPattern,
                        strategy,
                        origin: FixOrigin::AntiPattern,
                        description: format!("Undo known-bad fragment: {}", anti_pattern.description),
                        confidence: None,
                    };
                    if self.commit(engine, run, violation, key, proposal).await {
                        if let Err(e) = engine.store.increment_prevented(anti_pattern.id).await {
                            warn!(error = %e, "Failed to count prevented anti-pattern");
                        }
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Hand every deferred violation to the fallback repairer in one batch.
    /// Returns the number of fixes recorded as written.
    async fn fallback_phase(
        &self,
        engine: &mut Engine,
        run: &mut RunState,
        target: &TargetHandle,
        deferred: &[Violation],
        raw_logs: &str,
    ) -> usize {
        let fallback = match &self.fallback {
            Some(f) if self.config.use_fallback => Arc::clone(f),
            _ => {
                for v in deferred {
                    let strategy = run.attempted_strategy(&v.id()).unwrap_or(StrategyType::Generic);
                    run.record_failed_fix(v, strategy, FixOrigin::Fallback, "Fallback repair disabled");
                }
                return 0;
            }
        };

        let before = match run.tree.capture() {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Failed to capture tree before fallback repair");
                return 0;
            }
        };
        info!(violations = deferred.len(), "Delegating to fallback repairer");
        let outcome = match fallback.repair(deferred, raw_logs, target.root()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Fallback repairer failed");
                for v in deferred {
                    let strategy = run.attempted_strategy(&v.id()).unwrap_or(StrategyType::Generic);
                    run.record_failed_fix(v, strategy, FixOrigin::Fallback, &e.to_string());
                }
                return 0;
            }
        };
        if !outcome.success {
            info!(reason = %outcome.description, "Fallback repairer declined");
            for v in deferred {
                let strategy = run.attempted_strategy(&v.id()).unwrap_or(StrategyType::Generic);
                run.record_failed_fix(v, strategy, FixOrigin::Fallback, &outcome.description);
            }
            return 0;
        }

        let after = run.tree.capture().unwrap_or_default();
        let mut changed: Vec<&String> = after
            .iter()
            .filter(|(path, content)| before.get(*path) != Some(*content))
            .map(|(path, _)| path)
            .collect();
        changed.extend(before.keys().filter(|path| !after.contains_key(*path)));

        let first_mutation = run.mutations.len();
        let trigger = &deferred[0];
        for path in &changed {
            let old = before.get(*path).map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default();
            let new = after.get(*path).map(|b| String::from_utf8_lossy(b).into_owned()).unwrap_or_default();
            run.mutations.push(MutationRecord {
                iteration: run.iteration,
                file_path: PathBuf::from(path.as_str()),
                diff: line_diff(path, &old, &new),
                fix_type: FixType::Fallback,
                triggered_by_endpoint: trigger.endpoint.clone(),
                violation_id: trigger.id(),
                result: MutationResult::Pending,
                recorded_at: Utc::now(),
            });
        }
        let mutation_indices: Vec<usize> = (first_mutation..run.mutations.len()).collect();
        let file_path = outcome
            .repaired_files
            .first()
            .cloned()
            .or_else(|| changed.first().map(|p| PathBuf::from(p.as_str())))
            .unwrap_or_default();

        for v in deferred {
            let strategy = run.attempted_strategy(&v.id()).unwrap_or(StrategyType::Generic);
            let fix = RepairFix {
                file_path: file_path.clone(),
                fix_type: FixType::Fallback,
                strategy_type: strategy,
                origin: FixOrigin::Fallback,
                description: outcome.description.clone(),
                old_fragment: String::new(),
                new_fragment: String::new(),
                success: true,
                reverted: false,
                violation_id: v.id(),
                endpoint: v.endpoint.clone(),
                iteration: run.iteration,
                confidence: None,
                failure_reason: None,
            };
            let signature = format!("{strategy}:{}", FixType::Fallback);
            engine.monitor.record_repair(&v.id(), &signature);
            engine.causal.record_repair(fix.clone());
            run.fixes.push(fix);
            run.pending.push(PendingFix {
                fix_index: run.fixes.len() - 1,
                mutation_indices: mutation_indices.clone(),
                key: FixPatternKey::new(&v.error_kind, &v.endpoint, v.exception_kind()),
                constraint: v.id(),
                signature,
            });
            self.emit(RepairEvent::RepairApplied {
                iteration: run.iteration,
                violation_id: v.id(),
                strategy,
                file: file_path.display().to_string(),
                description: outcome.description.clone(),
            })
            .await;
        }
        info!(files = changed.len(), fixes = deferred.len(), "Fallback repair applied");
        deferred.len()
    }

    /// Write a proposal and record it. Returns whether the write succeeded.
    async fn commit(
        &self,
        engine: &mut Engine,
        run: &mut RunState,
        violation: &Violation,
        key: &FixPatternKey,
        proposal: Proposal,
    ) -> bool {
        let Proposal {
            path,
            before,
            edit,
            fix_type,
            strategy,
            origin,
            description,
            confidence,
        } = proposal;
        let shown = path.to_string_lossy().into_owned();
        let failure_reason = run
            .tree
            .write(&path, &edit.new_source)
            .err()
            .map(|e| {
                DomainError::RepairApplication {
                    path: path.clone(),
                    reason: e.to_string(),
                }
                .to_string()
            });
        let success = failure_reason.is_none();

        let fix = RepairFix {
            file_path: path.clone(),
            fix_type,
            strategy_type: strategy,
            origin,
            description: description.clone(),
            old_fragment: edit.old_fragment,
            new_fragment: edit.new_fragment,
            success,
            reverted: false,
            violation_id: violation.id(),
            endpoint: violation.endpoint.clone(),
            iteration: run.iteration,
            confidence,
            failure_reason: failure_reason.clone(),
        };
        run.mutations.push(MutationRecord {
            iteration: run.iteration,
            file_path: path,
            diff: line_diff(&shown, &before, &edit.new_source),
            fix_type,
            triggered_by_endpoint: violation.endpoint.clone(),
            violation_id: violation.id(),
            result: if success {
                MutationResult::Pending
            } else {
                MutationResult::Failure
            },
            recorded_at: Utc::now(),
        });
        run.fixes.push(fix.clone());

        if let Some(reason) = failure_reason {
            warn!(file = %shown, reason = %reason, "Failed to write repair");
            run.note(&violation.id(), Some(strategy), confidence, reason);
            return false;
        }

        let signature = format!("{strategy}:{fix_type}");
        engine.monitor.record_repair(&violation.id(), &signature);
        engine.causal.record_repair(fix);
        run.pending.push(PendingFix {
            fix_index: run.fixes.len() - 1,
            mutation_indices: vec![run.mutations.len() - 1],
            key: key.clone(),
            constraint: violation.id(),
            signature,
        });
        run.note(&violation.id(), Some(strategy), confidence, format!("{fix_type} applied but violation persisted"));

        info!(
            iteration = run.iteration,
            endpoint = %violation.endpoint,
            strategy = %strategy,
            fix = %fix_type,
            file = %shown,
            "Repair applied"
        );
        self.emit(RepairEvent::RepairApplied {
            iteration: run.iteration,
            violation_id: violation.id(),
            strategy,
            file: shown,
            description,
        })
        .await;
        true
    }

    // -----------------------------------------------------------------------
    // Report
    // -----------------------------------------------------------------------

    fn finish(engine: &Engine, mut run: RunState, status: RepairStatus) -> SmokeRepairResult {
        let initial_pass_rate = run.initial_pass_rate.unwrap_or(0.0);
        let final_pass_rate = if run.regressed {
            engine.monitor.effective_pass_rate()
        } else {
            run.iterations.last().map(|r| r.pass_rate)
        }
        .unwrap_or(initial_pass_rate);

        // After a rollback the tree matches the iteration before the last.
        let effective = if run.regressed {
            run.iterations.iter().rev().nth(1)
        } else {
            run.iterations.last()
        };
        let mut seen = HashSet::new();
        let unresolved = effective
            .map(|r| r.violations.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|v| seen.insert(v.id()))
            .map(|v| {
                let attempt = run.attempts.get(&v.id()).cloned().unwrap_or(Attempt {
                    strategy: None,
                    confidence: None,
                    reason: format!("Run ended with status {status} before a repair was attempted"),
                });
                UnresolvedViolation {
                    violation: v.clone(),
                    strategy: attempt.strategy,
                    confidence: attempt.confidence,
                    reason: attempt.reason,
                }
            })
            .collect();

        run.snapshots.gc();
        let total_repairs = run.fixes.iter().filter(|f| f.success && !f.reverted).count();

        SmokeRepairResult {
            status,
            initial_pass_rate,
            final_pass_rate,
            target_reached: status == RepairStatus::TargetReached,
            total_repairs,
            convergence_detected: status == RepairStatus::Converged,
            regression_detected: run.regressed,
            cycle_detected: status == RepairStatus::CycleDetected,
            iterations: run.iterations,
            fixes_applied: run.fixes,
            mutations: run.mutations,
            unresolved,
        }
    }

    async fn emit(&self, event: RepairEvent) {
        if let Some(tx) = &self.event_tx {
            if tx.send(event).await.is_err() {
                debug!("Repair event receiver dropped");
            }
        }
    }
}


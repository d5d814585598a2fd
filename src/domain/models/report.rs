//! The terminal run report and the per-iteration progress stream.

use serde::{Deserialize, Serialize};

use super::convergence::RepairStatus;
use super::repair::{MutationRecord, RepairFix};
use super::strategy::StrategyType;
use super::violation::Violation;

/// Structured progress event emitted once per iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationProgress {
    /// 1-based iteration number.
    pub iteration: u32,
    /// Fraction of scenarios that passed, 0.0 to 1.0.
    pub pass_rate: f64,
    /// Violations still failing after this iteration's smoke run.
    pub violations_count: usize,
    /// Fixes written during the iteration.
    pub repairs_applied: usize,
    /// Fixes whose targeted violation disappeared on the next run.
    pub repairs_successful: usize,
    /// Wall-clock time of the iteration.
    pub duration_ms: u64,
}

/// Events streamed to an observability or notification layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepairEvent {
    /// A run began against the application at `app_path`.
    RunStarted {
        /// Application root.
        app_path: String,
        /// Number of scenarios in the suite.
        scenario_count: usize,
    },
    /// An iteration finished.
    IterationCompleted(IterationProgress),
    /// A fix was written to the source tree.
    RepairApplied {
        /// Iteration that applied the fix.
        iteration: u32,
        /// Violation the fix targeted.
        violation_id: String,
        /// Strategy the violation was classified under.
        strategy: StrategyType,
        /// Patched file, relative to the application root.
        file: String,
        /// Human-readable description of the change.
        description: String,
    },
    /// The tree was restored to an earlier snapshot.
    RolledBack {
        /// Iteration whose changes were undone.
        from_iteration: u32,
        /// Iteration whose snapshot was restored.
        to_iteration: u32,
        /// Number of fixes marked reverted.
        reverted_fixes: usize,
    },
    /// The run terminated.
    RunFinished {
        /// Terminal status.
        status: RepairStatus,
        /// Pass rate of the last measured iteration.
        final_pass_rate: f64,
    },
}

/// Summary of one loop iteration, kept on the final report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number.
    pub iteration: u32,
    /// Fraction of scenarios that passed.
    pub pass_rate: f64,
    /// Violations observed in this iteration's smoke run.
    pub violations: Vec<Violation>,
    /// Fixes written during the iteration.
    pub repairs_applied: usize,
    /// Fixes confirmed by the following run.
    pub repairs_successful: usize,
    /// Whether the service failed to start for this iteration.
    pub startup_failed: bool,
    /// Whether the post-repair rebuild failed.
    pub rebuild_failed: bool,
    /// Wall-clock time of the iteration.
    pub duration_ms: u64,
}

impl IterationRecord {
    /// The streamed progress view of this record.
    pub fn progress(&self) -> IterationProgress {
        IterationProgress {
            iteration: self.iteration,
            pass_rate: self.pass_rate,
            violations_count: self.violations.len(),
            repairs_applied: self.repairs_applied,
            repairs_successful: self.repairs_successful,
            duration_ms: self.duration_ms,
        }
    }
}

/// A violation that was still failing when the run ended, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedViolation {
    /// The failing violation as last observed.
    pub violation: Violation,
    /// Strategy last attempted, if classification ran.
    pub strategy: Option<StrategyType>,
    /// Confidence of the last applied candidate, if any.
    pub confidence: Option<f64>,
    /// Why the loop gave up on it (repair cap, no candidate, ...).
    pub reason: String,
}

/// The terminal report of a repair run. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeRepairResult {
    /// How the run terminated.
    pub status: RepairStatus,
    /// Pass rate of the first smoke run.
    pub initial_pass_rate: f64,
    /// Pass rate of the last measured run, after any rollback.
    pub final_pass_rate: f64,
    /// Per-iteration history.
    pub iterations: Vec<IterationRecord>,
    /// Whether `final_pass_rate` met the configured target.
    pub target_reached: bool,
    /// Fixes written and not reverted.
    pub total_repairs: usize,
    /// The run stopped because the pass rate plateaued.
    pub convergence_detected: bool,
    /// At least one iteration lowered the pass rate.
    pub regression_detected: bool,
    /// The run stopped on a repeated violation set.
    pub cycle_detected: bool,
    /// Every attempted fix, including failed and reverted ones.
    pub fixes_applied: Vec<RepairFix>,
    /// Audit log of source mutations, in write order.
    pub mutations: Vec<MutationRecord>,
    /// Violations still failing at the end of the run.
    pub unresolved: Vec<UnresolvedViolation>,
}

impl SmokeRepairResult {
    /// Human-readable one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{}: pass rate {:.1}% -> {:.1}% in {} iteration(s), {} repair(s), {} unresolved",
            self.status,
            self.initial_pass_rate * 100.0,
            self.final_pass_rate * 100.0,
            self.iterations.len(),
            self.total_repairs,
            self.unresolved.len()
        )
    }
}

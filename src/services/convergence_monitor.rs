//! Loop-termination bookkeeping for the repair orchestrator.
//!
//! After each smoke run the monitor records the pass rate and the set of
//! violated constraints, then decides the transition. Checks run in a fixed
//! order: target reached, regression, sub-epsilon delta, cycle, iteration
//! budget.
//!
//! The monitor also caps how often any one constraint may be repaired.
//! `record_repair` counts an applied fix against its constraint and
//! `revert_repair` gives the slot back when a rollback undoes it, so a
//! constraint that keeps failing is eventually left alone instead of being
//! patched forever.
//!
//! ```text
//! record_iteration(0.40, {a, b, c})  -> Continue
//! record_iteration(0.55, {a, b})     -> Continue
//! record_iteration(0.55, {a, c})     -> Stop(Converged)   |0.55 - 0.55| < epsilon
//! ```

use std::collections::BTreeSet;

use tracing::debug;

use crate::domain::models::{ConvergenceState, RepairConfig, RepairStatus};

/// Outcome of recording an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Run another repair iteration.
    Continue,
    /// Terminate with the given status.
    Stop(RepairStatus),
}

impl Verdict {
    /// The repair status this verdict reports; `Running` while continuing.
    pub fn status(&self) -> RepairStatus {
        match self {
            Self::Continue => RepairStatus::Running,
            Self::Stop(status) => *status,
        }
    }
}

/// Tracks pass rates, violation sets and per-constraint repair counts for one
/// repair run, and decides when the loop stops.
///
/// Thresholds are copied out of [`RepairConfig`] at construction; the
/// accumulated history lives in a [`ConvergenceState`] that the orchestrator
/// persists with the run.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    target_pass_rate: f64,
    epsilon: f64,
    max_iterations: u32,
    max_repairs_per_constraint: u32,
    state: ConvergenceState,
}

impl ConvergenceMonitor {
    /// A monitor with empty history and the thresholds from `config`.
    pub fn new(config: &RepairConfig) -> Self {
        Self {
            target_pass_rate: config.target_pass_rate,
            epsilon: config.convergence_epsilon,
            max_iterations: config.max_iterations,
            max_repairs_per_constraint: config.max_repairs_per_constraint,
            state: ConvergenceState::default(),
        }
    }

    /// History recorded so far.
    pub fn state(&self) -> &ConvergenceState {
        &self.state
    }

    /// Record the outcome of iteration `state.iteration + 1` and decide.
    pub fn record_iteration(&mut self, pass_rate: f64, violated: BTreeSet<String>) -> Verdict {
        self.state.iteration += 1;
        self.state.pass_rates.push(pass_rate);
        self.state.violation_sets_per_iteration.push(violated);

        let verdict = self.decide();
        debug!(
            iteration = self.state.iteration,
            pass_rate,
            verdict = %verdict.status(),
            "Convergence check"
        );
        verdict
    }

    fn decide(&self) -> Verdict {
        let Some(current) = self.state.last_pass_rate() else {
            return Verdict::Continue;
        };

        if current >= self.target_pass_rate {
            return Verdict::Stop(RepairStatus::TargetReached);
        }

        if let Some(previous) = self.state.previous_pass_rate() {
            if current + f64::EPSILON < previous {
                return Verdict::Stop(RepairStatus::Regressed);
            }
            if (current - previous).abs() < self.epsilon {
                return Verdict::Stop(RepairStatus::Converged);
            }
        }

        if self.is_cycling() {
            return Verdict::Stop(RepairStatus::CycleDetected);
        }

        if self.state.iteration >= self.max_iterations {
            return Verdict::Stop(RepairStatus::IterationLimit);
        }

        Verdict::Continue
    }

    /// The violation set of the latest iteration equals the one two
    /// iterations earlier (`A, B, A` or `A, A, A`).
    fn is_cycling(&self) -> bool {
        let sets = &self.state.violation_sets_per_iteration;
        let n = sets.len();
        n >= 3 && !sets[n - 1].is_empty() && sets[n - 1] == sets[n - 3]
    }

    /// Whether `constraint` may receive another fix.
    pub fn can_repair(&self, constraint: &str) -> bool {
        self.state.repairs_for(constraint) < self.max_repairs_per_constraint
    }

    /// Count an applied fix against `constraint` and append its signature to
    /// the repair sequence.
    pub fn record_repair(&mut self, constraint: &str, signature: &str) {
        *self
            .state
            .repairs_per_constraint
            .entry(constraint.to_string())
            .or_insert(0) += 1;
        self.state.repair_sequence.push(signature.to_string());
    }

    /// Undo a repair count after its fix was rolled back.
    pub fn revert_repair(&mut self, constraint: &str) {
        if let Some(count) = self.state.repairs_per_constraint.get_mut(constraint) {
            *count = count.saturating_sub(1);
        }
    }

    /// Treat the latest iteration as not having happened for regression
    /// purposes: after a rollback the previous pass rate is authoritative.
    pub fn effective_pass_rate(&self) -> Option<f64> {
        self.state.last_pass_rate().map(|last| {
            self.state
                .previous_pass_rate()
                .filter(|prev| last < *prev)
                .unwrap_or(last)
        })
    }
}

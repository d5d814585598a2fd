//! Convergence bookkeeping for the repair loop.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum fixes any single constraint may receive in one run.
pub const MAX_REPAIRS_PER_CONSTRAINT: u32 = 2;

/// State of a repair run. Every variant except `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairStatus {
    /// The loop is still iterating.
    Running,
    /// The pass rate met the configured target.
    TargetReached,
    /// The pass rate changed by less than epsilon between iterations.
    Converged,
    /// The pass rate dropped; the tree was rolled back.
    Regressed,
    /// The violation set repeated with one iteration in between.
    CycleDetected,
    /// The iteration budget ran out.
    IterationLimit,
    /// Operator abort; the tree is left at the last completed write.
    Cancelled,
}

impl RepairStatus {
    /// Whether the run has stopped.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Wire name, e.g. `TARGET_REACHED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::TargetReached => "TARGET_REACHED",
            Self::Converged => "CONVERGED",
            Self::Regressed => "REGRESSED",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::IterationLimit => "ITERATION_LIMIT",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Iteration history tracked by the convergence monitor.
///
/// Invariant: `repairs_per_constraint[c] <= max_repairs_per_constraint` is
/// checked before any repair for `c` is accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvergenceState {
    /// Number of iterations recorded so far.
    pub iteration: u32,
    /// Pass rate of each recorded iteration.
    pub pass_rates: Vec<f64>,
    /// Violation signatures of each recorded iteration.
    pub violation_sets_per_iteration: Vec<BTreeSet<String>>,
    /// Non-reverted repairs accepted per constraint.
    pub repairs_per_constraint: HashMap<String, u32>,
    /// Constraint ids in the order repairs were accepted.
    pub repair_sequence: Vec<String>,
}

impl ConvergenceState {
    /// Pass rate of the latest iteration.
    pub fn last_pass_rate(&self) -> Option<f64> {
        self.pass_rates.last().copied()
    }

    /// Pass rate of the iteration before the latest.
    pub fn previous_pass_rate(&self) -> Option<f64> {
        self.pass_rates.iter().rev().nth(1).copied()
    }

    /// Repairs currently counted against `constraint`.
    pub fn repairs_for(&self, constraint: &str) -> u32 {
        self.repairs_per_constraint
            .get(constraint)
            .copied()
            .unwrap_or(0)
    }
}

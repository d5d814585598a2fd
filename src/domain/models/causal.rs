//! Causal attribution of a violation to its likely business-rule root cause.

use serde::{Deserialize, Serialize};

use super::repair::RepairFix;
use super::strategy::StrategyType;

/// Coarse classification of a root cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseKind {
    /// A precondition check is absent from the handler.
    MissingGuard,
    /// An action was attempted from a state that does not allow it.
    InvalidTransition,
    /// A referenced record, route, or symbol does not exist.
    ReferenceMissing,
    /// A field-level constraint from the IR was violated.
    IrConstraint,
    /// No rule could attribute the violation.
    Unknown,
}

impl CauseKind {
    /// The strategy the ranker prefers when breaking ties for this cause.
    pub fn preferred_strategy(&self) -> Option<StrategyType> {
        match self {
            Self::MissingGuard | Self::InvalidTransition => Some(StrategyType::ServiceLogic),
            Self::ReferenceMissing => Some(StrategyType::Route),
            Self::IrConstraint => Some(StrategyType::Database),
            Self::Unknown => None,
        }
    }
}

/// The inferred root-cause node of a violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CauseNode {
    /// What kind of cause this is.
    pub kind: CauseKind,
    /// Entity the cause is attached to, when known.
    pub entity: Option<String>,
    /// Constraint-graph node id, when the IR names the rule.
    pub constraint_id: Option<String>,
    /// Human-readable explanation.
    pub description: String,
    /// Strength of the attribution (0.0 -- 1.0).
    pub confidence: f64,
}

impl CauseNode {
    /// Placeholder cause with zero confidence.
    pub fn unknown() -> Self {
        Self {
            kind: CauseKind::Unknown,
            entity: None,
            constraint_id: None,
            description: "No root cause identified".to_string(),
            confidence: 0.0,
        }
    }
}

/// Link from one violation to its inferred root cause and to earlier
/// repairs that touched the same entity or endpoint.
///
/// Built fresh per violation and used only to bias ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalChain {
    /// Violation the chain explains.
    pub violation_id: String,
    /// Most likely cause.
    pub root_cause: CauseNode,
    /// Earlier fixes in this run that touched the same scope.
    pub prior_related_repairs: Vec<RepairFix>,
}

impl CausalChain {
    /// Strategy inferred from the root cause, if any.
    pub fn inferred_strategy(&self) -> Option<StrategyType> {
        self.root_cause.kind.preferred_strategy()
    }
}

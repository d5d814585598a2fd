//! Repair candidates, applied fixes, and the mutation audit log.

use std::fmt;
use std::str::FromStr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::strategy::StrategyType;
use super::violation::HttpMethod;

// ---------------------------------------------------------------------------
// FixType
// ---------------------------------------------------------------------------

/// The concrete source mutation a fix performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    /// Mark an entity column nullable.
    MakeNullable,
    /// Add `ondelete="CASCADE"` to a foreign key.
    AddCascade,
    /// Give a column a default value.
    AddDefault,
    /// Relax a required request-schema field to optional.
    RelaxRequired,
    /// Synthesize a missing route handler.
    AddHandler,
    /// Guard against requesting more than the available stock.
    StockGuard,
    /// Guard against an invalid status transition.
    StatusTransitionGuard,
    /// Guard against acting on an empty collection.
    EmptyCollectionGuard,
    /// Guard against a missing referenced record.
    ExistenceGuard,
    /// Add a missing import for an undefined name.
    AddImport,
    /// Replace a subscript lookup with a `.get()` lookup.
    SafeKeyAccess,
    /// Literal replacement replayed from the known-fix cache.
    KnownFix,
    /// Literal replacement from the learned anti-pattern store.
    AntiPattern,
    /// Delegated to the external fallback repairer.
    Fallback,
}

impl FixType {
    /// Every fix type, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::MakeNullable,
        Self::AddCascade,
        Self::AddDefault,
        Self::RelaxRequired,
        Self::AddHandler,
        Self::StockGuard,
        Self::StatusTransitionGuard,
        Self::EmptyCollectionGuard,
        Self::ExistenceGuard,
        Self::AddImport,
        Self::SafeKeyAccess,
        Self::KnownFix,
        Self::AntiPattern,
        Self::Fallback,
    ];

    /// Stable snake_case name used in storage and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MakeNullable => "make_nullable",
            Self::AddCascade => "add_cascade",
            Self::AddDefault => "add_default",
            Self::RelaxRequired => "relax_required",
            Self::AddHandler => "add_handler",
            Self::StockGuard => "stock_guard",
            Self::StatusTransitionGuard => "status_transition_guard",
            Self::EmptyCollectionGuard => "empty_collection_guard",
            Self::ExistenceGuard => "existence_guard",
            Self::AddImport => "add_import",
            Self::SafeKeyAccess => "safe_key_access",
            Self::KnownFix => "known_fix",
            Self::AntiPattern => "anti_pattern",
            Self::Fallback => "fallback",
        }
    }

    /// Whether this fix injects a guard clause into service logic.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            Self::StockGuard
                | Self::StatusTransitionGuard
                | Self::EmptyCollectionGuard
                | Self::ExistenceGuard
        )
    }
}

impl fmt::Display for FixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FixType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|ft| ft.as_str() == normalized)
            .ok_or_else(|| format!("Unknown fix type: {s}"))
    }
}

// ---------------------------------------------------------------------------
// RepairCandidate
// ---------------------------------------------------------------------------

/// One possible fix for a violation. Ephemeral: generated, ranked, and
/// discarded within a single iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairCandidate {
    /// Strategy the violation was classified under.
    pub strategy_type: StrategyType,
    /// Mutation the candidate would perform.
    pub fix_type: FixType,
    /// Path relative to the application root.
    pub target_file: PathBuf,
    /// Human-readable description, also used for semantic scoring.
    pub description: String,
    /// Procedure-specific parameters (field name, verb, table, ...).
    pub params: CandidateParams,
    /// Historical success of this fix signature (0.0 -- 1.0).
    pub pattern_score: f64,
    /// Whether the IR supports this fix for the endpoint (0.0 -- 1.0).
    pub ir_context_score: f64,
    /// Textual similarity between description and violation (0.0 -- 1.0).
    pub semantic_score: f64,
    /// Weighted combination, filled in by the ranker.
    pub confidence: f64,
}

impl RepairCandidate {
    /// An unscored candidate with empty parameters.
    pub fn new(
        strategy_type: StrategyType,
        fix_type: FixType,
        target_file: impl Into<PathBuf>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            strategy_type,
            fix_type,
            target_file: target_file.into(),
            description: description.into(),
            params: CandidateParams::default(),
            pattern_score: 0.0,
            ir_context_score: 0.0,
            semantic_score: 0.0,
            confidence: 0.0,
        }
    }

    /// Replace the candidate's parameters.
    pub fn with_params(mut self, params: CandidateParams) -> Self {
        self.params = params;
        self
    }

    /// Signature under which the ranker tracks historical success.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.strategy_type, self.fix_type)
    }
}

/// Parameters a repair procedure needs to locate its insertion point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateParams {
    /// Entity (class) name, e.g. `Product`.
    pub entity: Option<String>,
    /// Table name from a database error, e.g. `products`.
    pub table: Option<String>,
    /// Field / column name.
    pub field: Option<String>,
    /// Function to patch (`add_item`, `checkout`, ...).
    pub function: Option<String>,
    /// Undefined name or missing key.
    pub symbol: Option<String>,
    /// Source line from a trace.
    pub line: Option<u32>,
    /// States from which the action is allowed, for transition guards.
    pub allowed_states: Vec<String>,
    /// Route to synthesize, for missing handlers.
    pub method: Option<HttpMethod>,
    /// Route path to synthesize.
    pub path: Option<String>,
    /// Status code the synthesized handler returns.
    pub status: Option<u16>,
}

// ---------------------------------------------------------------------------
// RepairFix
// ---------------------------------------------------------------------------

/// Where an applied fix came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixOrigin {
    /// Replayed from the known-fix cache.
    KnownFix,
    /// Replayed from the anti-pattern store.
    AntiPattern,
    /// Produced by a built-in repair procedure.
    Procedure,
    /// Produced by the external fallback repairer.
    Fallback,
}

/// Durable record of an applied (or attempted) mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairFix {
    /// Patched file, relative to the application root.
    pub file_path: PathBuf,
    /// Mutation performed.
    pub fix_type: FixType,
    /// Strategy of the targeted violation.
    pub strategy_type: StrategyType,
    /// Which source produced the fix.
    pub origin: FixOrigin,
    /// Human-readable description.
    pub description: String,
    /// Text that was replaced.
    pub old_fragment: String,
    /// Text written in its place.
    pub new_fragment: String,
    /// Whether the mutation was written.
    pub success: bool,
    /// Set when a later rollback undid this fix.
    pub reverted: bool,
    /// The violation (by id) this fix targeted.
    pub violation_id: String,
    /// Endpoint of the targeted violation, as `METHOD /path`.
    pub endpoint: String,
    /// Iteration that applied the fix.
    pub iteration: u32,
    /// Confidence of the candidate that produced the fix, when ranked.
    pub confidence: Option<f64>,
    /// Why the fix could not be applied, when `success` is false.
    pub failure_reason: Option<String>,
}

// ---------------------------------------------------------------------------
// MutationRecord
// ---------------------------------------------------------------------------

/// Result of a mutation as known to the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationResult {
    /// Applied; the next iteration has not measured it yet.
    Pending,
    /// The targeted violation disappeared on the next run.
    Success,
    /// The targeted violation persisted, or the write failed.
    Failure,
    /// Undone by a rollback.
    Reverted,
}

/// Append-only audit entry for one source mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Iteration that wrote the mutation.
    pub iteration: u32,
    /// Mutated file, relative to the application root.
    pub file_path: PathBuf,
    /// Line diff between old and new file content.
    pub diff: String,
    /// Mutation performed.
    pub fix_type: FixType,
    /// Endpoint whose violation triggered the mutation.
    pub triggered_by_endpoint: String,
    /// Violation the mutation targeted.
    pub violation_id: String,
    /// Measured outcome, updated after the next iteration.
    pub result: MutationResult,
    /// When the mutation was written.
    pub recorded_at: DateTime<Utc>,
}

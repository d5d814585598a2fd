pub mod causal;
pub mod config;
pub mod convergence;
pub mod ir;
pub mod pattern;
pub mod repair;
pub mod report;
pub mod scenario;
pub mod snapshot;
pub mod strategy;
pub mod target;
pub mod violation;

pub use causal::{CausalChain, CauseKind, CauseNode};
pub use config::{
    Config, DatabaseConfig, FallbackConfig, LoggingConfig, RankingWeights, RepairConfig,
    RuntimeConfig, RuntimeMode,
};
pub use convergence::{ConvergenceState, RepairStatus, MAX_REPAIRS_PER_CONSTRAINT};
pub use ir::{ApplicationIr, EndpointDef, EntityDef, FieldDef, FlowDef, TransitionDef};
pub use pattern::{AntiPattern, AntiPatternScope, FixPattern, FixPatternKey};
pub use repair::{
    CandidateParams, FixOrigin, FixType, MutationRecord, MutationResult, RepairCandidate,
    RepairFix,
};
pub use report::{
    IterationProgress, IterationRecord, RepairEvent, SmokeRepairResult, UnresolvedViolation,
};
pub use scenario::{ExtractRule, FieldSpec, Scenario, ScenarioResult, ScenarioStep, SmokeRun};
pub use snapshot::Snapshot;
pub use strategy::StrategyType;
pub use target::TargetHandle;
pub use violation::{HttpMethod, StackTrace, Violation};

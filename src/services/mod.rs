//! Repair engine services: diagnosis, ranking, procedures and the loop.

pub mod candidate_generator;
pub mod causal_chain;
pub mod confidence_ranker;
pub mod constraint_graph;
pub mod convergence_monitor;
pub mod failure_classifier;
pub mod log_parser;
pub mod repair_orchestrator;
pub mod repair_procedures;
pub mod runtime_harness;
pub mod snapshot_manager;
pub mod source_locator;
pub mod source_tree;

pub use candidate_generator::RepairCandidateGenerator;
pub use causal_chain::CausalChainBuilder;
pub use confidence_ranker::{ConfidenceModel, ConfidenceRanker};
pub use constraint_graph::{BlastRadius, ConstraintGraph, RiskLevel};
pub use convergence_monitor::{ConvergenceMonitor, Verdict};
pub use failure_classifier::{Classification, ClassificationRule, FailureClassifier};
pub use log_parser::LogParser;
pub use repair_orchestrator::{Engine, RepairOrchestrator};
pub use runtime_harness::{RuntimeHarness, ScenarioExecutor};
pub use snapshot_manager::SnapshotManager;
pub use source_locator::SourceLocator;
pub use source_tree::SourceTree;

//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - PatternStore: cross-run known fixes and anti-patterns
//! - FallbackRepairer: external LLM-powered repair
//! - ApplicationRuntime: start/stop/rebuild of the target service
//! - SmokeHarness: full smoke-suite execution against a live instance
//! - ScenarioSource: where scenarios come from
//!
//! These traits define the contracts that keep the repair core independent
//! of specific infrastructure implementations.

pub mod fallback_repairer;
pub mod pattern_store;
pub mod runtime;
pub mod scenario_source;

pub use fallback_repairer::{FallbackOutcome, FallbackRepairer};
pub use pattern_store::PatternStore;
pub use runtime::{wait_for_shutdown, ApplicationRuntime, LogBuffer, RuntimeHandle, SmokeHarness};
pub use scenario_source::ScenarioSource;

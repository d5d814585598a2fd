//! Patchloop - smoke-driven repair engine
//!
//! Patchloop runs a generated backend service, exercises it with smoke
//! scenarios, diagnoses every failing scenario from its HTTP outcome and the
//! service's stack traces, and applies targeted source repairs until the pass
//! rate reaches a target, stops improving, regresses, or cycles.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models and the port traits
//! - **Service Layer** (`services`): diagnosis, candidate generation and
//!   ranking, repair procedures, snapshots, and the repair orchestrator
//! - **Adapters** (`adapters`): SQLite and in-memory pattern stores, process
//!   and compose runtimes, scenario sources, the HTTP fallback repairer
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use patchloop::adapters::memory::InMemoryPatternStore;
//! use patchloop::adapters::runtime::ProcessRuntime;
//! use patchloop::services::{Engine, RepairOrchestrator, RuntimeHarness};
//!
//! let config = patchloop::Config::default();
//! let ir = Arc::new(patchloop::ApplicationIr::default());
//! let harness = RuntimeHarness::new(ProcessRuntime::new(config.runtime.clone())?, &config.runtime, ir.clone())?;
//! let mut engine = Engine::new(&config.repair, ir, Arc::new(InMemoryPatternStore::default()));
//! let report = RepairOrchestrator::new(Arc::new(harness), config.repair)
//!     .run(&mut engine, &target, &scenarios, None)
//!     .await?;
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    ApplicationIr, Config, RepairConfig, RepairStatus, Scenario, SmokeRepairResult, StrategyType,
    TargetHandle, Violation,
};
pub use domain::ports::{FallbackRepairer, PatternStore, ScenarioSource, SmokeHarness};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Engine, RepairOrchestrator};

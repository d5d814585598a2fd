//! Configuration model shared by the CLI, the loader and the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Main configuration structure for Patchloop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Repair loop configuration
    #[serde(default)]
    pub repair: RepairConfig,

    /// Target runtime configuration
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Pattern store database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Fallback (LLM-powered) repair configuration
    #[serde(default)]
    pub fallback: FallbackConfig,
}

/// Repair loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RepairConfig {
    /// Iteration budget for one run
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Pass rate at which the run stops successfully (0.0 - 1.0]
    #[serde(default = "default_target_pass_rate")]
    pub target_pass_rate: f64,

    /// Minimum pass-rate improvement per iteration before the run is
    /// considered converged
    #[serde(default = "default_convergence_epsilon")]
    pub convergence_epsilon: f64,

    /// Fixes any single constraint may receive per run
    #[serde(default = "default_max_repairs_per_constraint")]
    pub max_repairs_per_constraint: u32,

    /// Upper bound on fixes applied within one iteration
    #[serde(default = "default_max_repairs_per_iteration")]
    pub max_repairs_per_iteration: usize,

    /// Minimum historical success rate for replaying a known fix
    #[serde(default = "default_known_fix_min_success_rate")]
    pub known_fix_min_success_rate: f64,

    /// Hand unrepairable violations to the fallback repairer
    #[serde(default = "default_true")]
    pub use_fallback: bool,

    /// Candidate ranking weights
    #[serde(default)]
    pub ranking: RankingWeights,
}

const fn default_max_iterations() -> u32 {
    10
}

const fn default_target_pass_rate() -> f64 {
    1.0
}

const fn default_convergence_epsilon() -> f64 {
    0.01
}

const fn default_max_repairs_per_constraint() -> u32 {
    crate::domain::models::convergence::MAX_REPAIRS_PER_CONSTRAINT
}

const fn default_max_repairs_per_iteration() -> usize {
    20
}

const fn default_known_fix_min_success_rate() -> f64 {
    0.7
}

const fn default_true() -> bool {
    true
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            target_pass_rate: default_target_pass_rate(),
            convergence_epsilon: default_convergence_epsilon(),
            max_repairs_per_constraint: default_max_repairs_per_constraint(),
            max_repairs_per_iteration: default_max_repairs_per_iteration(),
            known_fix_min_success_rate: default_known_fix_min_success_rate(),
            use_fallback: true,
            ranking: RankingWeights::default(),
        }
    }
}

/// Weights of the three candidate scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RankingWeights {
    /// Weight of historical success
    #[serde(default = "default_pattern_weight")]
    pub pattern: f64,
    /// Weight of IR support for the fix
    #[serde(default = "default_ir_context_weight")]
    pub ir_context: f64,
    /// Weight of description similarity
    #[serde(default = "default_semantic_weight")]
    pub semantic: f64,
}

const fn default_pattern_weight() -> f64 {
    0.40
}

const fn default_ir_context_weight() -> f64 {
    0.35
}

const fn default_semantic_weight() -> f64 {
    0.25
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            pattern: default_pattern_weight(),
            ir_context: default_ir_context_weight(),
            semantic: default_semantic_weight(),
        }
    }
}

/// How the target service is run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// A local child process
    Process,
    /// A docker compose project
    Compose,
}

/// Target runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// How the target is started: process or compose
    #[serde(default = "default_runtime_mode")]
    pub mode: RuntimeMode,

    /// Shell command that starts the service (process mode)
    #[serde(default = "default_start_command")]
    pub start_command: String,

    /// Shell command that rebuilds the service after repairs, if needed
    #[serde(default)]
    pub rebuild_command: Option<String>,

    /// Base URL the service listens on
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path polled until the service answers
    #[serde(default = "default_readiness_path")]
    pub readiness_path: String,

    /// Seconds to wait for the readiness path
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Seconds allowed for the rebuild command
    #[serde(default = "default_rebuild_timeout_secs")]
    pub rebuild_timeout_secs: u64,

    /// Scenarios executed concurrently
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Readiness poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Extra environment variables for the service process
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

const fn default_runtime_mode() -> RuntimeMode {
    RuntimeMode::Process
}

fn default_start_command() -> String {
    "uvicorn app.main:app --host 127.0.0.1 --port 8000".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_readiness_path() -> String {
    "/health".to_string()
}

const fn default_startup_timeout_secs() -> u64 {
    30
}

const fn default_request_timeout_secs() -> u64 {
    10
}

const fn default_rebuild_timeout_secs() -> u64 {
    300
}

const fn default_max_concurrency() -> usize {
    8
}

const fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mode: default_runtime_mode(),
            start_command: default_start_command(),
            rebuild_command: None,
            base_url: default_base_url(),
            readiness_path: default_readiness_path(),
            startup_timeout_secs: default_startup_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            rebuild_timeout_secs: default_rebuild_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            env: BTreeMap::new(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` pattern store file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".patchloop/patterns.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rotated JSON log files (stderr only when unset)
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Fallback repair service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FallbackConfig {
    /// URL of the LLM repair service; fallback is disabled when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_fallback_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_fallback_timeout_secs() -> u64 {
    120
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_fallback_timeout_secs(),
        }
    }
}

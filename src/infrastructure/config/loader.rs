//! Layered configuration loading and validation.

use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::{Config, RuntimeMode};

/// Directory holding project configuration and the pattern store.
pub const CONFIG_DIR: &str = ".patchloop";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `convergence_epsilon` outside `[0, 1)`.
    #[error("Invalid convergence_epsilon: {0}. Must be in [0, 1)")]
    InvalidEpsilon(f64),

    /// `target_pass_rate` outside `(0, 1]`.
    #[error("Invalid target_pass_rate: {0}. Must be in (0, 1]")]
    InvalidTargetPassRate(f64),

    /// `max_iterations` is zero.
    #[error("Invalid max_iterations: 0. Must be at least 1")]
    ZeroIterations,

    /// `max_concurrency` is zero.
    #[error("Invalid max_concurrency: 0. Must be at least 1")]
    ZeroConcurrency,

    /// `known_fix_min_success_rate` outside `[0, 1]`.
    #[error("Invalid known_fix_min_success_rate: {0}. Must be in [0, 1]")]
    InvalidSuccessRate(f64),

    /// A negative ranking weight, or weights summing to zero.
    #[error("Invalid ranking weights: each must be >= 0 and their sum positive")]
    InvalidWeights,

    /// Process mode without a start command.
    #[error("Runtime start_command cannot be empty in process mode")]
    EmptyStartCommand,

    /// Unknown log level.
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    /// Unknown log format.
    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    /// Unknown log rotation.
    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    /// Empty pattern store path.
    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    /// `max_connections` is zero.
    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the current directory's project.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .patchloop/config.yaml (project config, created by init)
    /// 3. .patchloop/local.yaml (local overrides, optional)
    /// 4. Environment variables (PATCHLOOP_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`ConfigLoader::load`] for a project rooted at `root`.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Self::figment(root.as_ref())
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(root: &Path) -> Figment {
        let dir = root.join(CONFIG_DIR);
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("PATCHLOOP_").split("__"))
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let repair = &config.repair;
        if !(0.0..1.0).contains(&repair.convergence_epsilon) {
            return Err(ConfigError::InvalidEpsilon(repair.convergence_epsilon));
        }
        if !(repair.target_pass_rate > 0.0 && repair.target_pass_rate <= 1.0) {
            return Err(ConfigError::InvalidTargetPassRate(repair.target_pass_rate));
        }
        if repair.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if !(0.0..=1.0).contains(&repair.known_fix_min_success_rate) {
            return Err(ConfigError::InvalidSuccessRate(repair.known_fix_min_success_rate));
        }
        let w = repair.ranking;
        if w.pattern < 0.0 || w.ir_context < 0.0 || w.semantic < 0.0 {
            return Err(ConfigError::InvalidWeights);
        }
        if w.pattern + w.ir_context + w.semantic <= 0.0 {
            return Err(ConfigError::InvalidWeights);
        }

        if config.runtime.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if config.runtime.mode == RuntimeMode::Process && config.runtime.start_command.trim().is_empty() {
            return Err(ConfigError::EmptyStartCommand);
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.repair.max_iterations, 10);
        assert!((config.repair.target_pass_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.repair.max_repairs_per_constraint, 2);
        assert_eq!(config.database.path, ".patchloop/patterns.db");
        assert_eq!(config.runtime.readiness_path, "/health");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
repair:
  max_iterations: 4
  convergence_epsilon: 0.05
  ranking:
    pattern: 0.5
runtime:
  mode: compose
  env:
    DATABASE_URL: sqlite:///tmp/app.db
fallback:
  endpoint: http://localhost:9000/repair
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");
        assert_eq!(config.repair.max_iterations, 4);
        assert!((config.repair.ranking.pattern - 0.5).abs() < f64::EPSILON);
        assert!((config.repair.ranking.semantic - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.runtime.mode, RuntimeMode::Compose);
        assert_eq!(config.runtime.env["DATABASE_URL"], "sqlite:///tmp/app.db");
        assert!(config.fallback.endpoint.is_some());
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_epsilon_bounds() {
        let mut config = Config::default();
        config.repair.convergence_epsilon = 1.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidEpsilon(_))
        ));
        config.repair.convergence_epsilon = 0.0;
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_target_bounds() {
        let mut config = Config::default();
        config.repair.target_pass_rate = 0.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidTargetPassRate(_))
        ));
        config.repair.target_pass_rate = 1.2;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_zero_iterations_and_concurrency() {
        let mut config = Config::default();
        config.repair.max_iterations = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::ZeroIterations)));

        let mut config = Config::default();
        config.runtime.max_concurrency = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::ZeroConcurrency)));
    }

    #[test]
    fn test_validate_weights() {
        let mut config = Config::default();
        config.repair.ranking.semantic = -0.1;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidWeights)));

        config.repair.ranking.pattern = 0.0;
        config.repair.ranking.ir_context = 0.0;
        config.repair.ranking.semantic = 0.0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidWeights)));
    }

    #[test]
    fn test_validate_start_command_only_in_process_mode() {
        let mut config = Config::default();
        config.runtime.start_command = "  ".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyStartCommand)));

        config.runtime.mode = RuntimeMode::Compose;
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogFormat(format) => assert_eq!(format, "xml"),
            other => panic!("Expected InvalidLogFormat error, got {other}"),
        }
    }

    #[test]
    fn test_hierarchical_merging() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(CONFIG_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.yaml"),
            "repair:\n  max_iterations: 5\nlogging:\n  level: info\n  format: json\n",
        )
        .unwrap();
        fs::write(dir.join("local.yaml"), "repair:\n  max_iterations: 7\nlogging:\n  level: debug\n").unwrap();

        let config = temp_env::with_vars_unset(
            ["PATCHLOOP_REPAIR__MAX_ITERATIONS", "PATCHLOOP_LOGGING__LEVEL"],
            || ConfigLoader::load_from_dir(root.path()).unwrap(),
        );
        assert_eq!(config.repair.max_iterations, 7, "Override should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json", "Base value should persist");
    }

    #[test]
    fn test_env_override() {
        let root = tempfile::tempdir().unwrap();
        let config = temp_env::with_vars(
            [
                ("PATCHLOOP_REPAIR__MAX_ITERATIONS", Some("3")),
                ("PATCHLOOP_RUNTIME__BASE_URL", Some("http://127.0.0.1:9001")),
            ],
            || ConfigLoader::load_from_dir(root.path()).unwrap(),
        );
        assert_eq!(config.repair.max_iterations, 3);
        assert_eq!(config.runtime.base_url, "http://127.0.0.1:9001");
    }

    #[test]
    fn test_invalid_env_value_fails_validation() {
        let root = tempfile::tempdir().unwrap();
        let result = temp_env::with_var("PATCHLOOP_REPAIR__TARGET_PASS_RATE", Some("0"), || {
            ConfigLoader::load_from_dir(root.path())
        });
        assert!(result.is_err());
    }
}

//! Implementation of the `patchloop init` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tokio::fs;

use crate::adapters::sqlite::open_pattern_store;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::CONFIG_DIR;

/// Arguments for `init`
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

/// Result of `init`
#[derive(Debug, Serialize)]
pub struct InitOutput {
    /// Whether the project was initialized
    pub success: bool,
    /// Summary for the user
    pub message: String,
    /// Written configuration file
    pub config_path: PathBuf,
    /// Whether the pattern store was created and migrated
    pub database_initialized: bool,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if self.success {
            lines.push(format!("Configuration written to {}", self.config_path.display()));
        }
        if self.database_initialized {
            lines.push("Pattern store initialized".to_string());
        }
        lines.join("\n")
    }
}

/// Write the default configuration and create the pattern store
pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let config_dir = args.path.join(CONFIG_DIR);
    let config_path = config_dir.join("config.yaml");

    if config_path.exists() && !args.force {
        output(
            &InitOutput {
                success: false,
                message: "Project already initialized. Use --force to overwrite.".to_string(),
                config_path,
                database_initialized: false,
            },
            json_mode,
        );
        return Ok(());
    }

    fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;

    let config = Config::default();
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize default config")?;
    fs::write(&config_path, yaml)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    let db_path = args.path.join(&config.database.path);
    open_pattern_store(&db_path, None)
        .await
        .with_context(|| format!("Failed to initialize pattern store at {}", db_path.display()))?;

    output(
        &InitOutput {
            success: true,
            message: if args.force {
                "Project reinitialized successfully.".to_string()
            } else {
                "Project initialized successfully.".to_string()
            },
            config_path,
            database_initialized: true,
        },
        json_mode,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::ConfigLoader;

    #[tokio::test]
    async fn writes_loadable_config_and_store() {
        let dir = tempfile::tempdir().unwrap();
        execute(
            InitArgs {
                force: false,
                path: dir.path().to_path_buf(),
            },
            true,
        )
        .await
        .unwrap();

        let config_path = dir.path().join(".patchloop/config.yaml");
        let config = ConfigLoader::load_from_file(&config_path).unwrap();
        assert_eq!(config.repair.max_iterations, 10);
        assert!(dir.path().join(".patchloop/patterns.db").exists());
    }

    #[tokio::test]
    async fn existing_config_is_kept_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.yaml"), "repair:\n  max_iterations: 3\n").unwrap();

        execute(
            InitArgs {
                force: false,
                path: dir.path().to_path_buf(),
            },
            true,
        )
        .await
        .unwrap();

        let kept = std::fs::read_to_string(config_dir.join("config.yaml")).unwrap();
        assert!(kept.contains("max_iterations: 3"));
    }
}

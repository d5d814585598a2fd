//! Implementation of the `patchloop patterns` commands.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;

use crate::adapters::sqlite::{open_pattern_store, PoolConfig};
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{Config, FixPattern};
use crate::domain::ports::PatternStore;

/// Pattern store subcommands
#[derive(Subcommand, Debug)]
pub enum PatternsCommands {
    /// List known fixes, most recently updated first
    List {
        /// Maximum number of fixes to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

/// Result of `patterns list`
#[derive(Debug, Serialize)]
pub struct PatternListOutput {
    /// Known fixes, most recently updated first
    pub patterns: Vec<FixPattern>,
}

impl CommandOutput for PatternListOutput {
    fn to_human(&self) -> String {
        if self.patterns.is_empty() {
            return "No known fixes recorded yet.".to_string();
        }
        format!(
            "{}\n{} known fix(es)",
            TableFormatter::new().format_patterns(&self.patterns),
            self.patterns.len()
        )
    }
}

/// Run a pattern store subcommand
pub async fn execute(command: PatternsCommands, config: &Config, json_mode: bool) -> Result<()> {
    match command {
        PatternsCommands::List { limit } => {
            let path = Path::new(&config.database.path);
            let store = open_pattern_store(path, Some(PoolConfig::from(&config.database)))
                .await
                .with_context(|| format!("Failed to open pattern store at {}", path.display()))?;
            let patterns = store.list_known_fixes(limit).await?;
            output(&PatternListOutput { patterns }, json_mode);
        }
    }
    Ok(())
}

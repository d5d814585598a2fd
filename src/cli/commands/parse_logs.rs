//! Implementation of the `patchloop parse-logs` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::StackTrace;
use crate::services::LogParser;

/// Arguments for `parse-logs`
#[derive(Args, Debug)]
pub struct ParseLogsArgs {
    /// Log file to parse
    pub file: PathBuf,
}

/// Result of `parse-logs`
#[derive(Debug, Serialize)]
pub struct ParseLogsOutput {
    /// Traces found, in log order
    pub traces: Vec<StackTrace>,
}

impl CommandOutput for ParseLogsOutput {
    fn to_human(&self) -> String {
        if self.traces.is_empty() {
            return "No stack traces found.".to_string();
        }
        TableFormatter::new().format_traces(&self.traces)
    }
}

/// Extract stack traces from a log file
pub async fn execute(args: ParseLogsArgs, json_mode: bool) -> Result<()> {
    let logs = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let traces = LogParser::new().parse(&logs);
    output(&ParseLogsOutput { traces }, json_mode);
    Ok(())
}

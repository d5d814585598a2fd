//! Implementation of the `patchloop classify` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{HttpMethod, StackTrace, StrategyType, Violation};
use crate::services::{ClassificationRule, FailureClassifier, LogParser};

/// Arguments for `classify`
#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// HTTP method of the failing request
    #[arg(long, value_parser = parse_method)]
    pub method: HttpMethod,

    /// Endpoint path template, e.g. /carts/{id}/items
    #[arg(long)]
    pub endpoint: String,

    /// Expected status code
    #[arg(long)]
    pub expected: u16,

    /// Actual status code (0 for no response)
    #[arg(long)]
    pub actual: u16,

    /// Error detail returned by the service
    #[arg(long, default_value = "")]
    pub message: String,

    /// Service log file to take the innermost stack trace from
    #[arg(long)]
    pub logs: Option<PathBuf>,
}

fn parse_method(s: &str) -> Result<HttpMethod, String> {
    HttpMethod::parse_str(s).ok_or_else(|| format!("unknown HTTP method: {s}"))
}

/// Result of `classify`
#[derive(Debug, Serialize)]
pub struct ClassifyOutput {
    /// Id of the violation built from the arguments
    pub violation_id: String,
    /// Chosen strategy
    pub strategy: StrategyType,
    /// Rule that chose it
    pub rule: ClassificationRule,
    /// Trace correlated from the supplied logs
    pub trace: Option<StackTrace>,
}

impl CommandOutput for ClassifyOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Violation: {}", self.violation_id),
            format!("Strategy:  {}", self.strategy),
            format!("Rule:      {:?}", self.rule),
        ];
        if let Some(trace) = &self.trace {
            lines.push(format!(
                "Trace:     {}: {}",
                trace.exception_kind, trace.exception_message
            ));
        }
        lines.join("\n")
    }
}

/// Classify a single failure described on the command line
pub async fn execute(args: ClassifyArgs, json_mode: bool) -> Result<()> {
    let trace = match &args.logs {
        Some(path) => {
            let logs = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            LogParser::new().parse_innermost(&logs)
        }
        None => None,
    };

    let violation = Violation {
        endpoint: args.endpoint,
        http_method: args.method,
        expected_status: args.expected,
        actual_status: args.actual,
        error_kind: trace
            .as_ref()
            .map_or_else(|| "HTTPError".to_string(), |t| t.exception_kind.clone()),
        error_message: args.message,
        stack_trace: trace.clone(),
        scenario_name: None,
    };
    let classification = FailureClassifier::new().explain(&violation, trace.as_ref());

    output(
        &ClassifyOutput {
            violation_id: violation.id(),
            strategy: classification.strategy,
            rule: classification.rule,
            trace,
        },
        json_mode,
    );
    Ok(())
}

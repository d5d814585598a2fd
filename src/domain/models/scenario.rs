//! Smoke-test scenarios and their outcomes.
//!
//! A [`Scenario`] is an ordered list of [`ScenarioStep`]s. Later steps may
//! reference values extracted from earlier responses, so steps within one
//! scenario always run sequentially.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::violation::{HttpMethod, Violation};

/// Declared shape of a request-body field, used for body synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name in the request body.
    pub name: String,
    /// Loose type tag (`string`, `int`, `float`, `decimal`, `bool`, `uuid`,
    /// `datetime`, `list`, ...). Absent means "infer from the name".
    #[serde(default, rename = "type")]
    pub field_type: Option<String>,
    /// Whether the field is always sent. Defaults to `true`.
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

/// A rule that captures a value from a step's JSON response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractRule {
    /// Variable name later steps refer to (`{name}` in paths, `{{name}}` in
    /// bodies).
    pub name: String,
    /// Dotted path into the response (`id`, `$.data.id`, `items.0.id`).
    pub path: String,
}

/// One HTTP request within a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioStep {
    /// HTTP verb.
    pub method: HttpMethod,
    /// Path template; `{param}` segments are substituted at execution time.
    pub path: String,
    /// Explicit body template. String values may contain `{{var}}`.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    /// Field specs used to synthesize a body when `body` is absent.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Status a correct service returns.
    pub expected_status: u16,
    /// Values captured from the response for later steps.
    #[serde(default)]
    pub extract: Vec<ExtractRule>,
}

/// A named, possibly multi-step smoke scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name, used in reports and violation ids.
    pub name: String,
    /// Requests, run in order.
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// A scenario with a single request.
    pub fn single(name: impl Into<String>, step: ScenarioStep) -> Self {
        Self {
            name: name.into(),
            steps: vec![step],
        }
    }
}

/// What happened when a scenario ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Name of the scenario that ran.
    pub scenario_name: String,
    /// Every step returned its expected status.
    pub passed: bool,
    /// Index of the step that failed, when `passed` is false.
    pub failed_step: Option<usize>,
    /// The violation for the failing step.
    pub violation: Option<Violation>,
    /// Values extracted along the way, for diagnostics.
    #[serde(default)]
    pub extracted: BTreeMap<String, serde_json::Value>,
    /// Wall-clock time of all steps.
    pub duration_ms: u64,
}

/// The outcome of running a full scenario suite against one live instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmokeRun {
    /// One result per scenario, in suite order.
    pub results: Vec<ScenarioResult>,
    /// Process or container output captured while the suite ran.
    pub raw_logs: String,
}

impl SmokeRun {
    /// Fraction of scenarios that passed. An empty suite counts as passing.
    pub fn pass_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 1.0;
        }
        let passed = self.results.iter().filter(|r| r.passed).count();
        passed as f64 / self.results.len() as f64
    }

    /// Violations from every failed scenario, in scenario order.
    pub fn violations(&self) -> Vec<Violation> {
        self.results
            .iter()
            .filter_map(|r| r.violation.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(passed: bool) -> ScenarioResult {
        ScenarioResult {
            scenario_name: "s".to_string(),
            passed,
            failed_step: None,
            violation: None,
            extracted: BTreeMap::new(),
            duration_ms: 1,
        }
    }

    #[test]
    fn pass_rate_counts_passing_scenarios() {
        let run = SmokeRun {
            results: vec![result(true), result(false), result(true), result(true)],
            raw_logs: String::new(),
        };
        assert!((run.pass_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_suite_passes() {
        assert!((SmokeRun::default().pass_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn step_deserializes_with_defaults() {
        let yaml = "method: POST\npath: /products\nexpected_status: 201\nfields:\n  - name: price\n";
        let step: ScenarioStep = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.method, HttpMethod::Post);
        assert!(step.body.is_none());
        assert!(step.fields[0].required);
        assert!(step.extract.is_empty());
    }
}

//! Scenario catalog loaded from a YAML or JSON file.
//!
//! The file is either a bare list of scenarios or a mapping with a
//! `scenarios` key:
//!
//! ```yaml
//! scenarios:
//!   - name: create product
//!     steps:
//!       - method: POST
//!         path: /products
//!         expected_status: 201
//!         fields: [{ name: name }, { name: price, type: decimal }]
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::parse_document;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Scenario;
use crate::domain::ports::ScenarioSource;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Catalog {
    Wrapped { scenarios: Vec<Scenario> },
    Bare(Vec<Scenario>),
}

/// Loads scenarios from a JSON or YAML file.
pub struct FileScenarioSource {
    path: PathBuf,
}

impl FileScenarioSource {
    /// Source reading `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Reject scenarios the executor could never run meaningfully.
pub fn validate_scenario(scenario: &Scenario) -> DomainResult<()> {
    if scenario.name.trim().is_empty() {
        return Err(DomainError::InvalidScenario("scenario without a name".to_string()));
    }
    if scenario.steps.is_empty() {
        return Err(DomainError::InvalidScenario(format!(
            "'{}' has no steps",
            scenario.name
        )));
    }
    for (i, step) in scenario.steps.iter().enumerate() {
        if !step.path.starts_with('/') {
            return Err(DomainError::InvalidScenario(format!(
                "'{}' step {i}: path '{}' must start with '/'",
                scenario.name, step.path
            )));
        }
        if !(100..600).contains(&step.expected_status) {
            return Err(DomainError::InvalidScenario(format!(
                "'{}' step {i}: expected status {} is not an HTTP status",
                scenario.name, step.expected_status
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl ScenarioSource for FileScenarioSource {
    async fn load_scenarios(&self) -> DomainResult<Vec<Scenario>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            DomainError::Io(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let scenarios = match parse_document::<Catalog>(&self.path, &content) {
            Ok(Catalog::Wrapped { scenarios } | Catalog::Bare(scenarios)) => scenarios,
            Err(e) => {
                return Err(DomainError::InvalidScenario(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };
        for scenario in &scenarios {
            validate_scenario(scenario)?;
        }
        info!(path = %self.path.display(), count = scenarios.len(), "Loaded scenario catalog");
        Ok(scenarios)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::HttpMethod;

    async fn load(name: &str, content: &str) -> DomainResult<Vec<Scenario>> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        FileScenarioSource::new(path).load_scenarios().await
    }

    #[tokio::test]
    async fn loads_wrapped_yaml_catalog() {
        let yaml = r"
scenarios:
  - name: add to cart
    steps:
      - method: POST
        path: /carts
        expected_status: 201
        extract: [{ name: cart_id, path: id }]
      - method: POST
        path: /carts/{cart_id}/items
        expected_status: 201
        body: { product_id: 1, quantity: 2 }
";
        let scenarios = load("smoke.yaml", yaml).await.unwrap();
        assert_eq!(scenarios.len(), 1);
        assert_eq!(scenarios[0].steps.len(), 2);
        assert_eq!(scenarios[0].steps[0].extract[0].name, "cart_id");
    }

    #[tokio::test]
    async fn loads_bare_json_list() {
        let json = r#"[{"name": "list products", "steps": [{"method": "GET", "path": "/products", "expected_status": 200}]}]"#;
        let scenarios = load("smoke.json", json).await.unwrap();
        assert_eq!(scenarios[0].steps[0].method, HttpMethod::Get);
    }

    #[tokio::test]
    async fn rejects_relative_paths() {
        let yaml = "- name: bad\n  steps:\n    - {method: GET, path: products, expected_status: 200}\n";
        let err = load("smoke.yaml", yaml).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidScenario(ref m) if m.contains("must start with '/'")));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let err = FileScenarioSource::new("/nonexistent/smoke.yaml")
            .load_scenarios()
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Io(_)));
    }
}

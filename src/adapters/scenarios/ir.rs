//! Scenarios derived from the application IR, one per endpoint.
//!
//! Endpoints whose path has a parameter get a setup step that creates the
//! parent resource through the collection's POST endpoint and extracts its
//! `id`, so `/carts/{id}/items` runs against a cart that exists.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::parse_document;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ApplicationIr, EndpointDef, ExtractRule, FieldSpec, HttpMethod, Scenario, ScenarioStep,
};
use crate::domain::ports::ScenarioSource;

/// Load an IR document (`.json`, otherwise YAML).
pub async fn load_ir(path: &Path) -> DomainResult<ApplicationIr> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| DomainError::Io(format!("failed to read {}: {e}", path.display())))?;
    parse_document(path, &content)
        .map_err(|e| DomainError::InvalidIr(format!("{}: {e}", path.display())))
}

/// Derives one scenario per IR endpoint.
pub struct IrScenarioSource {
    ir: Arc<ApplicationIr>,
}

impl IrScenarioSource {
    /// Source over `ir`.
    pub fn new(ir: Arc<ApplicationIr>) -> Self {
        Self { ir }
    }

    /// Body fields for an endpoint, typed from its entity where possible.
    fn fields(&self, endpoint: &EndpointDef) -> Vec<FieldSpec> {
        if !endpoint.method.has_body() {
            return Vec::new();
        }
        let entity = self.ir.entity_for_path(endpoint.method, &endpoint.path);
        if endpoint.request_fields.is_empty() {
            // No declared body: send the entity's own writable fields.
            return entity
                .map(|e| {
                    e.fields
                        .iter()
                        .filter(|f| !matches!(f.name.as_str(), "id" | "created_at" | "updated_at"))
                        .filter(|f| e.status_field.as_deref() != Some(f.name.as_str()))
                        .map(|f| FieldSpec {
                            name: f.name.clone(),
                            field_type: Some(f.field_type.clone()),
                            required: f.required,
                        })
                        .collect()
                })
                .unwrap_or_default();
        }
        endpoint
            .request_fields
            .iter()
            .map(|name| {
                let def = entity.and_then(|e| e.field(name));
                FieldSpec {
                    name: name.clone(),
                    field_type: def.map(|f| f.field_type.clone()),
                    required: def.map_or(true, |f| f.required),
                }
            })
            .collect()
    }

    fn step(&self, endpoint: &EndpointDef) -> ScenarioStep {
        ScenarioStep {
            method: endpoint.method,
            path: endpoint.path.clone(),
            body: None,
            fields: self.fields(endpoint),
            expected_status: endpoint.success_status(),
            extract: Vec::new(),
        }
    }

    /// A step creating the resource the first `{param}` of `path` refers to.
    fn setup_step(&self, path: &str) -> Option<ScenarioStep> {
        let (prefix, rest) = path.split_once("/{")?;
        let param = rest.split('}').next()?;
        if prefix.is_empty() {
            return None;
        }
        let create = self
            .ir
            .endpoints
            .iter()
            .find(|e| e.method == HttpMethod::Post && e.path.trim_end_matches('/') == prefix)?;
        let mut step = self.step(create);
        step.extract.push(ExtractRule {
            name: param.to_string(),
            path: "id".to_string(),
        });
        Some(step)
    }

    /// Scenarios for every endpoint, in IR order.
    pub fn scenarios(&self) -> Vec<Scenario> {
        self.ir
            .endpoints
            .iter()
            .map(|endpoint| {
                let mut steps = Vec::with_capacity(2);
                if let Some(setup) = self.setup_step(&endpoint.path) {
                    steps.push(setup);
                }
                steps.push(self.step(endpoint));
                let name = format!("{} {}", endpoint.method, endpoint.path);
                debug!(scenario = %name, steps = steps.len(), "Derived scenario");
                Scenario { name, steps }
            })
            .collect()
    }
}

#[async_trait]
impl ScenarioSource for IrScenarioSource {
    async fn load_scenarios(&self) -> DomainResult<Vec<Scenario>> {
        if self.ir.endpoints.is_empty() {
            return Err(DomainError::InvalidIr(
                "IR declares no endpoints to derive scenarios from".to_string(),
            ));
        }
        let scenarios = self.scenarios();
        info!(count = scenarios.len(), "Derived scenarios from IR");
        Ok(scenarios)
    }
}

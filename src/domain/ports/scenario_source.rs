//! Scenario source port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Scenario;

/// Supplies the smoke scenarios for a run: a fixed endpoint catalog or a set
/// derived from the application IR.
#[async_trait]
pub trait ScenarioSource: Send + Sync {
    /// Load the full suite, in execution order.
    async fn load_scenarios(&self) -> DomainResult<Vec<Scenario>>;
}

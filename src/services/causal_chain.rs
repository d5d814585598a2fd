//! Heuristic attribution of a violation to its business-rule root cause.
//!
//! Attribution never blocks a repair; it only supplies the ranker with a
//! preferred strategy and a confidence signal.

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::domain::models::ir::{infer_entity_from_path, to_snake_case};
use crate::domain::models::{
    ApplicationIr, CausalChain, CauseKind, CauseNode, RepairFix, Violation,
};
use crate::services::constraint_graph::ConstraintGraph;
use crate::services::failure_classifier::action_verb;

const TRANSITION_WORDS: &[&str] = &["status", "transition", "state", "already"];
const GUARD_WORDS: &[&str] = &[
    "stock", "inventory", "insufficient", "empty", "duplicate", "quantity", "exceeds",
];
const DB_MARKERS: &[&str] = &["constraint failed", "not null", "unique", "foreign key", "integrity"];

fn failed_column_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"constraint failed: (\w+)\.(\w+)").expect("valid constraint column regex")
    })
}

/// Scope of a related-repairs lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairScope {
    /// Repairs touching this entity.
    Entity(String),
    /// Repairs triggered by this endpoint.
    Endpoint(String),
}

/// Builds causal chains from violations, keeping the run's repair history
/// for related-repair lookups.
#[derive(Debug, Clone)]
pub struct CausalChainBuilder {
    ir: Arc<ApplicationIr>,
    graph: ConstraintGraph,
    history: Vec<RepairFix>,
}

impl CausalChainBuilder {
    /// Builder over `ir`, with the constraint graph derived up front.
    pub fn new(ir: Arc<ApplicationIr>) -> Self {
        let graph = ConstraintGraph::from_ir(&ir);
        Self {
            ir,
            graph,
            history: Vec::new(),
        }
    }

    /// Constraint graph derived from the IR.
    pub fn graph(&self) -> &ConstraintGraph {
        &self.graph
    }

    /// The IR the builder was created with.
    pub fn ir(&self) -> &ApplicationIr {
        &self.ir
    }

    /// Remember an applied fix for later related-repair lookups.
    pub fn record_repair(&mut self, fix: RepairFix) {
        self.history.push(fix);
    }

    /// Drop reverted fixes from history.
    pub fn forget_reverted(&mut self, iteration: u32) {
        self.history.retain(|f| f.iteration != iteration);
    }

    /// Fixes previously applied within `scope`.
    pub fn related_repairs(&self, scope: &RepairScope) -> Vec<RepairFix> {
        self.history
            .iter()
            .filter(|fix| match scope {
                RepairScope::Endpoint(endpoint) => &fix.endpoint == endpoint,
                RepairScope::Entity(entity) => {
                    let snake = to_snake_case(entity);
                    infer_entity_from_path(&fix.endpoint).as_deref() == Some(entity.as_str())
                        || fix
                            .file_path
                            .to_string_lossy()
                            .to_lowercase()
                            .contains(&snake)
                }
            })
            .cloned()
            .collect()
    }

    /// Name of the entity a violation's endpoint operates on.
    pub fn entity_for(&self, violation: &Violation) -> Option<String> {
        self.ir
            .entity_for_path(violation.http_method, &violation.endpoint)
            .map(|e| e.name.clone())
            .or_else(|| infer_entity_from_path(&violation.endpoint))
    }

    /// Attribute a violation to its most likely root cause.
    pub fn attribute(&self, violation: &Violation) -> CausalChain {
        let text = violation.error_text().to_lowercase();
        let entity = self.entity_for(violation);
        let root_cause = self
            .ir_constraint_cause(&text)
            .or_else(|| self.transition_cause(violation, &text, entity.as_deref()))
            .or_else(|| self.guard_cause(violation, &text, entity.as_deref()))
            .or_else(|| reference_cause(violation, &text, entity.as_deref()))
            .unwrap_or_else(CauseNode::unknown);

        let mut prior = self.related_repairs(&RepairScope::Endpoint(violation.endpoint.clone()));
        if let Some(entity) = &root_cause.entity {
            for fix in self.related_repairs(&RepairScope::Entity(entity.clone())) {
                if !prior.contains(&fix) {
                    prior.push(fix);
                }
            }
        }

        CausalChain {
            violation_id: violation.id(),
            root_cause,
            prior_related_repairs: prior,
        }
    }

    fn ir_constraint_cause(&self, text: &str) -> Option<CauseNode> {
        if !DB_MARKERS.iter().any(|m| text.contains(m)) {
            return None;
        }
        let column = failed_column_regex().captures(text);
        let (entity, constraint_id) = match &column {
            Some(caps) => {
                let table = &caps[1];
                let field = &caps[2];
                let entity = self
                    .ir
                    .entity_by_table(table)
                    .map(|e| e.name.clone())
                    .or_else(|| infer_entity_from_path(table));
                let constraint = entity.as_ref().and_then(|e| {
                    let id = format!("{e}.{field}.required");
                    (!self.graph.entities_for_constraint(&id).is_empty()).then_some(id)
                });
                (entity, constraint)
            }
            None => (None, None),
        };
        let confidence = confidence(0.5, constraint_id.is_some(), entity.is_some());
        Some(CauseNode {
            kind: CauseKind::IrConstraint,
            description: match &column {
                Some(caps) => format!("Schema constraint on {}.{}", &caps[1], &caps[2]),
                None => "Schema constraint violated".to_string(),
            },
            entity,
            constraint_id,
            confidence,
        })
    }

    fn transition_cause(
        &self,
        violation: &Violation,
        text: &str,
        entity: Option<&str>,
    ) -> Option<CauseNode> {
        let verb = action_verb(&violation.endpoint);
        if !has_word(text, TRANSITION_WORDS) && verb.is_none() {
            return None;
        }
        let constraint_id = match (entity, verb) {
            (Some(entity), Some(verb)) => self.graph.transition_constraint(entity, verb),
            _ => None,
        };
        Some(CauseNode {
            kind: CauseKind::InvalidTransition,
            entity: entity.map(str::to_string),
            description: match verb {
                Some(verb) => format!("Missing status check before '{verb}'"),
                None => "Invalid status transition".to_string(),
            },
            confidence: confidence(0.5, constraint_id.is_some(), entity.is_some()),
            constraint_id,
        })
    }

    fn guard_cause(
        &self,
        violation: &Violation,
        text: &str,
        entity: Option<&str>,
    ) -> Option<CauseNode> {
        if !has_word(text, GUARD_WORDS) {
            return None;
        }
        let constraint_id = entity.and_then(|e| {
            self.graph
                .constraints_for_entity(e)
                .into_iter()
                .find(|c| c.starts_with("flow:"))
        });
        let has_flow = self
            .ir
            .flow_for(violation.http_method, &violation.endpoint)
            .is_some_and(|f| !f.preconditions.is_empty());
        Some(CauseNode {
            kind: CauseKind::MissingGuard,
            entity: entity.map(str::to_string),
            description: "Business precondition is not enforced".to_string(),
            confidence: confidence(0.5, constraint_id.is_some() || has_flow, entity.is_some()),
            constraint_id,
        })
    }
}

fn reference_cause(violation: &Violation, text: &str, entity: Option<&str>) -> Option<CauseNode> {
    if violation.actual_status != 404 && !text.contains("not found") && !text.contains("does not exist")
    {
        return None;
    }
    Some(CauseNode {
        kind: CauseKind::ReferenceMissing,
        entity: entity.map(str::to_string),
        constraint_id: None,
        description: format!("No handler or record for {}", violation.endpoint),
        confidence: confidence(0.5, false, entity.is_some()),
    })
}

fn confidence(base: f64, constraint_known: bool, entity_known: bool) -> f64 {
    let mut c = base;
    if constraint_known {
        c += 0.3;
    }
    if entity_known {
        c += 0.1;
    }
    c.min(1.0)
}

/// Whether any of `words` (or its plural) appears as a token in `text`.
pub(crate) fn has_word(text: &str, words: &[&str]) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .any(|token| {
            words.iter().any(|w| {
                token == *w
                    || token
                        .strip_prefix(w)
                        .is_some_and(|rest| rest == "s" || rest == "es")
            })
        })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::domain::models::{FixOrigin, FixType, HttpMethod, StrategyType};

    fn ir() -> Arc<ApplicationIr> {
        Arc::new(
            serde_json::from_value(serde_json::json!({
                "entities": [
                    {"name": "Product", "fields": [{"name": "description"}, {"name": "stock", "type": "int"}]},
                    {"name": "Cart", "status_field": "status", "states": ["OPEN", "CHECKED_OUT"],
                     "transitions": [{"name": "checkout", "from": ["OPEN"], "to": "CHECKED_OUT"}]}
                ],
                "flows": [{"name": "add item", "method": "POST", "path": "/carts/{id}/items",
                           "entity": "Cart", "preconditions": ["product.stock >= quantity"]}]
            }))
            .unwrap(),
        )
    }

    fn violation(method: HttpMethod, endpoint: &str, actual: u16, msg: &str) -> Violation {
        Violation {
            endpoint: endpoint.to_string(),
            http_method: method,
            expected_status: 201,
            actual_status: actual,
            error_kind: "HTTPError".to_string(),
            error_message: msg.to_string(),
            stack_trace: None,
            scenario_name: None,
        }
    }

    #[test]
    fn stock_message_is_missing_guard() {
        let builder = CausalChainBuilder::new(ir());
        let chain = builder.attribute(&violation(
            HttpMethod::Post,
            "/carts/{id}/items",
            422,
            "Insufficient stock",
        ));
        assert_eq!(chain.root_cause.kind, CauseKind::MissingGuard);
        assert_eq!(chain.root_cause.entity.as_deref(), Some("Cart"));
        assert_eq!(chain.root_cause.constraint_id.as_deref(), Some("flow:add item:0"));
        assert_eq!(chain.inferred_strategy(), Some(StrategyType::ServiceLogic));
        assert!(chain.root_cause.confidence > 0.8);
    }

    #[test]
    fn checkout_endpoint_is_invalid_transition() {
        let builder = CausalChainBuilder::new(ir());
        let chain = builder.attribute(&violation(
            HttpMethod::Post,
            "/carts/{id}/checkout",
            500,
            "Internal Server Error",
        ));
        assert_eq!(chain.root_cause.kind, CauseKind::InvalidTransition);
        assert_eq!(chain.root_cause.constraint_id.as_deref(), Some("Cart.checkout"));
    }

    #[test]
    fn not_null_message_maps_to_field_constraint() {
        let builder = CausalChainBuilder::new(ir());
        let chain = builder.attribute(&violation(
            HttpMethod::Post,
            "/products",
            500,
            "NOT NULL constraint failed: products.description",
        ));
        assert_eq!(chain.root_cause.kind, CauseKind::IrConstraint);
        assert_eq!(chain.root_cause.entity.as_deref(), Some("Product"));
        assert_eq!(
            chain.root_cause.constraint_id.as_deref(),
            Some("Product.description.required")
        );
    }

    #[test]
    fn unknown_cause_when_nothing_matches() {
        let builder = CausalChainBuilder::new(Arc::new(ApplicationIr::default()));
        let chain = builder.attribute(&violation(HttpMethod::Get, "/products", 500, "boom"));
        assert_eq!(chain.root_cause.kind, CauseKind::Unknown);
        assert_eq!(chain.inferred_strategy(), None);
    }

    #[test]
    fn related_repairs_by_endpoint_and_entity() {
        let mut builder = CausalChainBuilder::new(ir());
        builder.record_repair(RepairFix {
            file_path: PathBuf::from("app/services/cart_service.py"),
            fix_type: FixType::StockGuard,
            strategy_type: StrategyType::ServiceLogic,
            origin: FixOrigin::Procedure,
            description: "guard".to_string(),
            old_fragment: String::new(),
            new_fragment: String::new(),
            success: true,
            reverted: false,
            violation_id: "POST /carts/{id}/items -> 201".to_string(),
            endpoint: "/carts/{id}/items".to_string(),
            iteration: 1,
            confidence: None,
            failure_reason: None,
        });
        assert_eq!(
            builder
                .related_repairs(&RepairScope::Endpoint("/carts/{id}/items".to_string()))
                .len(),
            1
        );
        assert_eq!(
            builder
                .related_repairs(&RepairScope::Entity("Cart".to_string()))
                .len(),
            1
        );
        assert!(builder
            .related_repairs(&RepairScope::Entity("Product".to_string()))
            .is_empty());

        builder.forget_reverted(1);
        assert!(builder
            .related_repairs(&RepairScope::Endpoint("/carts/{id}/items".to_string()))
            .is_empty());
    }

    #[test]
    fn word_matching_accepts_plurals_only() {
        assert!(has_word("not enough items in stock", &["stock"]));
        assert!(has_word("invalid states", &["state"]));
        assert!(!has_word("statement failed", &["state"]));
    }
}

//! Candidate scoring and ranking.
//!
//! Three scores are computed independently per candidate:
//!
//! - `pattern_score`: historical success of the candidate's fix signature,
//!   from the [`ConfidenceModel`].
//! - `ir_context_score`: whether the IR has a business flow, transition, or
//!   field declaration supporting the fix for this endpoint.
//! - `semantic_score`: token overlap between the candidate description and
//!   the violation text.
//!
//! The weighted sum becomes the candidate's confidence. Ties go to the
//! strategy matching the causal chain's inferred root cause, then to
//! generation order.

use std::collections::{BTreeSet, HashMap};

use crate::domain::models::{
    ApplicationIr, CausalChain, FixPattern, FixType, RankingWeights, RepairCandidate, Violation,
};

/// Prior used for signatures with no history.
const UNSEEN_PRIOR: f64 = 0.5;

/// Success/failure counts per fix signature, learned within a run and seeded
/// from the pattern store.
#[derive(Debug, Clone, Default)]
pub struct ConfidenceModel {
    stats: HashMap<String, (u32, u32)>,
}

impl ConfidenceModel {
    /// A model with no history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed counts from stored known fixes.
    pub fn seed(&mut self, patterns: &[FixPattern]) {
        for p in patterns {
            let signature = format!("{}:{}", p.strategy_type, p.fix_type);
            let entry = self.stats.entry(signature).or_default();
            entry.0 += p.success_count;
            entry.1 += p.failure_count;
        }
    }

    /// Count one outcome for `signature`.
    pub fn record(&mut self, signature: &str, success: bool) {
        let entry = self.stats.entry(signature.to_string()).or_default();
        if success {
            entry.0 += 1;
        } else {
            entry.1 += 1;
        }
    }

    /// Laplace-smoothed success rate; [`UNSEEN_PRIOR`] without history.
    pub fn score(&self, signature: &str) -> f64 {
        match self.stats.get(signature) {
            Some(&(s, f)) if s + f > 0 => (f64::from(s) + 1.0) / (f64::from(s + f) + 2.0),
            _ => UNSEEN_PRIOR,
        }
    }
}

/// Scores and orders candidates.
#[derive(Debug, Clone)]
pub struct ConfidenceRanker {
    weights: RankingWeights,
}

impl ConfidenceRanker {
    /// Ranker using `weights`.
    pub fn new(weights: RankingWeights) -> Self {
        Self { weights }
    }

    /// Fill in every score and return the candidates by descending
    /// confidence.
    pub fn rank(
        &self,
        mut candidates: Vec<RepairCandidate>,
        chain: &CausalChain,
        violation: &Violation,
        ir: &ApplicationIr,
        model: &ConfidenceModel,
    ) -> Vec<RepairCandidate> {
        let violation_tokens = tokens(&format!(
            "{} {}",
            violation.error_text(),
            violation.endpoint
        ));
        for c in &mut candidates {
            c.pattern_score = model.score(&c.signature());
            c.ir_context_score = ir_context_score(c, violation, ir);
            c.semantic_score = jaccard(&tokens(&c.description), &violation_tokens);
            c.confidence = self.combine(c);
        }

        let preferred = chain.inferred_strategy();
        // Stable: equal keys keep generation order.
        candidates.sort_by(|a, b| {
            let key = |c: &RepairCandidate| {
                (
                    quantize(c.confidence),
                    Some(c.strategy_type) == preferred && c.fix_type != FixType::Fallback,
                )
            };
            key(b).cmp(&key(a))
        });
        candidates
    }

    fn combine(&self, c: &RepairCandidate) -> f64 {
        let w = self.weights;
        let total = w.pattern + w.ir_context + w.semantic;
        if total <= 0.0 {
            return 0.0;
        }
        (w.pattern * c.pattern_score + w.ir_context * c.ir_context_score + w.semantic * c.semantic_score)
            / total
    }
}

/// Confidence rounded so floating-point noise does not break ties.
#[allow(clippy::cast_possible_truncation)]
fn quantize(confidence: f64) -> i64 {
    (confidence * 1_000_000.0).round() as i64
}

/// Support the IR gives a candidate, in `[0, 1]`.
fn ir_context_score(c: &RepairCandidate, violation: &Violation, ir: &ApplicationIr) -> f64 {
    if c.fix_type == FixType::Fallback {
        return 0.0;
    }
    let entity = c.params.entity.as_deref().and_then(|e| ir.entity(e));
    let field = c
        .params
        .field
        .as_deref()
        .and_then(|f| entity.and_then(|e| e.field(f)));

    let supported = match c.fix_type {
        FixType::MakeNullable => field.is_some_and(|f| {
            f.nullable || !f.required || (f.default.is_none() && names_not_null_column(violation, &f.name))
        }),
        FixType::RelaxRequired => field.is_some_and(|f| f.nullable || !f.required),
        FixType::AddDefault => field.is_some_and(|f| f.default.is_some()),
        FixType::AddCascade => field.is_some_and(|f| f.references.is_some()),
        FixType::AddHandler => ir
            .endpoint(violation.http_method, &violation.endpoint)
            .is_some(),
        FixType::StatusTransitionGuard => c
            .params
            .function
            .as_deref()
            .is_some_and(|f| entity.is_some_and(|e| e.transition(f).is_some())),
        FixType::StockGuard | FixType::EmptyCollectionGuard | FixType::ExistenceGuard => ir
            .flow_for(violation.http_method, &violation.endpoint)
            .is_some_and(|flow| {
                let words = guard_words(c.fix_type);
                flow.preconditions
                    .iter()
                    .chain(&flow.postconditions)
                    .any(|cond| {
                        let cond = cond.to_lowercase();
                        words.iter().any(|w| cond.contains(w))
                    })
            }),
        _ => false,
    };
    if supported {
        1.0
    } else if entity.is_some() || ir.endpoint(violation.http_method, &violation.endpoint).is_some() {
        0.5
    } else {
        0.0
    }
}

/// Whether the violation reports a NOT NULL failure on `column`.
fn names_not_null_column(violation: &Violation, column: &str) -> bool {
    let text = violation.error_text().to_lowercase();
    let column = column.to_lowercase();
    (text.contains("not null") || text.contains("not-null"))
        && (text.contains(&format!(".{column}")) || text.contains(&format!("\"{column}\"")))
}

fn guard_words(fix_type: FixType) -> &'static [&'static str] {
    match fix_type {
        FixType::StockGuard => &["stock", "inventory", "quantity"],
        FixType::EmptyCollectionGuard => &["empty", "items", "len("],
        FixType::ExistenceGuard => &["exist", "not none", "is not null"],
        _ => &[],
    }
}

/// Lowercase alphanumeric tokens of at least three characters.
fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(str::to_lowercase)
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::domain::models::{CauseKind, CauseNode, FixPatternKey, HttpMethod, StrategyType};

    fn violation(msg: &str) -> Violation {
        Violation {
            endpoint: "/products".to_string(),
            http_method: HttpMethod::Post,
            expected_status: 201,
            actual_status: 500,
            error_kind: "IntegrityError".to_string(),
            error_message: msg.to_string(),
            stack_trace: None,
            scenario_name: None,
        }
    }

    fn chain(kind: CauseKind) -> CausalChain {
        CausalChain {
            violation_id: "POST /products -> 201".to_string(),
            root_cause: CauseNode {
                kind,
                ..CauseNode::unknown()
            },
            prior_related_repairs: Vec::new(),
        }
    }

    #[test]
    fn model_uses_prior_then_history() {
        let mut model = ConfidenceModel::new();
        assert!((model.score("DATABASE:make_nullable") - 0.5).abs() < 1e-9);
        model.record("DATABASE:make_nullable", true);
        model.record("DATABASE:make_nullable", true);
        model.record("DATABASE:make_nullable", false);
        assert!((model.score("DATABASE:make_nullable") - 0.6).abs() < 1e-9);
    }

    #[test]
    fn seeding_from_known_fixes() {
        let mut model = ConfidenceModel::new();
        model.seed(&[FixPattern {
            key: FixPatternKey::new("HTTPError", "/products", Some("IntegrityError")),
            strategy_type: StrategyType::Database,
            fix_type: FixType::MakeNullable,
            target_file: "app/models.py".into(),
            old_fragment: String::new(),
            new_fragment: String::new(),
            success_count: 8,
            failure_count: 0,
            updated_at: Utc::now(),
        }]);
        assert!(model.score("DATABASE:make_nullable") > 0.85);
    }

    #[test]
    fn description_overlap_orders_candidates() {
        let ranker = ConfidenceRanker::new(RankingWeights::default());
        let candidates = vec![
            RepairCandidate::new(StrategyType::Database, FixType::AddDefault, "app/models.py", "Give column Product.description a default value"),
            RepairCandidate::new(StrategyType::Database, FixType::MakeNullable, "app/models.py", "Make Product.description nullable: NOT NULL constraint failed on products.description"),
            RepairCandidate::new(StrategyType::Database, FixType::Fallback, "app/models.py", "Delegate repair to the fallback repairer"),
        ];
        let ranked = ranker.rank(
            candidates,
            &chain(CauseKind::IrConstraint),
            &violation("NOT NULL constraint failed: products.description"),
            &ApplicationIr::default(),
            &ConfidenceModel::new(),
        );
        assert_eq!(ranked[0].fix_type, FixType::MakeNullable);
        assert!(ranked[0].confidence >= ranked[1].confidence);
        assert!(ranked.windows(2).all(|w| w[0].confidence >= w[1].confidence - 1e-6));
    }

    #[test]
    fn ties_prefer_the_inferred_strategy() {
        let ranker = ConfidenceRanker::new(RankingWeights::default());
        let candidates = vec![
            RepairCandidate::new(StrategyType::Validation, FixType::RelaxRequired, "a.py", "same words"),
            RepairCandidate::new(StrategyType::ServiceLogic, FixType::ExistenceGuard, "b.py", "same words"),
        ];
        let ranked = ranker.rank(
            candidates,
            &chain(CauseKind::MissingGuard),
            &violation("unrelated"),
            &ApplicationIr::default(),
            &ConfidenceModel::new(),
        );
        assert_eq!(ranked[0].strategy_type, StrategyType::ServiceLogic);
    }

    #[test]
    fn ir_flow_supports_guards() {
        let ir: ApplicationIr = serde_json::from_value(serde_json::json!({
            "flows": [{"name": "add", "method": "POST", "path": "/carts/{id}/items",
                       "preconditions": ["product.stock >= quantity"]}]
        }))
        .unwrap();
        let mut v = violation("insufficient stock");
        v.endpoint = "/carts/{cart_id}/items".to_string();
        let guard = RepairCandidate::new(StrategyType::ServiceLogic, FixType::StockGuard, "s.py", "stock");
        let empty = RepairCandidate::new(StrategyType::ServiceLogic, FixType::EmptyCollectionGuard, "s.py", "empty");
        assert!((ir_context_score(&guard, &v, &ir) - 1.0).abs() < 1e-9);
        assert!(ir_context_score(&empty, &v, &ir).abs() < 1e-9);
    }

    fn product_ir(description: serde_json::Value) -> ApplicationIr {
        serde_json::from_value(serde_json::json!({
            "entities": [{"name": "Product", "fields": [{"name": "name"}, description]}]
        }))
        .unwrap()
    }

    fn column_candidates() -> Vec<RepairCandidate> {
        let params = crate::domain::models::CandidateParams {
            entity: Some("Product".to_string()),
            table: Some("products".to_string()),
            field: Some("description".to_string()),
            ..Default::default()
        };
        vec![
            RepairCandidate::new(StrategyType::Database, FixType::MakeNullable, "app/models/product.py", "Make Product.description nullable: NOT NULL constraint failed on products.description")
                .with_params(params.clone()),
            RepairCandidate::new(StrategyType::Database, FixType::AddDefault, "app/models/product.py", "Give column Product.description a default value")
                .with_params(params),
        ]
    }

    #[test]
    fn declared_column_without_default_is_made_nullable() {
        let ranker = ConfidenceRanker::new(RankingWeights::default());
        let ranked = ranker.rank(
            column_candidates(),
            &chain(CauseKind::IrConstraint),
            &violation("(sqlite3.IntegrityError) NOT NULL constraint failed: products.description"),
            &product_ir(serde_json::json!({"name": "description"})),
            &ConfidenceModel::new(),
        );
        assert_eq!(ranked[0].fix_type, FixType::MakeNullable);
        assert!((ranked[0].ir_context_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn declared_default_supports_add_default() {
        let ir = product_ir(serde_json::json!({"name": "description", "default": ""}));
        let v = violation("NOT NULL constraint failed: products.description");
        let candidates = column_candidates();
        assert!((ir_context_score(&candidates[1], &v, &ir) - 1.0).abs() < 1e-9);
        assert!((ir_context_score(&candidates[0], &v, &ir) - 0.5).abs() < 1e-9);
    }
}

//! Candidate fixes for a classified violation.
//!
//! Every call yields a strategy-appropriate baseline candidate (delegated to
//! the fallback repairer when applied) plus the deterministic candidates the
//! error text and endpoint shape support.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::models::ir::{infer_entity_from_path, to_snake_case};
use crate::domain::models::{
    ApplicationIr, CandidateParams, FixType, HttpMethod, RepairCandidate, StackTrace,
    StrategyType, Violation,
};
use crate::services::causal_chain::has_word;
use crate::services::failure_classifier::action_verb;
use crate::services::repair_procedures::misc::module_for;
use crate::services::repair_procedures::source_edit::functions;
use crate::services::source_locator::SourceLocator;

/// Field names that hold an entity's available stock.
const STOCK_FIELDS: &[&str] = &["stock", "inventory", "stock_quantity", "quantity_available", "available_quantity"];

fn not_null_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)not null constraint failed: (\w+)\.(\w+)").expect("valid not-null regex")
    })
}

fn pg_not_null_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)null value in column "(\w+)"(?: of relation "(\w+)")?"#)
            .expect("valid postgres not-null regex")
    })
}

fn pg_foreign_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)violates foreign key constraint "[^"]*" on table "(\w+)""#)
            .expect("valid postgres foreign key regex")
    })
}

fn loc_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"['"]loc['"]\s*:\s*[\[(]([^\])]*)[\])]"#).expect("valid loc regex")
    })
}

fn quoted_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"['"](\w+)['"]"#).expect("valid quoted regex"))
}

fn field_required_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(\w+)\s*\n\s+(?i:field required)").expect("valid field-required regex")
    })
}

fn undefined_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"name '(\w+)' is not defined").expect("valid name regex"))
}

/// Produces repair candidates for one violation.
pub struct RepairCandidateGenerator<'a> {
    ir: &'a ApplicationIr,
    locator: &'a SourceLocator,
}

impl<'a> RepairCandidateGenerator<'a> {
    /// Generator over the IR and the loaded sources.
    pub fn new(ir: &'a ApplicationIr, locator: &'a SourceLocator) -> Self {
        Self { ir, locator }
    }

    /// Candidates for `violation` under `strategy`; the baseline comes last.
    pub fn generate(
        &self,
        strategy: StrategyType,
        violation: &Violation,
        trace: Option<&StackTrace>,
    ) -> Vec<RepairCandidate> {
        let entity = self.entity(violation);
        let trace_file = trace
            .and_then(|t| t.source_file.as_deref())
            .and_then(|f| self.locator.resolve(f));
        let text = match trace {
            Some(t) => format!("{}\n{}", violation.error_text(), t.raw_text),
            None => violation.error_text(),
        };

        let mut candidates = match strategy {
            StrategyType::Database => self.database(&text, entity.as_deref()),
            StrategyType::Validation => self.validation(&text, entity.as_deref()),
            StrategyType::Route => self.route(violation, entity.as_deref()),
            StrategyType::ServiceLogic => {
                self.service_logic(violation, trace, trace_file.as_deref(), entity.as_deref())
            }
            StrategyType::Import => import(&text, trace, trace_file.as_deref()),
            StrategyType::Key => key(trace, trace_file.as_deref()),
            StrategyType::Attribute | StrategyType::TypeMismatch | StrategyType::Generic => {
                Vec::new()
            }
        };
        candidates.push(self.baseline(strategy, violation, entity.as_deref(), trace_file));
        candidates
    }

    fn entity(&self, violation: &Violation) -> Option<String> {
        self.ir
            .entity_for_path(violation.http_method, &violation.endpoint)
            .map(|e| e.name.clone())
            .or_else(|| infer_entity_from_path(&violation.endpoint))
    }

    fn baseline(
        &self,
        strategy: StrategyType,
        violation: &Violation,
        entity: Option<&str>,
        trace_file: Option<String>,
    ) -> RepairCandidate {
        let layer_file = match strategy {
            StrategyType::Database => entity.and_then(|e| self.locator.model_file(e)),
            StrategyType::Validation => entity.and_then(|e| self.locator.schema_file(e)),
            StrategyType::Route => self.locator.route_file(&violation.endpoint),
            StrategyType::ServiceLogic => entity.and_then(|e| self.locator.service_file(e)),
            _ => None,
        };
        let target = layer_file
            .or(trace_file)
            .or_else(|| self.locator.route_file(&violation.endpoint))
            .map(PathBuf::from)
            .unwrap_or_default();
        RepairCandidate::new(
            strategy,
            FixType::Fallback,
            target,
            format!(
                "Delegate {strategy} repair of {} {} to the fallback repairer",
                violation.http_method, violation.endpoint
            ),
        )
        .with_params(CandidateParams {
            entity: entity.map(str::to_string),
            ..CandidateParams::default()
        })
    }

    // -----------------------------------------------------------------------
    // DATABASE
    // -----------------------------------------------------------------------

    fn database(&self, text: &str, endpoint_entity: Option<&str>) -> Vec<RepairCandidate> {
        let mut out = Vec::new();

        let column = not_null_regex()
            .captures(text)
            .map(|c| (Some(c[1].to_string()), c[2].to_string()))
            .or_else(|| {
                pg_not_null_regex()
                    .captures(text)
                    .map(|c| (c.get(2).map(|m| m.as_str().to_string()), c[1].to_string()))
            });
        if let Some((table, field)) = column {
            let entity = table
                .as_deref()
                .and_then(|t| {
                    self.ir
                        .entity_by_table(t)
                        .map(|e| e.name.clone())
                        .or_else(|| infer_entity_from_path(t))
                })
                .or_else(|| endpoint_entity.map(str::to_string));
            if let Some((entity, file)) =
                entity.and_then(|e| self.locator.model_file(&e).map(|f| (e, f)))
            {
                let location = format!("{}.{field}", table.as_deref().unwrap_or(&entity));
                let params = CandidateParams {
                    entity: Some(entity.clone()),
                    table,
                    field: Some(field.clone()),
                    ..CandidateParams::default()
                };
                out.push(
                    RepairCandidate::new(
                        StrategyType::Database,
                        FixType::MakeNullable,
                        &file,
                        format!("Make {entity}.{field} nullable: NOT NULL constraint failed on {location}"),
                    )
                    .with_params(params.clone()),
                );
                out.push(
                    RepairCandidate::new(
                        StrategyType::Database,
                        FixType::AddDefault,
                        &file,
                        format!("Give column {entity}.{field} a default value"),
                    )
                    .with_params(params),
                );
            }
        }

        let lower = text.to_lowercase();
        if lower.contains("foreign key") {
            for (entity, field) in self.foreign_key_holders(text, endpoint_entity) {
                let Some(file) = self.locator.model_file(&entity) else {
                    continue;
                };
                let target = field.as_deref().map_or_else(
                    || format!("{entity} foreign key"),
                    |f| format!("{entity}.{f}"),
                );
                out.push(
                    RepairCandidate::new(
                        StrategyType::Database,
                        FixType::AddCascade,
                        &file,
                        format!("Cascade deletes through {target}: foreign key constraint failed"),
                    )
                    .with_params(CandidateParams {
                        entity: Some(entity),
                        field,
                        ..CandidateParams::default()
                    }),
                );
            }
        }
        out
    }

    /// Entities (and columns) holding a foreign key implicated by the error.
    fn foreign_key_holders(
        &self,
        text: &str,
        endpoint_entity: Option<&str>,
    ) -> Vec<(String, Option<String>)> {
        if let Some(child) = pg_foreign_key_regex().captures(text) {
            if let Some(e) = self.ir.entity_by_table(&child[1]) {
                return vec![(e.name.clone(), None)];
            }
            if let Some(e) = infer_entity_from_path(&child[1]) {
                return vec![(e, None)];
            }
        }
        let Some(parent) = endpoint_entity else {
            return Vec::new();
        };
        let referencing: Vec<(String, Option<String>)> = self
            .ir
            .entities
            .iter()
            .flat_map(|e| {
                e.fields
                    .iter()
                    .filter(|f| f.references.as_deref().is_some_and(|r| r.eq_ignore_ascii_case(parent)))
                    .map(|f| (e.name.clone(), Some(f.name.clone())))
            })
            .collect();
        if referencing.is_empty() {
            vec![(parent.to_string(), None)]
        } else {
            referencing
        }
    }

    // -----------------------------------------------------------------------
    // VALIDATION
    // -----------------------------------------------------------------------

    fn validation(&self, text: &str, entity: Option<&str>) -> Vec<RepairCandidate> {
        let Some(entity) = entity else {
            return Vec::new();
        };
        let Some(file) = self.locator.schema_file(entity) else {
            return Vec::new();
        };
        rejected_fields(text)
            .into_iter()
            .take(3)
            .map(|field| {
                RepairCandidate::new(
                    StrategyType::Validation,
                    FixType::RelaxRequired,
                    &file,
                    format!("Relax required field {field} on the {entity} request schema to optional"),
                )
                .with_params(CandidateParams {
                    entity: Some(entity.to_string()),
                    field: Some(field),
                    ..CandidateParams::default()
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // ROUTE
    // -----------------------------------------------------------------------

    fn route(&self, violation: &Violation, entity: Option<&str>) -> Vec<RepairCandidate> {
        let Some(file) = self.locator.route_file(&violation.endpoint) else {
            return Vec::new();
        };
        vec![RepairCandidate::new(
            StrategyType::Route,
            FixType::AddHandler,
            &file,
            format!(
                "Add missing {} {} route handler (not found)",
                violation.http_method, violation.endpoint
            ),
        )
        .with_params(CandidateParams {
            entity: entity.map(str::to_string),
            method: Some(violation.http_method),
            path: Some(violation.endpoint.clone()),
            status: Some(violation.expected_status),
            ..CandidateParams::default()
        })]
    }

    // -----------------------------------------------------------------------
    // SERVICE_LOGIC
    // -----------------------------------------------------------------------

    fn service_logic(
        &self,
        violation: &Violation,
        trace: Option<&StackTrace>,
        trace_file: Option<&str>,
        entity: Option<&str>,
    ) -> Vec<RepairCandidate> {
        let names = function_names(violation, trace, entity);
        let Some((file, function)) = self.target_function(&names, entity, trace, trace_file) else {
            return Vec::new();
        };

        let text = violation.error_text().to_lowercase();
        let verb = action_verb(&violation.endpoint);
        let entity_name = entity.unwrap_or("Item").to_string();
        let transition = verb.and_then(|v| {
            self.ir
                .entity(&entity_name)
                .and_then(|e| e.transition(v).map(|t| (e, t)))
        });

        let mut guards: Vec<(FixType, CandidateParams, String)> = Vec::new();
        let stock_guard = || {
            let (holder, field) = self.stock_holder();
            (
                FixType::StockGuard,
                CandidateParams {
                    entity: Some(holder.clone()),
                    field: Some(field.clone()),
                    ..CandidateParams::default()
                },
                format!("Guard {function} against insufficient stock: compare {holder}.{field} to the requested quantity"),
            )
        };
        let transition_guard = || {
            transition.map(|(e, t)| {
                (
                    FixType::StatusTransitionGuard,
                    CandidateParams {
                        entity: Some(e.name.clone()),
                        field: Some(e.status_field.clone().unwrap_or_else(|| "status".to_string())),
                        allowed_states: t.from.clone(),
                        ..CandidateParams::default()
                    },
                    format!(
                        "Guard {function} against invalid status transition: {} requires {} state {}",
                        t.name,
                        e.name,
                        t.from.join(" or ")
                    ),
                )
            })
        };
        let empty_guard = || {
            (
                FixType::EmptyCollectionGuard,
                CandidateParams {
                    entity: Some(entity_name.clone()),
                    field: Some("items".to_string()),
                    ..CandidateParams::default()
                },
                format!("Guard {function} against an empty {entity_name} items collection"),
            )
        };
        let existence_guard = || {
            (
                FixType::ExistenceGuard,
                CandidateParams {
                    entity: Some(entity_name.clone()),
                    ..CandidateParams::default()
                },
                format!("Guard {function} against a missing {entity_name}: not found"),
            )
        };

        if has_word(&text, &["stock", "inventory", "insufficient"]) {
            guards.push(stock_guard());
        }
        if has_word(&text, &["status", "transition", "state", "already"]) || transition.is_some() {
            guards.extend(transition_guard());
        }
        if has_word(&text, &["empty"]) || verb == Some("checkout") {
            guards.push(empty_guard());
        }
        if text.contains("not found") || violation.actual_status == 404 {
            guards.push(existence_guard());
        }
        if guards.is_empty() {
            if violation.http_method == HttpMethod::Post && nested_sub_resource(&violation.endpoint).is_some() {
                guards.push(stock_guard());
            }
            guards.push(existence_guard());
        }

        guards
            .into_iter()
            .map(|(fix_type, mut params, description)| {
                params.function = Some(function.clone());
                RepairCandidate::new(StrategyType::ServiceLogic, fix_type, &file, description)
                    .with_params(params)
            })
            .collect()
    }

    /// The file and function a guard should go into.
    fn target_function(
        &self,
        names: &[String],
        entity: Option<&str>,
        trace: Option<&StackTrace>,
        trace_file: Option<&str>,
    ) -> Option<(String, String)> {
        if let Some(file) = entity.and_then(|e| self.locator.service_file(e)) {
            if let Some(src) = self.locator.source(&file) {
                let defined: Vec<String> = functions(src).into_iter().map(|f| f.name).collect();
                if let Some(name) = names.iter().find(|n| defined.contains(n)) {
                    return Some((file, name.clone()));
                }
            }
        }
        self.locator.function_file(names).or_else(|| {
            let file = trace_file?;
            let function = trace.and_then(|t| t.function.clone())?;
            Some((file.to_string(), function))
        })
    }

    /// The entity and column that hold available stock.
    fn stock_holder(&self) -> (String, String) {
        self.ir
            .entities
            .iter()
            .find_map(|e| {
                e.fields
                    .iter()
                    .find(|f| STOCK_FIELDS.contains(&f.name.as_str()))
                    .map(|f| (e.name.clone(), f.name.clone()))
            })
            .unwrap_or_else(|| ("Product".to_string(), "stock".to_string()))
    }
}

// ---------------------------------------------------------------------------
// IMPORT / KEY
// ---------------------------------------------------------------------------

fn import(text: &str, trace: Option<&StackTrace>, trace_file: Option<&str>) -> Vec<RepairCandidate> {
    let (Some(file), Some(caps)) = (trace_file, undefined_name_regex().captures(text)) else {
        return Vec::new();
    };
    let symbol = caps[1].to_string();
    let Some(module) = module_for(&symbol) else {
        return Vec::new();
    };
    vec![RepairCandidate::new(
        StrategyType::Import,
        FixType::AddImport,
        file,
        format!("Import undefined name {symbol} from {module}"),
    )
    .with_params(CandidateParams {
        symbol: Some(symbol),
        line: trace.and_then(|t| t.source_line),
        ..CandidateParams::default()
    })]
}

fn key(trace: Option<&StackTrace>, trace_file: Option<&str>) -> Vec<RepairCandidate> {
    let (Some(trace), Some(file)) = (trace, trace_file) else {
        return Vec::new();
    };
    let key = trace
        .exception_message
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .to_string();
    if key.is_empty() {
        return Vec::new();
    }
    vec![RepairCandidate::new(
        StrategyType::Key,
        FixType::SafeKeyAccess,
        file,
        format!("Read missing key {key} with .get() instead of subscript (KeyError)"),
    )
    .with_params(CandidateParams {
        symbol: Some(key),
        line: trace.source_line,
        ..CandidateParams::default()
    })]
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Request fields a validation error reports as missing or invalid.
fn rejected_fields(text: &str) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    let mut push = |f: &str| {
        if f != "body" && f != "query" && f != "path" && !fields.iter().any(|x| x == f) {
            fields.push(f.to_string());
        }
    };
    for caps in loc_regex().captures_iter(text) {
        if let Some(last) = quoted_regex().captures_iter(&caps[1]).last() {
            push(&last[1]);
        }
    }
    for caps in field_required_regex().captures_iter(text) {
        push(&caps[1]);
    }
    fields
}

/// The literal segment following a path parameter (`items` in
/// `/carts/{id}/items`), when it is not an action verb.
fn nested_sub_resource(path: &str) -> Option<&str> {
    let segments: Vec<&str> = path.trim_end_matches('/').split('/').collect();
    segments
        .windows(2)
        .rev()
        .find(|w| w[0].starts_with('{') && !w[1].starts_with('{') && !w[1].is_empty())
        .map(|w| w[1])
        .filter(|s| action_verb(&format!("/{s}")).is_none())
}

/// Function names that plausibly implement `violation`'s endpoint, most
/// specific first.
fn function_names(
    violation: &Violation,
    trace: Option<&StackTrace>,
    entity: Option<&str>,
) -> Vec<String> {
    let snake = entity.map(to_snake_case).unwrap_or_default();
    let mut names: Vec<String> = Vec::new();

    if let Some(verb) = action_verb(&violation.endpoint) {
        names.push(verb.to_string());
        names.push(format!("{verb}_{snake}"));
    } else if let Some(sub) = nested_sub_resource(&violation.endpoint) {
        let item = infer_entity_from_path(&format!("/{sub}"))
            .map(|e| to_snake_case(&e))
            .unwrap_or_else(|| sub.to_string());
        let prefixes: &[&str] = match violation.http_method {
            HttpMethod::Post => &["add", "create"],
            HttpMethod::Delete => &["remove", "delete"],
            HttpMethod::Put | HttpMethod::Patch => &["update"],
            HttpMethod::Get => &["get", "list"],
        };
        for prefix in prefixes {
            names.push(format!("{prefix}_{item}"));
            names.push(format!("{prefix}_{sub}"));
        }
    } else {
        let prefix = match violation.http_method {
            HttpMethod::Post => "create",
            HttpMethod::Delete => "delete",
            HttpMethod::Put | HttpMethod::Patch => "update",
            HttpMethod::Get => "get",
        };
        names.push(format!("{prefix}_{snake}"));
        names.push(prefix.to_string());
    }
    if let Some(function) = trace.and_then(|t| t.function.clone()) {
        names.push(function);
    }
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn locator() -> SourceLocator {
        let mut sources = BTreeMap::new();
        sources.insert(
            "app/models.py".to_string(),
            "class Product(Base):\n    __tablename__ = \"products\"\n    description = Column(String, nullable=False)\n    stock = Column(Integer)\n".to_string(),
        );
        sources.insert(
            "app/schemas.py".to_string(),
            "class ProductCreate(BaseModel):\n    name: str\n    description: str\n".to_string(),
        );
        sources.insert(
            "app/services/cart_service.py".to_string(),
            "class CartService:\n    def add_item(self, cart_id, product_id, quantity):\n        product = self.db.get(Product, product_id)\n\n    def checkout(self, cart_id):\n        cart = self.db.get(Cart, cart_id)\n".to_string(),
        );
        sources.insert(
            "app/routes/products.py".to_string(),
            "router = APIRouter(prefix=\"/products\")\n".to_string(),
        );
        SourceLocator::new(sources)
    }

    fn violation(method: HttpMethod, endpoint: &str, expected: u16, actual: u16, msg: &str) -> Violation {
        Violation {
            endpoint: endpoint.to_string(),
            http_method: method,
            expected_status: expected,
            actual_status: actual,
            error_kind: "HTTPError".to_string(),
            error_message: msg.to_string(),
            stack_trace: None,
            scenario_name: None,
        }
    }

    fn fix_types(candidates: &[RepairCandidate]) -> Vec<FixType> {
        candidates.iter().map(|c| c.fix_type).collect()
    }

    #[test]
    fn not_null_failure_targets_the_model_column() {
        let ir = ApplicationIr::default();
        let loc = locator();
        let generator = RepairCandidateGenerator::new(&ir, &loc);
        let v = violation(
            HttpMethod::Post,
            "/products",
            201,
            500,
            "sqlite3.IntegrityError: NOT NULL constraint failed: products.description",
        );
        let candidates = generator.generate(StrategyType::Database, &v, None);
        assert_eq!(
            fix_types(&candidates),
            vec![FixType::MakeNullable, FixType::AddDefault, FixType::Fallback]
        );
        let top = &candidates[0];
        assert_eq!(top.target_file, PathBuf::from("app/models.py"));
        assert_eq!(top.params.entity.as_deref(), Some("Product"));
        assert_eq!(top.params.field.as_deref(), Some("description"));
        assert_eq!(candidates[2].target_file, PathBuf::from("app/models.py"));
    }

    #[test]
    fn insufficient_stock_guards_the_add_item_function() {
        let ir = ApplicationIr::default();
        let loc = locator();
        let generator = RepairCandidateGenerator::new(&ir, &loc);
        let v = violation(HttpMethod::Post, "/carts/{cart_id}/items", 201, 422, "Insufficient stock");
        let candidates = generator.generate(StrategyType::ServiceLogic, &v, None);
        let stock = &candidates[0];
        assert_eq!(stock.fix_type, FixType::StockGuard);
        assert_eq!(stock.target_file, PathBuf::from("app/services/cart_service.py"));
        assert_eq!(stock.params.function.as_deref(), Some("add_item"));
        assert_eq!(stock.params.entity.as_deref(), Some("Product"));
        assert_eq!(candidates.last().map(|c| c.fix_type), Some(FixType::Fallback));
    }

    #[test]
    fn checkout_uses_ir_transition_states() {
        let ir: ApplicationIr = serde_json::from_value(serde_json::json!({
            "entities": [{"name": "Cart", "status_field": "status",
                "transitions": [{"name": "checkout", "from": ["OPEN"], "to": "CHECKED_OUT"}]}]
        }))
        .unwrap();
        let loc = locator();
        let generator = RepairCandidateGenerator::new(&ir, &loc);
        let v = violation(HttpMethod::Post, "/carts/{id}/checkout", 200, 500, "Internal Server Error");
        let candidates = generator.generate(StrategyType::ServiceLogic, &v, None);
        assert_eq!(
            fix_types(&candidates),
            vec![FixType::StatusTransitionGuard, FixType::EmptyCollectionGuard, FixType::Fallback]
        );
        assert_eq!(candidates[0].params.allowed_states, vec!["OPEN".to_string()]);
        assert_eq!(candidates[0].params.function.as_deref(), Some("checkout"));
    }

    #[test]
    fn validation_fields_come_from_error_locations() {
        let ir = ApplicationIr::default();
        let loc = locator();
        let generator = RepairCandidateGenerator::new(&ir, &loc);
        let v = violation(
            HttpMethod::Post,
            "/products",
            201,
            422,
            r#"{"detail":[{"type":"missing","loc":["body","description"],"msg":"Field required"}]}"#,
        );
        let candidates = generator.generate(StrategyType::Validation, &v, None);
        assert_eq!(candidates[0].fix_type, FixType::RelaxRequired);
        assert_eq!(candidates[0].params.field.as_deref(), Some("description"));
        assert_eq!(candidates[0].target_file, PathBuf::from("app/schemas.py"));
    }

    #[test]
    fn unknown_strategies_still_get_a_baseline() {
        let ir = ApplicationIr::default();
        let loc = SourceLocator::default();
        let generator = RepairCandidateGenerator::new(&ir, &loc);
        let v = violation(HttpMethod::Get, "/reports", 200, 500, "boom");
        let candidates = generator.generate(StrategyType::Generic, &v, None);
        assert_eq!(fix_types(&candidates), vec![FixType::Fallback]);
        assert_eq!(candidates[0].target_file, PathBuf::new());
    }

    #[test]
    fn key_errors_use_trace_location() {
        let ir = ApplicationIr::default();
        let loc = locator();
        let generator = RepairCandidateGenerator::new(&ir, &loc);
        let trace = StackTrace {
            exception_kind: "KeyError".to_string(),
            exception_message: "'price'".to_string(),
            source_file: Some("/srv/app/services/cart_service.py".to_string()),
            source_line: Some(3),
            function: Some("add_item".to_string()),
            raw_text: String::new(),
        };
        let v = violation(HttpMethod::Post, "/carts/{id}/items", 201, 500, "");
        let candidates = generator.generate(StrategyType::Key, &v, Some(&trace));
        assert_eq!(candidates[0].fix_type, FixType::SafeKeyAccess);
        assert_eq!(candidates[0].params.symbol.as_deref(), Some("price"));
        assert_eq!(candidates[0].target_file, PathBuf::from("app/services/cart_service.py"));
    }

    #[test]
    fn function_name_heuristics() {
        let v = violation(HttpMethod::Delete, "/carts/{id}/items/{item_id}", 204, 500, "");
        assert_eq!(
            function_names(&v, None, Some("Cart"))[..2],
            ["remove_item".to_string(), "remove_items".to_string()]
        );
        let v = violation(HttpMethod::Post, "/orders", 201, 500, "");
        assert_eq!(function_names(&v, None, Some("Order"))[0], "create_order");
    }
}

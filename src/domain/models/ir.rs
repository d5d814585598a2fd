//! Typed, read-only view of the target application's intermediate
//! representation (IR): entities, endpoints, and business flows.
//!
//! The IR is supplied by an upstream collaborator and is only used to bias
//! classification and ranking. Every optional attribute is an explicit
//! `Option` with a documented default, and lookups return `None` instead of
//! guessing.

use serde::{Deserialize, Serialize};

use super::violation::HttpMethod;

/// A field of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name as it appears in the model and request bodies.
    pub name: String,
    /// Loose type tag (`string`, `int`, `decimal`, `bool`, ...).
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    /// Defaults to `true`.
    #[serde(default = "default_true")]
    pub required: bool,
    /// Values must be unique across rows.
    #[serde(default)]
    pub unique: bool,
    /// The column accepts NULL.
    #[serde(default)]
    pub nullable: bool,
    /// Entity this field references, for foreign keys.
    #[serde(default)]
    pub references: Option<String>,
    /// Declared default value, if the model has one.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

fn default_field_type() -> String {
    "string".to_string()
}

fn default_true() -> bool {
    true
}

/// A permitted state change of an entity's status field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDef {
    /// Action name, usually the endpoint verb (`checkout`, `pay`).
    pub name: String,
    /// States the action may start from.
    pub from: Vec<String>,
    /// State after the action.
    pub to: String,
}

/// A domain entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Class name, e.g. `Product`.
    pub name: String,
    /// Table name; defaults to the lowercase plural of `name`.
    #[serde(default)]
    pub table: Option<String>,
    /// Declared fields.
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Name of the status field, when the entity has a lifecycle.
    #[serde(default)]
    pub status_field: Option<String>,
    /// Every state the status field may hold.
    #[serde(default)]
    pub states: Vec<String>,
    /// Allowed transitions between `states`.
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
}

impl EntityDef {
    /// Field by exact name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Declared table name, or the lowercase plural of the class name.
    pub fn table_name(&self) -> String {
        self.table
            .clone()
            .unwrap_or_else(|| format!("{}s", self.name.to_lowercase()))
    }

    /// Transition whose action name is `action`.
    pub fn transition(&self, action: &str) -> Option<&TransitionDef> {
        self.transitions.iter().find(|t| t.name == action)
    }
}

/// An HTTP endpoint exposed by the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDef {
    /// HTTP verb.
    pub method: HttpMethod,
    /// Path template, e.g. `/carts/{id}/checkout`.
    pub path: String,
    /// Entity the endpoint operates on.
    #[serde(default)]
    pub entity: Option<String>,
    /// Defaults to the conventional status for the method.
    #[serde(default)]
    pub expected_status: Option<u16>,
    /// Request-body fields, by name; types come from the entity.
    #[serde(default)]
    pub request_fields: Vec<String>,
}

impl EndpointDef {
    /// Expected success status, falling back to method conventions.
    pub fn success_status(&self) -> u16 {
        self.expected_status.unwrap_or(match self.method {
            HttpMethod::Post => 201,
            HttpMethod::Delete => 204,
            _ => 200,
        })
    }
}

/// A business flow attached to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDef {
    /// Flow name.
    pub name: String,
    /// HTTP verb of the endpoint the flow runs behind.
    pub method: HttpMethod,
    /// Path template of that endpoint.
    pub path: String,
    /// Entity the flow mutates.
    #[serde(default)]
    pub entity: Option<String>,
    /// Conditions that must hold before the flow runs, in prose.
    #[serde(default)]
    pub preconditions: Vec<String>,
    /// Conditions the flow guarantees afterwards.
    #[serde(default)]
    pub postconditions: Vec<String>,
}

/// The application's IR.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationIr {
    /// Domain entities.
    #[serde(default)]
    pub entities: Vec<EntityDef>,
    /// Exposed endpoints.
    #[serde(default)]
    pub endpoints: Vec<EndpointDef>,
    /// Business flows.
    #[serde(default)]
    pub flows: Vec<FlowDef>,
}

impl ApplicationIr {
    /// True when the IR declares nothing at all.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.endpoints.is_empty() && self.flows.is_empty()
    }

    /// Entity by name, case-insensitively.
    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    /// Entity by table name.
    pub fn entity_by_table(&self, table: &str) -> Option<&EntityDef> {
        self.entities
            .iter()
            .find(|e| e.table_name().eq_ignore_ascii_case(table))
    }

    /// Endpoint matching a method and path template. Parameter names are
    /// ignored, so `/carts/{id}` matches `/carts/{cart_id}`.
    pub fn endpoint(&self, method: HttpMethod, path: &str) -> Option<&EndpointDef> {
        let wanted = normalize_path(path);
        self.endpoints
            .iter()
            .find(|e| e.method == method && normalize_path(&e.path) == wanted)
    }

    /// Flow bound to a method and path template.
    pub fn flow_for(&self, method: HttpMethod, path: &str) -> Option<&FlowDef> {
        let wanted = normalize_path(path);
        self.flows
            .iter()
            .find(|f| f.method == method && normalize_path(&f.path) == wanted)
    }

    /// Entity for an endpoint path: the endpoint's declared entity, else the
    /// entity inferred from the first path segment.
    pub fn entity_for_path(&self, method: HttpMethod, path: &str) -> Option<&EntityDef> {
        if let Some(name) = self.endpoint(method, path).and_then(|e| e.entity.as_deref()) {
            if let Some(entity) = self.entity(name) {
                return Some(entity);
            }
        }
        infer_entity_from_path(path).and_then(|name| self.entity(&name))
    }
}

/// Replace every `{param}` segment with `{}` so templates compare by shape.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    trimmed
        .split('/')
        .map(|seg| {
            if seg.starts_with('{') && seg.ends_with('}') {
                "{}"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Best-effort entity name from an endpoint's first literal path segment.
///
/// Strips a trailing plural naively (`categories` -> `Category`,
/// `carts` -> `Cart`). Irregular plurals (`people`, `indices`) are not
/// handled; callers must treat the result as a hint, not a fact.
pub fn infer_entity_from_path(path: &str) -> Option<String> {
    let segment = path
        .split('/')
        .find(|s| !s.is_empty() && !s.starts_with('{') && !is_version_segment(s))?;
    let lower = segment.to_lowercase().replace('-', "_");
    let singular = if let Some(stem) = lower.strip_suffix("ies") {
        format!("{stem}y")
    } else if lower.ends_with("sses") || lower.ends_with("xes") || lower.ends_with("ches") {
        lower[..lower.len() - 2].to_string()
    } else if lower.ends_with('s') && !lower.ends_with("ss") {
        lower[..lower.len() - 1].to_string()
    } else {
        lower
    };
    Some(to_pascal_case(&singular))
}

fn is_version_segment(s: &str) -> bool {
    s == "api" || (s.starts_with('v') && s[1..].chars().all(|c| c.is_ascii_digit()) && s.len() > 1)
}

/// `order_item` -> `OrderItem`.
pub fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `OrderItem` -> `order_item`.
pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ir() -> ApplicationIr {
        serde_json::from_value(serde_json::json!({
            "entities": [
                {"name": "Product", "fields": [
                    {"name": "name"},
                    {"name": "price", "type": "decimal"},
                    {"name": "stock", "type": "int"}
                ]},
                {"name": "Cart", "status_field": "status",
                 "states": ["OPEN", "CHECKED_OUT"],
                 "transitions": [{"name": "checkout", "from": ["OPEN"], "to": "CHECKED_OUT"}]}
            ],
            "endpoints": [
                {"method": "POST", "path": "/carts/{cart_id}/items", "entity": "Cart"},
                {"method": "GET", "path": "/products/{product_id}"}
            ],
            "flows": [
                {"name": "add item", "method": "POST", "path": "/carts/{cart_id}/items",
                 "preconditions": ["product.stock >= quantity"]}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn endpoint_lookup_ignores_param_names() {
        let ir = sample_ir();
        assert!(ir.endpoint(HttpMethod::Post, "/carts/{id}/items").is_some());
        assert!(ir.endpoint(HttpMethod::Get, "/carts/{id}/items").is_none());
        assert!(ir.flow_for(HttpMethod::Post, "/carts/{id}/items/").is_some());
    }

    #[test]
    fn entity_for_path_prefers_declared_entity() {
        let ir = sample_ir();
        let cart = ir.entity_for_path(HttpMethod::Post, "/carts/{id}/items").unwrap();
        assert_eq!(cart.name, "Cart");
        let product = ir.entity_for_path(HttpMethod::Get, "/products/{id}").unwrap();
        assert_eq!(product.name, "Product");
        assert_eq!(product.table_name(), "products");
    }

    #[test]
    fn infers_entity_names() {
        assert_eq!(infer_entity_from_path("/products/{id}").as_deref(), Some("Product"));
        assert_eq!(infer_entity_from_path("/api/v1/categories").as_deref(), Some("Category"));
        assert_eq!(infer_entity_from_path("/order-items").as_deref(), Some("OrderItem"));
        assert_eq!(infer_entity_from_path("/addresses").as_deref(), Some("Address"));
        assert_eq!(infer_entity_from_path("/"), None);
    }

    #[test]
    fn field_defaults() {
        let ir = sample_ir();
        let price = ir.entity("product").unwrap().field("price").unwrap();
        assert!(price.required);
        assert!(!price.nullable);
        assert_eq!(price.field_type, "decimal");
    }

    #[test]
    fn case_conversions() {
        assert_eq!(to_snake_case("OrderItem"), "order_item");
        assert_eq!(to_pascal_case("order_item"), "OrderItem");
    }
}

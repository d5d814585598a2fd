//! SERVICE_LOGIC procedures: guard clauses injected into business functions.
//!
//! A guard goes right after the statement that binds the guarded variable
//! (skipping an existing `None` check), or after the signature and docstring
//! when the variable is a parameter. Each guard carries a `# guard: <kind>`
//! marker so re-applying it is detected.

use std::sync::OnceLock;

use regex::Regex;

use super::source_edit::{
    after_assignment, body_contains, ensure_import, find_assignment, find_function,
    find_function_like, leading_whitespace, split_lines, FunctionSpan,
};
use super::{insert_after_anchor, ProcedureError, ProcedureResult};
use crate::domain::models::ir::to_snake_case;
use crate::domain::models::{CandidateParams, FixType};

fn quantity_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\w+)\.(quantity|qty)\b").expect("valid quantity regex"))
}

/// Insert the guard clause for `fix_type` at the top of `params.function`'s body.
pub fn insert_guard(source: &str, fix_type: FixType, params: &CandidateParams) -> ProcedureResult {
    let function = params
        .function
        .as_deref()
        .ok_or_else(|| ProcedureError::NotApplicable("no target function".to_string()))?;
    let span = find_function(source, function)
        .or_else(|| find_function_like(source, &[function.to_string()]))
        .ok_or_else(|| {
            ProcedureError::NotApplicable(format!("function '{function}' not found"))
        })?;

    let marker = format!("# guard: {fix_type}");
    if body_contains(source, &span, &marker) {
        return Err(ProcedureError::AlreadyApplied(marker));
    }

    let entity = params.entity.clone().unwrap_or_else(|| match fix_type {
        FixType::StockGuard => "Product".to_string(),
        _ => "Item".to_string(),
    });
    let var = to_snake_case(&entity);

    let (condition, status, detail) = match fix_type {
        FixType::StockGuard => {
            let stock = params.field.as_deref().unwrap_or("stock");
            let quantity = quantity_expr(source, &span).ok_or_else(|| {
                ProcedureError::NotApplicable(format!("no quantity in scope of '{}'", span.name))
            })?;
            (
                format!("{var} is not None and {var}.{stock} < {quantity}"),
                422,
                "Insufficient stock".to_string(),
            )
        }
        FixType::StatusTransitionGuard => {
            if params.allowed_states.is_empty() {
                return Err(ProcedureError::NotApplicable(
                    "no allowed states for transition".to_string(),
                ));
            }
            let field = params.field.as_deref().unwrap_or("status");
            let states = params
                .allowed_states
                .iter()
                .map(|s| format!("\"{s}\""))
                .collect::<Vec<_>>()
                .join(", ");
            (
                format!(
                    "{var} is not None and getattr({var}.{field}, \"value\", {var}.{field}) not in ({states},)"
                ),
                422,
                format!("Cannot {} {entity} in its current status", span.name),
            )
        }
        FixType::EmptyCollectionGuard => {
            let field = params.field.as_deref().unwrap_or("items");
            (
                format!("{var} is not None and not {var}.{field}"),
                422,
                format!("{entity} is empty"),
            )
        }
        FixType::ExistenceGuard => {
            let lines = split_lines(source);
            let body = lines.get(span.body_start..span.end).unwrap_or_default();
            let checked = body.iter().any(|l| {
                let t = l.trim();
                t.starts_with(&format!("if {var} is None")) || t.starts_with(&format!("if not {var}"))
            });
            if checked {
                return Err(ProcedureError::AlreadyApplied(format!("{var} existence check")));
            }
            (format!("{var} is None"), 404, format!("{entity} not found"))
        }
        other => return Err(ProcedureError::Unsupported(other)),
    };

    let (at, indent) = insertion_point(source, &span, &var, fix_type)?;
    let guard = vec![
        format!("{indent}{marker}"),
        format!("{indent}if {condition}:"),
        format!("{indent}    raise HTTPException(status_code={status}, detail=\"{detail}\")"),
    ];

    let mut edit = insert_after_anchor(source, at, &guard);
    edit.new_source = ensure_import(&edit.new_source, "fastapi", "HTTPException");
    Ok(edit)
}

/// Where the guard goes and with which indentation.
fn insertion_point(
    source: &str,
    span: &FunctionSpan,
    var: &str,
    fix_type: FixType,
) -> Result<(usize, String), ProcedureError> {
    if let Some(line) = find_assignment(source, span, var) {
        let indent = leading_whitespace(split_lines(source)[line]).to_string();
        let at = if fix_type == FixType::ExistenceGuard {
            super::source_edit::statement_end(&split_lines(source), line) + 1
        } else {
            after_assignment(source, line, var)
        };
        return Ok((at, indent));
    }
    if span.params.iter().any(|p| p == var) {
        return Ok((span.body_start, span.body_indent.clone()));
    }
    Err(ProcedureError::NotApplicable(format!(
        "'{var}' is not bound in '{}'",
        span.name
    )))
}

/// The expression holding the requested quantity: a `quantity` parameter, or
/// an attribute like `item.quantity` used in the function.
fn quantity_expr(source: &str, span: &FunctionSpan) -> Option<String> {
    if let Some(p) = span.params.iter().find(|p| *p == "quantity" || *p == "qty") {
        return Some(p.clone());
    }
    let text = split_lines(source)[span.def_line..span.end].join("\n");
    quantity_attr_regex()
        .captures_iter(&text)
        .find(|c| &c[1] != "self")
        .map(|c| format!("{}.{}", &c[1], &c[2]))
}

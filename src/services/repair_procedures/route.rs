//! ROUTE procedure: synthesize a missing handler on the module's router.

use std::sync::OnceLock;

use regex::Regex;

use super::source_edit::{ensure_import, functions, split_lines, statement_end};
use super::{insert_after_anchor, ProcedureError, ProcedureResult};
use crate::domain::models::ir::{infer_entity_from_path, normalize_path, to_snake_case};
use crate::domain::models::{CandidateParams, HttpMethod};

fn router_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\w+)\s*=\s*(APIRouter|FastAPI)\(").expect("valid router regex")
    })
}

fn prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"prefix\s*=\s*["']([^"']*)["']"#).expect("valid prefix regex")
    })
}

fn decorator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"@(\w+)\.(get|post|put|patch|delete)\(\s*["']([^"']*)["']"#)
            .expect("valid decorator regex")
    })
}

fn path_param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("valid path param regex"))
}

/// The router variable and its prefix. `APIRouter` wins over `FastAPI`.
fn find_router(source: &str) -> Option<(String, String)> {
    let lines = split_lines(source);
    let mut app = None;
    for (i, line) in lines.iter().enumerate() {
        let Some(caps) = router_regex().captures(line) else {
            continue;
        };
        let stmt = lines[i..=statement_end(&lines, i)].join(" ");
        let prefix = prefix_regex()
            .captures(&stmt)
            .map(|p| p[1].to_string())
            .unwrap_or_default();
        if &caps[2] == "APIRouter" {
            return Some((caps[1].to_string(), prefix));
        }
        app.get_or_insert((caps[1].to_string(), prefix));
    }
    app
}

/// Append a database-backed handler for `params.method params.path`.
///
/// Supports `GET` on collections and single items and `DELETE` on single
/// items; anything needing a request schema is left to the fallback.
pub fn add_handler(source: &str, params: &CandidateParams) -> ProcedureResult {
    let method = params
        .method
        .ok_or_else(|| ProcedureError::NotApplicable("no method given".to_string()))?;
    let path = params
        .path
        .as_deref()
        .ok_or_else(|| ProcedureError::NotApplicable("no path given".to_string()))?;
    let (router, prefix) = find_router(source)
        .ok_or_else(|| ProcedureError::NotApplicable("no router in module".to_string()))?;

    let route = match path.strip_prefix(prefix.as_str()) {
        Some(rest) if !prefix.is_empty() => rest.to_string(),
        _ => path.to_string(),
    };

    let wanted = normalize_path(&route);
    let exists = decorator_regex().captures_iter(source).any(|caps| {
        caps[1] == *router
            && caps[2].eq_ignore_ascii_case(method.as_str())
            && normalize_path(&caps[3]) == wanted
    });
    if exists {
        return Err(ProcedureError::AlreadyApplied(format!("{method} {path}")));
    }

    let entity = params
        .entity
        .clone()
        .or_else(|| infer_entity_from_path(path))
        .ok_or_else(|| ProcedureError::NotApplicable("no entity for path".to_string()))?;
    if !Regex::new(&format!(r"\b{}\b", regex::escape(&entity)))
        .is_ok_and(|re| re.is_match(source))
    {
        return Err(ProcedureError::NotApplicable(format!(
            "model '{entity}' is not available in module"
        )));
    }
    if !source.contains("get_db") || !source.contains("Session") {
        return Err(ProcedureError::NotApplicable(
            "no session dependency in module".to_string(),
        ));
    }

    let path_params: Vec<String> = path_param_regex()
        .captures_iter(&route)
        .map(|c| c[1].to_string())
        .collect();
    if path_params.len() > 1 {
        return Err(ProcedureError::NotApplicable(
            "nested resource handlers need a schema".to_string(),
        ));
    }
    let id_param = path_params.first();
    let id_type = if source.to_lowercase().contains("uuid") { "str" } else { "int" };
    let snake = to_snake_case(&entity);
    let is_async = source.contains("async def");
    let def = if is_async { "async def" } else { "def" };

    let (base_name, status, body) = match (method, id_param) {
        (HttpMethod::Get, Some(id)) => (
            format!("get_{snake}"),
            params.status.unwrap_or(200),
            vec![
                format!("    item = db.get({entity}, {id})"),
                "    if item is None:".to_string(),
                format!("        raise HTTPException(status_code=404, detail=\"{entity} not found\")"),
                "    return item".to_string(),
            ],
        ),
        (HttpMethod::Get, None) => (
            format!("list_{snake}s"),
            params.status.unwrap_or(200),
            vec![format!("    return db.query({entity}).all()")],
        ),
        (HttpMethod::Delete, Some(id)) => (
            format!("delete_{snake}"),
            params.status.unwrap_or(204),
            vec![
                format!("    item = db.get({entity}, {id})"),
                "    if item is None:".to_string(),
                format!("        raise HTTPException(status_code=404, detail=\"{entity} not found\")"),
                "    db.delete(item)".to_string(),
                "    db.commit()".to_string(),
                "    return None".to_string(),
            ],
        ),
        _ => {
            return Err(ProcedureError::NotApplicable(format!(
                "cannot synthesize {method} handler without a schema"
            )))
        }
    };

    let taken: Vec<String> = functions(source).into_iter().map(|f| f.name).collect();
    let name = if taken.contains(&base_name) {
        format!("{base_name}_route")
    } else {
        base_name
    };

    let signature_params = match id_param {
        Some(id) => format!("{id}: {id_type}, db: Session = Depends(get_db)"),
        None => "db: Session = Depends(get_db)".to_string(),
    };
    let mut block = vec![
        String::new(),
        String::new(),
        format!(
            "@{router}.{}(\"{route}\", status_code={status})",
            method.as_str().to_lowercase()
        ),
        format!("{def} {name}({signature_params}):"),
    ];
    block.extend(body);

    let end = source.lines().count();
    let mut edit = insert_after_anchor(source, end, &block);
    edit.new_source = ensure_import(&edit.new_source, "fastapi", "Depends");
    if edit.new_fragment.contains("HTTPException") {
        edit.new_source = ensure_import(&edit.new_source, "fastapi", "HTTPException");
    }
    Ok(edit)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTES: &str = r#"from fastapi import APIRouter, Depends
from sqlalchemy.orm import Session

from app.database import get_db
from app.models import Product

router = APIRouter(prefix="/products", tags=["products"])


@router.get("/", status_code=200)
def list_products(db: Session = Depends(get_db)):
    return db.query(Product).all()
"#;

    fn params(method: HttpMethod, path: &str) -> CandidateParams {
        CandidateParams {
            entity: Some("Product".to_string()),
            method: Some(method),
            path: Some(path.to_string()),
            ..CandidateParams::default()
        }
    }

    #[test]
    fn appends_get_by_id_handler() {
        let edit = add_handler(ROUTES, &params(HttpMethod::Get, "/products/{product_id}")).unwrap();
        assert!(edit.new_source.contains(
            "@router.get(\"/{product_id}\", status_code=200)\ndef get_product(product_id: int, db: Session = Depends(get_db)):\n    item = db.get(Product, product_id)\n"
        ));
        assert!(edit.new_source.contains("from fastapi import APIRouter, Depends, HTTPException\n"));
        assert!(edit.new_fragment.starts_with("    return db.query(Product).all()\n"));

        let again = add_handler(&edit.new_source, &params(HttpMethod::Get, "/products/{id}"));
        assert!(matches!(again, Err(ProcedureError::AlreadyApplied(_))));
    }

    #[test]
    fn existing_route_is_detected() {
        let err = add_handler(ROUTES, &params(HttpMethod::Get, "/products/")).unwrap_err();
        assert!(matches!(err, ProcedureError::AlreadyApplied(_)));
    }

    #[test]
    fn delete_handler_defaults_to_204() {
        let edit = add_handler(ROUTES, &params(HttpMethod::Delete, "/products/{id}")).unwrap();
        assert!(edit.new_source.contains("@router.delete(\"/{id}\", status_code=204)"));
        assert!(edit.new_source.contains("    db.delete(item)\n    db.commit()\n"));
    }

    #[test]
    fn post_needs_a_schema() {
        let err = add_handler(ROUTES, &params(HttpMethod::Post, "/products")).unwrap_err();
        assert!(matches!(err, ProcedureError::NotApplicable(_)));
    }

    #[test]
    fn module_without_router() {
        let err = add_handler("x = 1\n", &params(HttpMethod::Get, "/products/{id}")).unwrap_err();
        assert!(matches!(err, ProcedureError::NotApplicable(_)));
    }
}

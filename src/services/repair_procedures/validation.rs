//! VALIDATION procedures: relax a required schema field to optional.

use std::sync::OnceLock;

use regex::Regex;

use super::source_edit::{
    classes, ensure_import, find_field_line, replace_lines, split_lines, statement_end,
};
use super::{ProcedureError, ProcedureResult, TextEdit};
use crate::domain::models::CandidateParams;

/// Class-name suffixes checked first, in order: request schemas before read
/// schemas.
const SCHEMA_SUFFIXES: &[&str] = &["Create", "Base", "In", "Update", "Request", ""];

fn annotated_field_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^(\s*)(\w+)\s*:\s*(.+?)\s*(?:=\s*(.+?))?\s*$").expect("valid field regex")
    })
}

/// `name: str` -> `name: Optional[str] = None`, in the entity's request schema.
pub fn relax_required(source: &str, params: &CandidateParams) -> ProcedureResult {
    let field = params
        .field
        .as_deref()
        .ok_or_else(|| ProcedureError::NotApplicable("no field named".to_string()))?;
    let lines = split_lines(source);
    let line = schema_field_line(source, params.entity.as_deref(), field).ok_or_else(|| {
        ProcedureError::NotApplicable(format!("no schema declares '{field}'"))
    })?;
    let end = statement_end(&lines, line);
    let stmt = lines[line..=end].join("\n");

    let caps = annotated_field_regex()
        .captures(&stmt)
        .ok_or_else(|| ProcedureError::NotApplicable(format!("'{field}' has no annotation")))?;
    let indent = &caps[1];
    let annotation = caps[3].trim();
    let default = caps.get(4).map(|m| m.as_str().trim());

    let already_optional = annotation.starts_with("Optional[")
        || annotation.contains("| None")
        || annotation.contains("None |");
    let new_default = match default {
        None => "None".to_string(),
        Some("...") => "None".to_string(),
        Some(d) if d.starts_with("Field(") => relax_field_call(d)
            .ok_or_else(|| ProcedureError::AlreadyApplied(stmt.clone()))?,
        Some(_) if already_optional => return Err(ProcedureError::AlreadyApplied(stmt)),
        Some(_) => {
            return Err(ProcedureError::NotApplicable(format!(
                "'{field}' already has a default"
            )))
        }
    };
    let new_annotation = if already_optional {
        annotation.to_string()
    } else {
        format!("Optional[{annotation}]")
    };

    let updated = format!("{indent}{field}: {new_annotation} = {new_default}");
    let replacement: Vec<String> = updated.lines().map(str::to_string).collect();
    let mut new_source = replace_lines(source, line, end, &replacement);
    if !already_optional {
        new_source = ensure_import(&new_source, "typing", "Optional");
    }
    Ok(TextEdit {
        new_source,
        old_fragment: stmt,
        new_fragment: updated,
    })
}

/// `Field(..., max_length=50)` -> `Field(None, max_length=50)`. `None` when
/// the call already carries a default.
fn relax_field_call(call: &str) -> Option<String> {
    let inner = &call["Field(".len()..];
    let trimmed = inner.trim_start();
    if let Some(rest) = trimmed.strip_prefix("...") {
        return Some(format!("Field(None{rest}"));
    }
    if trimmed.starts_with("default=") || trimmed.starts_with("None") || inner.contains("default_factory") {
        return None;
    }
    if trimmed.starts_with(')') {
        return Some(format!("Field(None{trimmed}"));
    }
    if let Some(first) = trimmed.split(',').next() {
        if !first.contains('=') {
            // Positional default already present.
            return None;
        }
    }
    Some(format!("Field(None, {trimmed}"))
}

fn schema_field_line(source: &str, entity: Option<&str>, field: &str) -> Option<usize> {
    let all = classes(source);
    if let Some(entity) = entity {
        for suffix in SCHEMA_SUFFIXES {
            let name = format!("{entity}{suffix}");
            if let Some(class) = all.iter().find(|c| c.name == name) {
                if let Some(line) = find_field_line(source, (class.start + 1, class.end), field) {
                    return Some(line);
                }
            }
        }
    }
    all.iter()
        .find_map(|c| find_field_line(source, (c.start + 1, c.end), field))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMAS: &str = r#"from pydantic import BaseModel, Field


class ProductBase(BaseModel):
    name: str
    price: float = Field(..., gt=0)


class ProductCreate(ProductBase):
    description: str
    sku: str = Field(max_length=20)


class ProductRead(ProductBase):
    id: int
    description: Optional[str] = None
"#;

    fn params(entity: Option<&str>, field: &str) -> CandidateParams {
        CandidateParams {
            entity: entity.map(str::to_string),
            field: Some(field.to_string()),
            ..CandidateParams::default()
        }
    }

    #[test]
    fn relaxes_create_schema_field_and_imports_optional() {
        let edit = relax_required(SCHEMAS, &params(Some("Product"), "description")).unwrap();
        assert!(edit.new_source.contains("class ProductCreate(ProductBase):\n    description: Optional[str] = None\n"));
        assert!(edit.new_source.starts_with("from pydantic import BaseModel, Field\nfrom typing import Optional\n"));
        assert_eq!(edit.old_fragment, "    description: str");
    }

    #[test]
    fn relaxes_field_calls() {
        let edit = relax_required(SCHEMAS, &params(Some("Product"), "price")).unwrap();
        assert!(edit.new_source.contains("    price: Optional[float] = Field(None, gt=0)"));

        let edit = relax_required(SCHEMAS, &params(Some("Product"), "sku")).unwrap();
        assert!(edit.new_source.contains("    sku: Optional[str] = Field(None, max_length=20)"));
    }

    #[test]
    fn already_optional_is_reported() {
        let src = "class ProductCreate(BaseModel):\n    description: Optional[str] = None\n";
        let err = relax_required(src, &params(Some("Product"), "description")).unwrap_err();
        assert!(matches!(err, ProcedureError::AlreadyApplied(_)));
    }

    #[test]
    fn without_entity_the_first_declaring_class_wins() {
        let edit = relax_required(SCHEMAS, &params(None, "name")).unwrap();
        assert!(edit.new_source.contains("class ProductBase(BaseModel):\n    name: Optional[str] = None"));
    }

    #[test]
    fn missing_field() {
        let err = relax_required(SCHEMAS, &params(Some("Product"), "weight")).unwrap_err();
        assert!(matches!(err, ProcedureError::NotApplicable(_)));
    }
}

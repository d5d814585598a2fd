//! IMPORT and KEY procedures.

use super::source_edit::{ensure_import, imports_name, replace_lines, split_lines};
use super::{ProcedureError, ProcedureResult, TextEdit};
use crate::domain::models::CandidateParams;

/// Names generated services commonly forget to import, and their modules.
pub const KNOWN_IMPORTS: &[(&str, &str)] = &[
    ("Optional", "typing"),
    ("List", "typing"),
    ("Dict", "typing"),
    ("Any", "typing"),
    ("Union", "typing"),
    ("HTTPException", "fastapi"),
    ("Depends", "fastapi"),
    ("APIRouter", "fastapi"),
    ("Query", "fastapi"),
    ("status", "fastapi"),
    ("Session", "sqlalchemy.orm"),
    ("BaseModel", "pydantic"),
    ("Field", "pydantic"),
    ("datetime", "datetime"),
    ("Decimal", "decimal"),
    ("UUID", "uuid"),
    ("uuid4", "uuid"),
];

/// Module that exports `name`, for the well-known names we can import.
pub fn module_for(name: &str) -> Option<&'static str> {
    KNOWN_IMPORTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, m)| *m)
}

/// `from <module> import <symbol>` for a known undefined name.
pub fn add_import(source: &str, params: &CandidateParams) -> ProcedureResult {
    let symbol = params
        .symbol
        .as_deref()
        .ok_or_else(|| ProcedureError::NotApplicable("no undefined name".to_string()))?;
    let module = module_for(symbol)
        .ok_or_else(|| ProcedureError::NotApplicable(format!("unknown module for '{symbol}'")))?;
    if imports_name(source, symbol) {
        return Err(ProcedureError::AlreadyApplied(format!("{symbol} is imported")));
    }
    let new_source = ensure_import(source, module, symbol);
    Ok(TextEdit {
        old_fragment: String::new(),
        new_fragment: format!("from {module} import {symbol}"),
        new_source,
    })
}

/// Import every known name a replayed fragment uses but the file lacks.
pub fn ensure_used_imports(source: &str, fragment: &str) -> String {
    let mut out = source.to_string();
    for (name, module) in KNOWN_IMPORTS {
        let used = fragment
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .any(|token| token == *name);
        let called_or_subscripted =
            fragment.contains(&format!("{name}(")) || fragment.contains(&format!("{name}["));
        if used && called_or_subscripted {
            out = ensure_import(&out, module, name);
        }
    }
    out
}

/// `data["price"]` -> `data.get("price")` on the faulting line.
pub fn safe_key_access(source: &str, params: &CandidateParams) -> ProcedureResult {
    let key = params
        .symbol
        .as_deref()
        .map(|k| k.trim_matches(|c| c == '\'' || c == '"'))
        .filter(|k| !k.is_empty())
        .ok_or_else(|| ProcedureError::NotApplicable("no missing key".to_string()))?;
    let lines = split_lines(source);

    let candidates: Vec<usize> = match params.line {
        Some(line) if line >= 1 && (line as usize) <= lines.len() => vec![line as usize - 1],
        _ => (0..lines.len()).collect(),
    };

    for i in candidates {
        let line = lines[i];
        for quote in ['"', '\''] {
            let subscript = format!("[{quote}{key}{quote}]");
            let Some(pos) = line.find(&subscript) else {
                continue;
            };
            let rest = line[pos + subscript.len()..].trim_start();
            if rest.starts_with('=') && !rest.starts_with("==") {
                // Assignment target; a missing key is not the problem here.
                continue;
            }
            let updated = line.replacen(&subscript, &format!(".get({quote}{key}{quote})"), 1);
            return Ok(TextEdit {
                new_source: replace_lines(source, i, i, &[updated.clone()]),
                old_fragment: line.to_string(),
                new_fragment: updated,
            });
        }
    }
    Err(ProcedureError::NotApplicable(format!(
        "no read of key '{key}' found"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(symbol: &str, line: Option<u32>) -> CandidateParams {
        CandidateParams {
            symbol: Some(symbol.to_string()),
            line,
            ..CandidateParams::default()
        }
    }

    #[test]
    fn imports_known_names_once() {
        let src = "from fastapi import APIRouter\n\nrouter = APIRouter()\n";
        let edit = add_import(src, &params("HTTPException", None)).unwrap();
        assert!(edit.new_source.starts_with("from fastapi import APIRouter, HTTPException\n"));
        assert!(matches!(
            add_import(&edit.new_source, &params("HTTPException", None)),
            Err(ProcedureError::AlreadyApplied(_))
        ));
        assert!(matches!(
            add_import(src, &params("frobnicate", None)),
            Err(ProcedureError::NotApplicable(_))
        ));
    }

    #[test]
    fn key_access_on_trace_line_only() {
        let src = "def total(data):\n    data['price'] = 0\n    return data['price'] * 2\n";
        let edit = safe_key_access(src, &params("'price'", Some(3))).unwrap();
        assert_eq!(
            edit.new_source,
            "def total(data):\n    data['price'] = 0\n    return data.get('price') * 2\n"
        );

        let err = safe_key_access(src, &params("price", Some(2))).unwrap_err();
        assert!(matches!(err, ProcedureError::NotApplicable(_)));
    }

    #[test]
    fn key_access_without_line_scans_file() {
        let src = "x = payload[\"sku\"]\n";
        let edit = safe_key_access(src, &params("sku", None)).unwrap();
        assert_eq!(edit.new_source, "x = payload.get(\"sku\")\n");
    }

    #[test]
    fn replayed_fragments_get_their_imports() {
        let src = "from app.models import Product\n\ndef f():\n    pass\n";
        let out = ensure_used_imports(src, "    raise HTTPException(status_code=422)");
        assert!(out.contains("from fastapi import HTTPException"));
        assert_eq!(ensure_used_imports(src, "    pass"), src);
    }
}

//! DATABASE procedures: nullability, defaults, and cascades on ORM columns.

use super::source_edit::{find_class, find_field_line, replace_lines, split_lines, statement_end};
use super::{add_call_kwarg, ProcedureError, ProcedureResult, TextEdit};
use crate::domain::models::CandidateParams;

const COLUMN_CALLS: &[&str] = &["Column(", "mapped_column(", "Field("];

/// The column statement for `params.field`, scoped to `params.entity`'s class
/// when it can be found. Returns `(first_line, last_line, text)`.
fn column_statement(
    source: &str,
    params: &CandidateParams,
) -> Result<(usize, usize, String), ProcedureError> {
    let field = params
        .field
        .as_deref()
        .ok_or_else(|| ProcedureError::NotApplicable("no column named".to_string()))?;
    let lines = split_lines(source);
    let range = params
        .entity
        .as_deref()
        .and_then(|e| find_class(source, e))
        .map_or((0, lines.len()), |c| (c.start, c.end));

    let start = find_field_line(source, range, field).ok_or_else(|| {
        ProcedureError::NotApplicable(format!("column '{field}' is not declared here"))
    })?;
    let end = statement_end(&lines, start);
    let stmt = lines[start..=end].join("\n");
    if !COLUMN_CALLS.iter().any(|c| stmt.contains(c)) {
        return Err(ProcedureError::NotApplicable(format!(
            "'{field}' is not a column declaration"
        )));
    }
    Ok((start, end, stmt))
}

fn edit(source: &str, start: usize, end: usize, old: String, new: String) -> TextEdit {
    let replacement: Vec<String> = new.lines().map(str::to_string).collect();
    TextEdit {
        new_source: replace_lines(source, start, end, &replacement),
        old_fragment: old,
        new_fragment: new,
    }
}

/// `description = Column(String)` -> `description = Column(String, nullable=True)`.
pub fn make_nullable(source: &str, params: &CandidateParams) -> ProcedureResult {
    let (start, end, stmt) = column_statement(source, params)?;
    if stmt.contains("nullable=True") {
        return Err(ProcedureError::AlreadyApplied(stmt));
    }
    let updated = if stmt.contains("nullable=False") {
        stmt.replacen("nullable=False", "nullable=True", 1)
    } else {
        add_call_kwarg(&stmt, "nullable=True")
            .ok_or_else(|| ProcedureError::NotApplicable("unbalanced column call".to_string()))?
    };
    Ok(edit(source, start, end, stmt, updated))
}

/// Give a NOT NULL column a type-appropriate default.
pub fn add_default(source: &str, params: &CandidateParams) -> ProcedureResult {
    let (start, end, stmt) = column_statement(source, params)?;
    if stmt.contains("default=") {
        return Err(ProcedureError::AlreadyApplied(stmt));
    }
    let value = default_literal(&stmt);
    let updated = add_call_kwarg(&stmt, &format!("default={value}"))
        .ok_or_else(|| ProcedureError::NotApplicable("unbalanced column call".to_string()))?;
    Ok(edit(source, start, end, stmt, updated))
}

fn default_literal(stmt: &str) -> &'static str {
    if stmt.contains("Boolean") || stmt.contains("bool") {
        "False"
    } else if ["Integer", "Float", "Numeric", "DECIMAL", "Decimal", "int", "float"]
        .iter()
        .any(|t| stmt.contains(t))
    {
        "0"
    } else {
        "\"\""
    }
}

/// `ForeignKey("carts.id")` -> `ForeignKey("carts.id", ondelete="CASCADE")`.
///
/// Targets `params.field` when named, else the first foreign key of the
/// entity's class.
pub fn add_cascade(source: &str, params: &CandidateParams) -> ProcedureResult {
    let lines = split_lines(source);
    let range = params
        .entity
        .as_deref()
        .and_then(|e| find_class(source, e))
        .map_or((0, lines.len()), |c| (c.start, c.end));

    let start = match params.field.as_deref() {
        Some(field) => find_field_line(source, range, field),
        None => (range.0..range.1).find(|i| lines[*i].contains("ForeignKey(")),
    }
    .ok_or_else(|| ProcedureError::NotApplicable("no foreign key column found".to_string()))?;

    let end = statement_end(&lines, start);
    let stmt = lines[start..=end].join("\n");
    if stmt.contains("ondelete=") {
        return Err(ProcedureError::AlreadyApplied(stmt));
    }
    let open = stmt
        .find("ForeignKey(")
        .ok_or_else(|| ProcedureError::NotApplicable("column has no foreign key".to_string()))?;
    let args_start = open + "ForeignKey(".len();
    let mut depth = 1;
    let close = stmt[args_start..]
        .char_indices()
        .find_map(|(i, c)| {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
            (depth == 0).then_some(args_start + i)
        })
        .ok_or_else(|| ProcedureError::NotApplicable("unbalanced ForeignKey call".to_string()))?;

    let updated = format!("{}, ondelete=\"CASCADE\"{}", &stmt[..close], &stmt[close..]);
    Ok(edit(source, start, end, stmt, updated))
}

//! Deterministic source-mutation procedures, one family per strategy.
//!
//! A procedure is a pure function from the current text of the candidate's
//! target file to an edited text. It either returns a [`TextEdit`] or reports
//! why it could not patch, in which case the orchestrator moves on to the next
//! candidate and finally to the fallback repairer.

pub mod database;
pub mod misc;
pub mod route;
pub mod service_logic;
pub mod source_edit;
pub mod validation;

use thiserror::Error;

use crate::domain::models::{FixType, RepairCandidate};

/// Result of a successful procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    /// Full file contents after the edit.
    pub new_source: String,
    /// The statement(s) replaced, for learning and anti-patterns.
    pub old_fragment: String,
    /// The statement(s) written in their place.
    pub new_fragment: String,
}

/// Why a procedure produced no edit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcedureError {
    /// No built-in procedure exists for this fix type.
    #[error("No deterministic procedure for {0}")]
    Unsupported(FixType),

    /// The insertion point could not be found.
    #[error("Not applicable: {0}")]
    NotApplicable(String),

    /// The source already contains the fix.
    #[error("Already applied: {0}")]
    AlreadyApplied(String),
}

/// Outcome of a repair procedure.
pub type ProcedureResult = Result<TextEdit, ProcedureError>;

/// Run the procedure for `candidate.fix_type` against `source`.
pub fn apply(candidate: &RepairCandidate, source: &str) -> ProcedureResult {
    let params = &candidate.params;
    match candidate.fix_type {
        FixType::MakeNullable => database::make_nullable(source, params),
        FixType::AddDefault => database::add_default(source, params),
        FixType::AddCascade => database::add_cascade(source, params),
        FixType::RelaxRequired => validation::relax_required(source, params),
        FixType::AddHandler => route::add_handler(source, params),
        FixType::StockGuard
        | FixType::StatusTransitionGuard
        | FixType::EmptyCollectionGuard
        | FixType::ExistenceGuard => service_logic::insert_guard(source, candidate.fix_type, params),
        FixType::AddImport => misc::add_import(source, params),
        FixType::SafeKeyAccess => misc::safe_key_access(source, params),
        FixType::KnownFix | FixType::AntiPattern | FixType::Fallback => {
            Err(ProcedureError::Unsupported(candidate.fix_type))
        }
    }
}

/// Exact-substring replacement of the first occurrence of `wrong`.
///
/// Used for known fixes and learned anti-patterns; nothing is replaced unless
/// `wrong` is found verbatim.
pub fn replace_fragment(source: &str, wrong: &str, correct: &str) -> Option<TextEdit> {
    if wrong.is_empty() || wrong == correct || !source.contains(wrong) {
        return None;
    }
    Some(TextEdit {
        new_source: source.replacen(wrong, correct, 1),
        old_fragment: wrong.to_string(),
        new_fragment: correct.to_string(),
    })
}

/// Insert `new_lines` before line `at`, recording the preceding line as the
/// anchor so the edit can be replayed as a fragment replacement.
pub(crate) fn insert_after_anchor(source: &str, at: usize, new_lines: &[String]) -> TextEdit {
    let anchor = source
        .lines()
        .nth(at.saturating_sub(1))
        .unwrap_or_default()
        .to_string();
    let mut new_fragment = anchor.clone();
    for line in new_lines {
        new_fragment.push('\n');
        new_fragment.push_str(line);
    }
    TextEdit {
        new_source: source_edit::insert_lines(source, at, new_lines),
        old_fragment: anchor,
        new_fragment,
    }
}

/// Add `kwarg` to the outermost call of a statement, before its closing
/// parenthesis.
pub(crate) fn add_call_kwarg(stmt: &str, kwarg: &str) -> Option<String> {
    let close = source_edit::outer_call_close(stmt)?;
    let before = stmt[..close].trim_end();
    let sep = if before.ends_with('(') {
        ""
    } else if before.ends_with(',') {
        " "
    } else {
        ", "
    };
    Some(format!("{before}{sep}{kwarg}{}", &stmt[close..]))
}

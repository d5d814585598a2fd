//! Mapping of observed violations to repair strategies.
//!
//! Decision order (first match wins):
//!
//! 1. `404`/`405` where a success status was expected -> `ROUTE`.
//! 2. `422`/`500` whose error message or endpoint shape carries a
//!    business-logic indicator -> `SERVICE_LOGIC`. This deliberately beats the
//!    schema-validation reading of a 422: routing a business-rule failure to
//!    the schema layer patches the wrong file and never converges.
//! 3. `422` -> `VALIDATION`.
//! 4. A trace is present -> exception-kind table.
//! 5. `500` without a trace -> endpoint-shape inference, defaulting to
//!    `SERVICE_LOGIC` (untraced 500s are mostly unfinished business logic).
//! 6. `GENERIC`.
//!
//! Classification is a pure function of `(violation, trace)`.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::models::{StackTrace, StrategyType, Violation};

/// Path verbs that name a business action rather than a resource.
pub const ACTION_VERBS: &[&str] = &[
    "checkout", "pay", "cancel", "activate", "deactivate", "complete", "confirm", "ship",
    "refund", "approve", "reject", "submit", "close", "reopen", "archive", "publish", "fulfill",
    "deliver", "return",
];

/// Method-name prefixes that indicate an unimplemented business action when
/// they appear in an `AttributeError`.
const ACTION_METHOD_PREFIXES: &[&str] = &[
    "add_", "remove_", "checkout", "pay", "cancel", "activate", "deactivate", "complete",
    "confirm", "process_", "apply_", "update_status", "transition", "ship", "refund", "approve",
    "reject", "submit", "close", "reopen",
];

fn business_keyword_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:^|[^a-z])(stock|inventory|insufficient|status|transition|state|empty|duplicate|already)(?:es|s)?(?:[^a-z]|$)",
        )
        .expect("valid business keyword regex")
    })
}

fn nested_resource_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^}]+\}/[A-Za-z_-]+").expect("valid nested resource regex"))
}

fn missing_attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"has no attribute '(\w+)'").expect("valid attribute regex"))
}

/// Which rule produced a classification, for logs and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationRule {
    /// 404 or 405 where a success status was expected.
    MissingRoute,
    /// 422 or 500 whose error text names a business rule.
    BusinessLogicMessage,
    /// 422 or 500 on a nested or action endpoint.
    BusinessLogicEndpoint,
    /// Any other 422.
    SchemaValidation,
    /// The trace exception maps directly to a strategy.
    ExceptionKind,
    /// `AttributeError` raised from service code or naming an action method.
    AttributeInServiceLogic,
    /// A trace was present but its exception is unknown.
    UnmappedException,
    /// Untraced 500 on a nested or action endpoint.
    UntracedActionEndpoint,
    /// Untraced 500 on any other endpoint.
    UntracedDefault,
    /// Nothing else matched.
    Fallback,
}

/// A strategy together with the rule that chose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    /// Chosen strategy.
    pub strategy: StrategyType,
    /// Rule that fired.
    pub rule: ClassificationRule,
}

/// Stateless violation classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureClassifier;

impl FailureClassifier {
    /// Create a classifier.
    pub fn new() -> Self {
        Self
    }

    /// Strategy for a violation and its (optional) trace.
    pub fn classify(&self, violation: &Violation, trace: Option<&StackTrace>) -> StrategyType {
        self.explain(violation, trace).strategy
    }

    /// Strategy plus the rule that matched.
    pub fn explain(&self, violation: &Violation, trace: Option<&StackTrace>) -> Classification {
        let actual = violation.actual_status;
        let expected_success = matches!(violation.expected_status, 200 | 201 | 204);

        if matches!(actual, 404 | 405) && expected_success {
            return classified(StrategyType::Route, ClassificationRule::MissingRoute);
        }

        if matches!(actual, 422 | 500) {
            if has_business_keyword(&violation.error_message) {
                return classified(
                    StrategyType::ServiceLogic,
                    ClassificationRule::BusinessLogicMessage,
                );
            }
            if is_business_endpoint(&violation.endpoint) {
                return classified(
                    StrategyType::ServiceLogic,
                    ClassificationRule::BusinessLogicEndpoint,
                );
            }
        }

        if actual == 422 {
            return classified(StrategyType::Validation, ClassificationRule::SchemaValidation);
        }

        if let Some(trace) = trace {
            return classify_trace(trace);
        }

        if actual == 500 {
            return if is_business_endpoint(&violation.endpoint) {
                classified(
                    StrategyType::ServiceLogic,
                    ClassificationRule::UntracedActionEndpoint,
                )
            } else {
                classified(StrategyType::ServiceLogic, ClassificationRule::UntracedDefault)
            };
        }

        classified(StrategyType::Generic, ClassificationRule::Fallback)
    }
}

fn classified(strategy: StrategyType, rule: ClassificationRule) -> Classification {
    Classification { strategy, rule }
}

/// Exception-kind table.
fn classify_trace(trace: &StackTrace) -> Classification {
    let kind = trace.exception_kind.to_ascii_lowercase();

    let strategy = if kind.contains("integrity")
        || kind.contains("constraint")
        || kind.contains("operational")
        || kind.contains("programming")
        || kind == "dataerror"
        || kind.ends_with("violation")
        || kind == "databaseerror"
    {
        StrategyType::Database
    } else if kind.contains("validation") {
        StrategyType::Validation
    } else if kind == "importerror" || kind == "modulenotfounderror" || kind == "nameerror" {
        StrategyType::Import
    } else if kind == "attributeerror" {
        if trace.in_service_module() || names_action_method(&trace.exception_message) {
            return classified(
                StrategyType::ServiceLogic,
                ClassificationRule::AttributeInServiceLogic,
            );
        }
        StrategyType::Attribute
    } else if kind == "typeerror" {
        StrategyType::TypeMismatch
    } else if kind == "keyerror" {
        StrategyType::Key
    } else {
        return classified(StrategyType::Generic, ClassificationRule::UnmappedException);
    };

    classified(strategy, ClassificationRule::ExceptionKind)
}

/// Whether error text mentions a business-rule concept.
pub fn has_business_keyword(text: &str) -> bool {
    business_keyword_regex().is_match(text)
}

/// Whether an endpoint is a nested sub-resource (`/{id}/items`) or ends in
/// an action verb (`/checkout`).
pub fn is_business_endpoint(path: &str) -> bool {
    nested_resource_regex().is_match(path) || action_verb(path).is_some()
}

/// The action verb an endpoint path ends with, if any.
pub fn action_verb(path: &str) -> Option<&'static str> {
    let last = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.starts_with('{'))?;
    let last = last.to_ascii_lowercase().replace('-', "_");
    ACTION_VERBS.iter().copied().find(|verb| *verb == last)
}

/// Whether an `AttributeError` message names a missing action method.
fn names_action_method(message: &str) -> bool {
    missing_attribute_regex()
        .captures(message)
        .is_some_and(|caps| {
            let attr = caps[1].to_ascii_lowercase();
            ACTION_METHOD_PREFIXES.iter().any(|p| attr.starts_with(p))
        })
}

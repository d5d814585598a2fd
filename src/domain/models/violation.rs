//! Runtime failures observed while smoke-testing a generated service.
//!
//! A [`Violation`] is produced by the runtime harness for every failed
//! scenario and is consumed read-only by classification and repair. A
//! [`StackTrace`] is the best-effort structured form of a server-side crash,
//! extracted from process output or an error response body.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// HttpMethod
// ---------------------------------------------------------------------------

/// HTTP method of a scenario step or endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl HttpMethod {
    /// Upper-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether requests with this method normally carry a JSON body.
    pub fn has_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }

    /// Parse a method name, case-insensitively.
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(Self::Get),
            "POST" => Some(Self::Post),
            "PUT" => Some(Self::Put),
            "PATCH" => Some(Self::Patch),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StackTrace
// ---------------------------------------------------------------------------

/// A parsed server-side error trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackTrace {
    /// Short exception kind, module path stripped (e.g. `IntegrityError`).
    pub exception_kind: String,
    /// The message following the kind on the final trace line.
    pub exception_message: String,
    /// Innermost source file referenced by the trace, if any.
    pub source_file: Option<String>,
    /// Line number in `source_file`.
    pub source_line: Option<u32>,
    /// Innermost function name referenced by the trace, if any.
    pub function: Option<String>,
    /// The raw trace block as it appeared in the logs.
    pub raw_text: String,
}

impl StackTrace {
    /// Whether the innermost frame is inside a service-layer module.
    pub fn in_service_module(&self) -> bool {
        self.source_file
            .as_deref()
            .is_some_and(|f| f.replace('\\', "/").contains("service"))
    }
}

// ---------------------------------------------------------------------------
// Violation
// ---------------------------------------------------------------------------

/// One scenario's mismatch between expected and actual runtime outcome.
///
/// Never mutated after the harness produces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// The endpoint path template (e.g. `/carts/{id}/items`).
    pub endpoint: String,
    /// Method of the failing request.
    pub http_method: HttpMethod,
    /// Status the scenario expected.
    pub expected_status: u16,
    /// Actual status, or `0` when no response was received.
    pub actual_status: u16,
    /// Coarse error kind (`HTTPError`, `ScenarioExecutionError`, or the
    /// trace's exception kind).
    pub error_kind: String,
    /// Error detail reported by the service, or the transport error.
    pub error_message: String,
    /// Trace correlated from the service logs, when one was found.
    pub stack_trace: Option<StackTrace>,
    /// Scenario that produced the violation.
    pub scenario_name: Option<String>,
}

impl Violation {
    /// Stable identifier for this violation within a run.
    ///
    /// Two violations with the same method, endpoint, and expected status are
    /// the same constraint from the repair loop's point of view; the actual
    /// status may change as repairs land.
    pub fn id(&self) -> String {
        format!(
            "{} {} -> {}",
            self.http_method, self.endpoint, self.expected_status
        )
    }

    /// Signature used to compare violation sets across iterations.
    pub fn signature(&self) -> String {
        format!(
            "{} {} {}!={}",
            self.http_method, self.endpoint, self.expected_status, self.actual_status
        )
    }

    /// The exception kind of the attached trace, if any.
    pub fn exception_kind(&self) -> Option<&str> {
        self.stack_trace.as_ref().map(|t| t.exception_kind.as_str())
    }

    /// All error text available for keyword matching.
    pub fn error_text(&self) -> String {
        match &self.stack_trace {
            Some(trace) => format!(
                "{} {} {}",
                self.error_message, trace.exception_kind, trace.exception_message
            ),
            None => self.error_message.clone(),
        }
    }

    /// Whether the service answered with a server-side error.
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.actual_status)
    }
}

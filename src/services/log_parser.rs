//! Extraction of structured stack traces from raw server output.
//!
//! Generated services are Python (FastAPI / SQLAlchemy / Pydantic), so the
//! parser understands CPython traceback blocks:
//!
//! ```text
//! Traceback (most recent call last):
//!   File "/app/app/services/cart_service.py", line 42, in add_item
//!     product = self.db.get(Product, product_id)
//! sqlalchemy.exc.IntegrityError: (sqlite3.IntegrityError) NOT NULL constraint failed: products.description
//! ```
//!
//! Each block yields one [`StackTrace`]: the last `File "...", line N` frame is
//! the fault location, and the first unindented `Kind: message` line after the
//! frames is the exception. Chained exceptions produce one trace per block.
//! Output without any block parses to an empty list, which is expected.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::models::StackTrace;

const TRACE_DELIMITER: &str = "Traceback (most recent call last):";

fn frame_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*File "([^"]+)", line (\d+)(?:, in (\S+))?"#).expect("valid frame regex")
    })
}

fn exception_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^((?:[A-Za-z_]\w*\.)*[A-Z]\w*)(?::\s?(.*))?$").expect("valid exception regex")
    })
}

/// Stateless parser for traceback blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogParser;

impl LogParser {
    /// Create a parser.
    pub fn new() -> Self {
        Self
    }

    /// Parse every traceback block in `raw_logs`, in order of appearance.
    pub fn parse(&self, raw_logs: &str) -> Vec<StackTrace> {
        let mut traces = Vec::new();
        let mut lines = raw_logs.lines().peekable();

        while let Some(line) = lines.next() {
            if !line.contains(TRACE_DELIMITER) {
                continue;
            }

            let mut raw = vec![line.trim_start().to_string()];
            let mut last_frame: Option<(String, u32, Option<String>)> = None;
            let mut exception: Option<(String, String)> = None;

            while let Some(next) = lines.peek() {
                if next.contains(TRACE_DELIMITER) {
                    break;
                }
                let next = lines.next().unwrap_or_default();

                if exception.is_some() {
                    // Continuation lines until a blank line or a new log record.
                    if next.trim().is_empty() || looks_like_log_record(next) {
                        break;
                    }
                    raw.push(next.to_string());
                    continue;
                }

                if let Some(caps) = frame_regex().captures(next) {
                    let file = caps[1].to_string();
                    let line_no = caps[2].parse().unwrap_or(0);
                    let func = caps.get(3).map(|m| m.as_str().to_string());
                    last_frame = Some((file, line_no, func));
                    raw.push(next.to_string());
                    continue;
                }

                let indented = next.starts_with(' ') || next.starts_with('\t');
                if indented || next.trim().is_empty() {
                    raw.push(next.to_string());
                    continue;
                }
                if looks_like_log_record(next) {
                    break;
                }

                if let Some(caps) = exception_regex().captures(next.trim_end()) {
                    let kind = short_kind(&caps[1]);
                    let message = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
                    exception = Some((kind, message));
                    raw.push(next.to_string());
                } else {
                    // Not a traceback after all; stop at the first foreign line.
                    break;
                }
            }

            if let Some((exception_kind, exception_message)) = exception {
                let (source_file, source_line, function) = match last_frame {
                    Some((f, l, func)) => (Some(f), Some(l), func),
                    None => (None, None, None),
                };
                traces.push(StackTrace {
                    exception_kind,
                    exception_message,
                    source_file,
                    source_line,
                    function,
                    raw_text: raw.join("\n"),
                });
            }
        }

        traces
    }

    /// The innermost (last raised) trace in `raw_logs`, if any.
    pub fn parse_innermost(&self, raw_logs: &str) -> Option<StackTrace> {
        self.parse(raw_logs).pop()
    }
}

/// `sqlalchemy.exc.IntegrityError` -> `IntegrityError`.
fn short_kind(kind: &str) -> String {
    kind.rsplit('.').next().unwrap_or(kind).to_string()
}

/// Lines emitted by the server's logger rather than the traceback printer.
fn looks_like_log_record(line: &str) -> bool {
    const PREFIXES: [&str; 6] = ["INFO:", "ERROR:", "WARNING:", "DEBUG:", "CRITICAL:", "During handling"];
    let trimmed = line.trim_start();
    PREFIXES.iter().any(|p| trimmed.starts_with(p))
        || trimmed.starts_with("The above exception")
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTEGRITY_LOG: &str = r#"INFO:     127.0.0.1:51234 - "POST /products HTTP/1.1" 500 Internal Server Error
ERROR:    Exception in ASGI application
Traceback (most recent call last):
  File "/usr/lib/python3.11/site-packages/starlette/routing.py", line 74, in app
    response = await func(request)
  File "/app/app/services/product_service.py", line 31, in create_product
    self.db.commit()
sqlalchemy.exc.IntegrityError: (sqlite3.IntegrityError) NOT NULL constraint failed: products.description
[SQL: INSERT INTO products (name, description, price) VALUES (?, ?, ?)]
(Background on this error at: https://sqlalche.me/e/20/gkpj)
INFO:     127.0.0.1:51236 - "GET /products HTTP/1.1" 200 OK
"#;

    #[test]
    fn parses_innermost_frame_and_exception() {
        let traces = LogParser::new().parse(INTEGRITY_LOG);
        assert_eq!(traces.len(), 1);
        let trace = &traces[0];
        assert_eq!(trace.exception_kind, "IntegrityError");
        assert_eq!(
            trace.exception_message,
            "(sqlite3.IntegrityError) NOT NULL constraint failed: products.description"
        );
        assert_eq!(
            trace.source_file.as_deref(),
            Some("/app/app/services/product_service.py")
        );
        assert_eq!(trace.source_line, Some(31));
        assert_eq!(trace.function.as_deref(), Some("create_product"));
        assert!(trace.raw_text.contains("[SQL: INSERT INTO products"));
        assert!(!trace.raw_text.contains("GET /products"));
    }

    #[test]
    fn no_trace_block_yields_empty() {
        let logs = "INFO: started\nINFO: GET /health 200\n";
        assert!(LogParser::new().parse(logs).is_empty());
        assert!(LogParser::new().parse("").is_empty());
    }

    #[test]
    fn chained_exceptions_produce_one_trace_each() {
        let logs = r#"Traceback (most recent call last):
  File "/app/app/routes/cart.py", line 12, in get_cart
    return carts[cart_id]
KeyError: 'abc'

During handling of the above exception, another exception occurred:

Traceback (most recent call last):
  File "/app/app/routes/cart.py", line 14, in get_cart
    raise LookupFailed(cart_id)
app.errors.LookupFailed
"#;
        let parser = LogParser::new();
        let traces = parser.parse(logs);
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].exception_kind, "KeyError");
        assert_eq!(traces[0].exception_message, "'abc'");
        let innermost = parser.parse_innermost(logs).unwrap();
        assert_eq!(innermost.exception_kind, "LookupFailed");
        assert_eq!(innermost.exception_message, "");
        assert_eq!(innermost.source_line, Some(14));
    }

    #[test]
    fn pydantic_error_keeps_first_message_line() {
        let logs = "Traceback (most recent call last):\n  File \"/app/app/schemas.py\", line 8, in build\n    return ProductCreate(**data)\npydantic_core._pydantic_core.ValidationError: 1 validation error for ProductCreate\nname\n  Field required [type=missing]\n";
        let trace = LogParser::new().parse_innermost(logs).unwrap();
        assert_eq!(trace.exception_kind, "ValidationError");
        assert_eq!(trace.exception_message, "1 validation error for ProductCreate");
        assert!(trace.raw_text.contains("Field required"));
    }
}

//! Smoke-suite execution against a live instance of the target service.
//!
//! Independent scenarios run concurrently on a `Semaphore`-bounded pool;
//! steps inside one scenario run in order because later steps consume values
//! extracted from earlier responses.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ApplicationIr, FieldDef, FieldSpec, HttpMethod, RuntimeConfig, Scenario, ScenarioResult, ScenarioStep,
    SmokeRun, TargetHandle, Violation,
};
use crate::domain::ports::{wait_for_shutdown, ApplicationRuntime, LogBuffer, RuntimeHandle, SmokeHarness};
use crate::services::log_parser::LogParser;

/// Error kind recorded when no response was received.
pub const SCENARIO_EXECUTION_ERROR: &str = "ScenarioExecutionError";

/// Error kind recorded for a plain status mismatch.
pub const HTTP_ERROR: &str = "HTTPError";

const MAX_MESSAGE_LEN: usize = 2_000;

fn path_param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("valid path param regex"))
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("valid placeholder regex"))
}

// ---------------------------------------------------------------------------
// ScenarioExecutor
// ---------------------------------------------------------------------------

/// Executes scenarios over HTTP.
#[derive(Clone)]
pub struct ScenarioExecutor {
    client: reqwest::Client,
    ir: Arc<ApplicationIr>,
    parser: LogParser,
}

impl ScenarioExecutor {
    /// Executor with a shared HTTP client using `request_timeout`.
    pub fn new(request_timeout: Duration, ir: Arc<ApplicationIr>) -> DomainResult<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            ir,
            parser: LogParser::new(),
        })
    }

    /// Run one scenario's steps in order, stopping at the first failure.
    ///
    /// With `trace_logs`, the slice of the instance's output written while a
    /// failing step ran is searched for a trace. Only pass it when no other
    /// request is in flight, since concurrent requests share the buffer.
    pub async fn execute(
        &self,
        base_url: &str,
        scenario: &Scenario,
        trace_logs: Option<&LogBuffer>,
    ) -> ScenarioResult {
        let started = Instant::now();
        let mut vars: BTreeMap<String, Value> = BTreeMap::new();

        for (index, step) in scenario.steps.iter().enumerate() {
            let log_offset = trace_logs.map_or(0, LogBuffer::len);
            if let Err(mut violation) = self.execute_step(base_url, step, &mut vars).await {
                violation.scenario_name = Some(scenario.name.clone());
                if let Some(logs) = trace_logs.filter(|_| violation.is_server_error() && violation.stack_trace.is_none()) {
                    let contents = logs.contents();
                    let window = contents.get(log_offset..).unwrap_or(&contents);
                    if let Some(trace) = self.parser.parse_innermost(window) {
                        violation.error_kind.clone_from(&trace.exception_kind);
                        violation.stack_trace = Some(trace);
                    }
                }
                debug!(
                    scenario = %scenario.name,
                    step = index,
                    expected = violation.expected_status,
                    actual = violation.actual_status,
                    "Scenario failed"
                );
                return ScenarioResult {
                    scenario_name: scenario.name.clone(),
                    passed: false,
                    failed_step: Some(index),
                    violation: Some(violation),
                    extracted: vars,
                    duration_ms: elapsed_ms(started),
                };
            }
        }

        ScenarioResult {
            scenario_name: scenario.name.clone(),
            passed: true,
            failed_step: None,
            violation: None,
            extracted: vars,
            duration_ms: elapsed_ms(started),
        }
    }

    async fn execute_step(
        &self,
        base_url: &str,
        step: &ScenarioStep,
        vars: &mut BTreeMap<String, Value>,
    ) -> Result<(), Violation> {
        let path = substitute_path(&step.path, vars);
        let url = format!("{}{}", base_url.trim_end_matches('/'), path);
        let body = self.request_body(step, vars);

        let mut request = self.client.request(to_reqwest_method(step.method), &url);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let violation = |actual: u16, kind: &str, message: String| Violation {
            endpoint: step.path.clone(),
            http_method: step.method,
            expected_status: step.expected_status,
            actual_status: actual,
            error_kind: kind.to_string(),
            error_message: message,
            stack_trace: None,
            scenario_name: None,
        };

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                return Err(violation(0, SCENARIO_EXECUTION_ERROR, e.to_string()));
            }
        };
        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => return Err(violation(status, SCENARIO_EXECUTION_ERROR, e.to_string())),
        };
        let json: Option<Value> = serde_json::from_str(&text).ok();

        if status != step.expected_status {
            let mut v = violation(status, HTTP_ERROR, error_message(json.as_ref(), &text));
            if (500..600).contains(&status) {
                if let Some(trace) = self.parser.parse_innermost(&text) {
                    v.error_kind.clone_from(&trace.exception_kind);
                    v.stack_trace = Some(trace);
                }
            }
            return Err(v);
        }

        if let Some(json) = &json {
            if let Some(id) = json.get("id") {
                vars.insert("id".to_string(), id.clone());
            }
            for rule in &step.extract {
                match extract(json, &rule.path) {
                    Some(value) => {
                        vars.insert(rule.name.clone(), value.clone());
                    }
                    None => debug!(var = %rule.name, path = %rule.path, "Extraction path not found"),
                }
            }
        }
        Ok(())
    }

    /// Explicit template, else a body synthesized from field specs or the IR.
    fn request_body(&self, step: &ScenarioStep, vars: &BTreeMap<String, Value>) -> Option<Value> {
        if let Some(template) = &step.body {
            return Some(render_template(template, vars));
        }
        if !step.method.has_body() {
            return None;
        }
        let fields = if step.fields.is_empty() {
            self.ir_fields(step.method, &step.path)
        } else {
            step.fields.clone()
        };
        Some(synthesize_body(&fields, vars))
    }

    fn ir_fields(&self, method: HttpMethod, path: &str) -> Vec<FieldSpec> {
        let entity = self.ir.entity_for_path(method, path);
        let declared = self
            .ir
            .endpoint(method, path)
            .map(|e| e.request_fields.clone())
            .unwrap_or_default();
        let Some(entity) = entity else {
            return declared
                .into_iter()
                .map(|name| FieldSpec { name, field_type: None, required: true })
                .collect();
        };
        let spec = |f: &FieldDef| FieldSpec {
            name: f.name.clone(),
            field_type: Some(f.field_type.clone()),
            required: f.required,
        };
        if declared.is_empty() {
            entity
                .fields
                .iter()
                .filter(|f| f.name != "id")
                .map(spec)
                .collect()
        } else {
            declared
                .into_iter()
                .map(|name| match entity.field(&name) {
                    Some(f) => spec(f),
                    None => FieldSpec { name, field_type: None, required: true },
                })
                .collect()
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

/// The service's own error detail when it sent one, else the body.
fn error_message(json: Option<&Value>, text: &str) -> String {
    let message = match json.and_then(|j| j.get("detail")) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => json!({ "detail": other }).to_string(),
        None => text.to_string(),
    };
    truncate(&message, MAX_MESSAGE_LEN)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fill `{param}` segments: the variable of that name, else the last
/// extracted `id`, else `1`.
pub fn substitute_path(path: &str, vars: &BTreeMap<String, Value>) -> String {
    path_param_regex()
        .replace_all(path, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1])
                .or_else(|| vars.get("id"))
                .map_or_else(|| "1".to_string(), value_as_text)
        })
        .into_owned()
}

/// Replace `{{var}}` placeholders in every string of a body template. A
/// string that is exactly one placeholder takes the variable's JSON type.
pub fn render_template(template: &Value, vars: &BTreeMap<String, Value>) -> Value {
    match template {
        Value::String(s) => {
            if let Some(caps) = placeholder_regex().captures(s) {
                if caps.get(0).is_some_and(|m| m.as_str() == s.trim()) {
                    if let Some(value) = vars.get(&caps[1]) {
                        return value.clone();
                    }
                }
            }
            let rendered = placeholder_regex().replace_all(s, |caps: &regex::Captures<'_>| {
                vars.get(&caps[1])
                    .map_or_else(|| caps[0].to_string(), value_as_text)
            });
            Value::String(rendered.into_owned())
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| render_template(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_template(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Minimal body from field specs, reusing extracted values for matching
/// names (`product_id` after creating a product).
pub fn synthesize_body(fields: &[FieldSpec], vars: &BTreeMap<String, Value>) -> Value {
    let body: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| {
            let value = vars
                .get(&f.name)
                .cloned()
                .unwrap_or_else(|| synthetic_value(&f.name, f.field_type.as_deref()));
            (f.name.clone(), value)
        })
        .collect();
    Value::Object(body)
}

/// A plausible value for a field, from its type tag or, failing that, its
/// name.
pub fn synthetic_value(name: &str, field_type: Option<&str>) -> Value {
    let lower = name.to_lowercase();
    let typed = field_type
        .map(str::to_lowercase)
        .filter(|t| !t.is_empty() && t != "string" && t != "str");
    if let Some(t) = typed {
        return match t.as_str() {
            "int" | "integer" | "bigint" => {
                if lower.contains("stock") || lower.contains("inventory") {
                    json!(100)
                } else {
                    json!(1)
                }
            }
            "float" | "decimal" | "number" | "numeric" | "money" => json!(9.99),
            "bool" | "boolean" => json!(true),
            "uuid" => json!(uuid::Uuid::new_v4().to_string()),
            "datetime" | "timestamp" => json!(chrono::Utc::now().to_rfc3339()),
            "date" => json!(chrono::Utc::now().format("%Y-%m-%d").to_string()),
            "list" | "array" => json!([]),
            "dict" | "object" | "json" => json!({}),
            _ => name_based(&lower, field_type.is_none()),
        };
    }
    name_based(&lower, field_type.is_none())
}

fn name_based(lower: &str, infer_numbers: bool) -> Value {
    if lower.contains("email") {
        return json!(format!("smoke-{}@example.com", &uuid::Uuid::new_v4().simple().to_string()[..8]));
    }
    if lower.contains("url") || lower.contains("website") {
        return json!("https://example.com");
    }
    if lower.contains("phone") {
        return json!("+15555550100");
    }
    if infer_numbers {
        if ["price", "amount", "total", "cost", "balance"].iter().any(|k| lower.contains(k)) {
            return json!(9.99);
        }
        if lower.contains("stock") || lower.contains("inventory") {
            return json!(100);
        }
        if ["quantity", "qty", "count"].iter().any(|k| lower.contains(k)) || lower.ends_with("_id") {
            return json!(1);
        }
        if lower.starts_with("is_") || lower.starts_with("has_") || lower == "active" || lower == "enabled" {
            return json!(true);
        }
    }
    json!(format!("smoke-{lower}"))
}

/// Value at a dotted path (`data.items.0.id`, optionally `$.`-prefixed).
pub fn extract<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let trimmed = path.trim();
    let trimmed = trimmed
        .strip_prefix("$.")
        .or_else(|| trimmed.strip_prefix('$'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Some(value);
    }
    trimmed.split('.').try_fold(value, |current, segment| match current {
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// RuntimeHarness
// ---------------------------------------------------------------------------

/// Production [`SmokeHarness`]: drives an [`ApplicationRuntime`] and a
/// [`ScenarioExecutor`].
pub struct RuntimeHarness<R: ApplicationRuntime> {
    runtime: Arc<R>,
    executor: Arc<ScenarioExecutor>,
    max_concurrency: usize,
}

impl<R: ApplicationRuntime + 'static> RuntimeHarness<R> {
    /// Harness over `runtime`, with timeouts and concurrency from `config`.
    pub fn new(runtime: R, config: &RuntimeConfig, ir: Arc<ApplicationIr>) -> DomainResult<Self> {
        let executor = ScenarioExecutor::new(Duration::from_secs(config.request_timeout_secs), ir)?;
        Ok(Self {
            runtime: Arc::new(runtime),
            executor: Arc::new(executor),
            max_concurrency: config.max_concurrency.max(1),
        })
    }

    /// Start the target, retrying once after a rebuild.
    pub async fn start(&self, target: &TargetHandle) -> DomainResult<RuntimeHandle> {
        match self.runtime.start(target).await {
            Err(DomainError::StartupFailed { reason, logs }) => {
                warn!(reason = %reason, "Startup failed, rebuilding and retrying once");
                if let Err(e) = self.runtime.rebuild(target).await {
                    return Err(DomainError::StartupFailed {
                        reason: format!("{reason}; {e}"),
                        logs,
                    });
                }
                self.runtime.start(target).await
            }
            other => other,
        }
    }

    /// Execute every scenario against a running instance.
    ///
    /// Log-window traces are attached inline only when scenarios run one at
    /// a time; otherwise untraced server errors are re-checked serially
    /// afterwards so another scenario's traceback is never attributed.
    pub async fn run_scenarios(&self, handle: &RuntimeHandle, scenarios: &[Scenario]) -> Vec<ScenarioResult> {
        let serial = self.max_concurrency == 1;
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut handles = Vec::with_capacity(scenarios.len());
        let mut guard = AbortOnDrop::default();

        for scenario in scenarios {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "Scenario pool closed");
                    break;
                }
            };
            let executor = self.executor.clone();
            let base_url = handle.base_url.clone();
            let logs = serial.then(|| handle.logs.clone());
            let scenario = scenario.clone();
            let task = tokio::spawn(async move {
                let _permit = permit;
                executor.execute(&base_url, &scenario, logs.as_ref()).await
            });
            guard.0.push(task.abort_handle());
            handles.push(task);
        }

        let mut results: Vec<ScenarioResult> = join_all(handles)
            .await
            .into_iter()
            .zip(scenarios)
            .map(|(joined, scenario)| joined.unwrap_or_else(|e| aborted_result(scenario, &e.to_string())))
            .collect();
        if !serial {
            self.retrace(handle, scenarios, &mut results).await;
        }
        results
    }

    /// Re-run each untraced server-error scenario alone and attach the trace
    /// its own output window holds, if it fails the same way again.
    async fn retrace(&self, handle: &RuntimeHandle, scenarios: &[Scenario], results: &mut [ScenarioResult]) {
        for (result, scenario) in results.iter_mut().zip(scenarios) {
            let Some(violation) = result
                .violation
                .as_mut()
                .filter(|v| v.is_server_error() && v.stack_trace.is_none())
            else {
                continue;
            };
            let rerun = self
                .executor
                .execute(&handle.base_url, scenario, Some(&handle.logs))
                .await;
            let trace = rerun
                .violation
                .filter(|r| {
                    r.http_method == violation.http_method
                        && r.endpoint == violation.endpoint
                        && r.actual_status == violation.actual_status
                })
                .and_then(|r| r.stack_trace);
            match trace {
                Some(trace) => {
                    violation.error_kind.clone_from(&trace.exception_kind);
                    violation.stack_trace = Some(trace);
                }
                None => debug!(scenario = %scenario.name, "Serial re-check produced no matching trace"),
            }
        }
    }

    /// Stop an instance, logging rather than returning a failure.
    pub async fn stop(&self, handle: &RuntimeHandle) {
        if let Err(e) = self.runtime.stop(handle).await {
            warn!(error = %e, "Failed to stop target instance");
        }
    }
}

/// Aborts spawned scenario tasks when the suite future is dropped.
#[derive(Default)]
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// A failing result for a scenario whose task died.
fn aborted_result(scenario: &Scenario, reason: &str) -> ScenarioResult {
    let step = scenario.steps.first();
    ScenarioResult {
        scenario_name: scenario.name.clone(),
        passed: false,
        failed_step: Some(0),
        violation: step.map(|s| Violation {
            endpoint: s.path.clone(),
            http_method: s.method,
            expected_status: s.expected_status,
            actual_status: 0,
            error_kind: SCENARIO_EXECUTION_ERROR.to_string(),
            error_message: reason.to_string(),
            stack_trace: None,
            scenario_name: Some(scenario.name.clone()),
        }),
        extracted: BTreeMap::new(),
        duration_ms: 0,
    }
}

#[async_trait]
impl<R: ApplicationRuntime + 'static> SmokeHarness for RuntimeHarness<R> {
    async fn run_suite(
        &self,
        target: &TargetHandle,
        scenarios: &[Scenario],
        shutdown: Option<&mut broadcast::Receiver<()>>,
    ) -> DomainResult<SmokeRun> {
        let handle = self.start(target).await?;
        info!(base_url = %handle.base_url, scenarios = scenarios.len(), "Target ready, running smoke suite");
        let results = match shutdown {
            Some(rx) => tokio::select! {
                results = self.run_scenarios(&handle, scenarios) => Some(results),
                () = wait_for_shutdown(rx) => None,
            },
            None => Some(self.run_scenarios(&handle, scenarios).await),
        };
        let raw_logs = self.runtime.collect_logs(&handle).await;
        self.stop(&handle).await;
        match results {
            Some(results) => Ok(SmokeRun { results, raw_logs }),
            None => {
                info!("Smoke suite cancelled, target stopped");
                Err(DomainError::Cancelled)
            }
        }
    }

    async fn rebuild(&self, target: &TargetHandle) -> DomainResult<()> {
        self.runtime.rebuild(target).await
    }
}

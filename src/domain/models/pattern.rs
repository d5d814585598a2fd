//! Cross-run learning records: known fixes and anti-patterns.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repair::FixType;
use super::strategy::StrategyType;

/// Lookup key for the known-fix cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixPatternKey {
    /// Violation kind, as classified.
    pub error_kind: String,
    /// Endpoint as `METHOD /path`.
    pub endpoint: String,
    /// Empty when the violation carried no trace.
    pub exception_kind: String,
}

impl FixPatternKey {
    /// Build a key; a missing exception kind becomes the empty string.
    pub fn new(
        error_kind: impl Into<String>,
        endpoint: impl Into<String>,
        exception_kind: Option<&str>,
    ) -> Self {
        Self {
            error_kind: error_kind.into(),
            endpoint: endpoint.into(),
            exception_kind: exception_kind.unwrap_or_default().to_string(),
        }
    }
}

impl fmt::Display for FixPatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.error_kind, self.endpoint, self.exception_kind)
    }
}

/// A fix that worked before, replayable as a literal substitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixPattern {
    /// Cache key the pattern is stored under.
    pub key: FixPatternKey,
    /// Strategy of the violation the fix repaired.
    pub strategy_type: StrategyType,
    /// Mutation the fix performed.
    pub fix_type: FixType,
    /// File the fix was applied to, relative to the app root.
    pub target_file: PathBuf,
    /// Text the fix replaced.
    pub old_fragment: String,
    /// Text the fix wrote.
    pub new_fragment: String,
    /// Runs in which replaying the fix resolved the violation.
    pub success_count: u32,
    /// Runs in which it did not.
    pub failure_count: u32,
    /// Last time either counter changed.
    pub updated_at: DateTime<Utc>,
}

impl FixPattern {
    /// Historical success rate; zero when never attempted.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        f64::from(self.success_count) / f64::from(total)
    }
}

/// What an anti-pattern is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AntiPatternScope {
    /// Applies to one entity class.
    Entity(String),
    /// Applies to one endpoint.
    Endpoint(String),
    /// Applies wherever a given exception is raised.
    ExceptionKind(String),
}

impl AntiPatternScope {
    /// Storage name of the scope kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Entity(_) => "entity",
            Self::Endpoint(_) => "endpoint",
            Self::ExceptionKind(_) => "exception_kind",
        }
    }

    /// The entity, endpoint or exception the scope names.
    pub fn value(&self) -> &str {
        match self {
            Self::Entity(v) | Self::Endpoint(v) | Self::ExceptionKind(v) => v,
        }
    }

    /// Rebuild a scope from its stored parts.
    pub fn from_parts(kind: &str, value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        match kind {
            "entity" => Some(Self::Entity(value)),
            "endpoint" => Some(Self::Endpoint(value)),
            "exception_kind" => Some(Self::ExceptionKind(value)),
            _ => None,
        }
    }
}

/// A fragment known to be wrong, with its known-correct replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiPattern {
    /// Store-assigned identifier.
    pub id: Uuid,
    /// Where the anti-pattern applies.
    pub scope: AntiPatternScope,
    /// Fragment to look for.
    pub wrong_fragment: String,
    /// Fragment to substitute.
    pub correct_fragment: String,
    /// Human-readable description.
    pub description: String,
    /// File the fragment was seen in, relative to the app root.
    pub target_file: Option<PathBuf>,
    /// How many times the substitution has been applied.
    pub prevented_count: u32,
    /// When the anti-pattern was learned.
    pub created_at: DateTime<Utc>,
}

impl AntiPattern {
    /// A fresh anti-pattern with a new id and a zero counter.
    pub fn new(
        scope: AntiPatternScope,
        wrong_fragment: impl Into<String>,
        correct_fragment: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            wrong_fragment: wrong_fragment.into(),
            correct_fragment: correct_fragment.into(),
            description: description.into(),
            target_file: None,
            prevented_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Record the file the fragment was seen in.
    pub fn with_target_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_file = Some(path.into());
        self
    }
}

//! Repair strategy categories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The coarse repair category assigned to a violation.
///
/// Re-computed every iteration; never stored on the violation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyType {
    /// Schema constraints: nullability, defaults, cascades.
    Database,
    /// Request-schema validation.
    Validation,
    /// Missing imports or undefined names.
    Import,
    /// Attribute access on the wrong object.
    Attribute,
    /// Missing route handlers.
    Route,
    /// Type mismatches.
    TypeMismatch,
    /// Missing dictionary keys.
    Key,
    /// Business rules in service code.
    ServiceLogic,
    /// Anything else; only the fallback repairer handles it.
    Generic,
}

impl StrategyType {
    /// Every strategy, in declaration order.
    pub const ALL: [StrategyType; 9] = [
        Self::Database,
        Self::Validation,
        Self::Import,
        Self::Attribute,
        Self::Route,
        Self::TypeMismatch,
        Self::Key,
        Self::ServiceLogic,
        Self::Generic,
    ];

    /// Wire name, e.g. `SERVICE_LOGIC`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "DATABASE",
            Self::Validation => "VALIDATION",
            Self::Import => "IMPORT",
            Self::Attribute => "ATTRIBUTE",
            Self::Route => "ROUTE",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::Key => "KEY",
            Self::ServiceLogic => "SERVICE_LOGIC",
            Self::Generic => "GENERIC",
        }
    }

    /// Whether the strategy may be attempted deterministically before
    /// falling back to the external repairer.
    ///
    /// `Attribute` and `TypeMismatch` have no safe textual patch and always go
    /// to the fallback.
    pub fn has_deterministic_procedure(&self) -> bool {
        !matches!(self, Self::Attribute | Self::TypeMismatch | Self::Generic)
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == normalized)
            .ok_or_else(|| format!("Unknown strategy type: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        for st in StrategyType::ALL {
            assert_eq!(st.as_str().parse::<StrategyType>().unwrap(), st);
        }
        assert_eq!(
            "service-logic".parse::<StrategyType>().unwrap(),
            StrategyType::ServiceLogic
        );
        assert!("nope".parse::<StrategyType>().is_err());
    }
}

//! CLI output formatting
//!
//! Every command produces a [`CommandOutput`] rendered either as
//! human-readable text or as JSON (`--json`).

pub mod progress;
pub mod table;

pub use progress::{create_progress_bar, create_spinner, ProgressBarExt};
pub use table::TableFormatter;

use serde::Serialize;

/// A command result that renders as text or JSON.
pub trait CommandOutput: Serialize {
    /// Rendering for terminals.
    fn to_human(&self) -> String;

    /// Rendering for `--json`; defaults to the serde representation.
    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Print `result` in the selected mode.
pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to at most `max_len` characters, appending "..." if
/// truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ValueError: bad input", 10), "ValueEr...");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}

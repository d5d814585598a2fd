//! Table output formatting for CLI commands
//!
//! Formats repair reports, known fixes, and parsed traces using comfy-table.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use super::truncate;
use crate::domain::models::{
    FixPattern, IterationRecord, RepairFix, RepairStatus, StackTrace, UnresolvedViolation,
};

/// Table formatter for CLI output
pub struct TableFormatter {
    /// Whether to use colors in output
    use_colors: bool,
    /// Maximum width for tables (None = auto)
    max_width: Option<u16>,
}

impl TableFormatter {
    /// Formatter that colors output when the terminal supports it.
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    /// Formatter with explicit color and width settings.
    pub const fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// Per-iteration pass rates, violations, and repairs.
    pub fn format_iterations(&self, iterations: &[IterationRecord]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Iter", "Pass rate", "Violations", "Repairs", "Kept", "Notes"]));

        for record in iterations {
            let mut notes = Vec::new();
            if record.startup_failed {
                notes.push("startup failed");
            }
            if record.rebuild_failed {
                notes.push("rebuild failed");
            }
            table.add_row(vec![
                Cell::new(record.iteration),
                self.rate_cell(record.pass_rate),
                Cell::new(record.violations.len()),
                Cell::new(record.repairs_applied),
                Cell::new(record.repairs_successful),
                Cell::new(notes.join(", ")),
            ]);
        }

        table.to_string()
    }

    /// Every attempted fix, including failed and reverted ones.
    pub fn format_fixes(&self, fixes: &[RepairFix]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Iter", "Strategy", "Fix", "File", "Result", "Description"]));

        for fix in fixes {
            let (label, color) = match (fix.success, fix.reverted) {
                (true, false) => ("applied", Color::Green),
                (true, true) => ("reverted", Color::Yellow),
                (false, _) => ("failed", Color::Red),
            };
            table.add_row(vec![
                Cell::new(fix.iteration),
                Cell::new(fix.strategy_type),
                Cell::new(fix.fix_type.as_str()),
                Cell::new(truncate(&fix.file_path.to_string_lossy(), 40)),
                self.colored(label, color),
                Cell::new(truncate(&fix.description, 50)),
            ]);
        }

        table.to_string()
    }

    /// Table of violations left failing at the end of a run.
    pub fn format_unresolved(&self, unresolved: &[UnresolvedViolation]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["Violation", "Actual", "Strategy", "Reason"]));

        for item in unresolved {
            table.add_row(vec![
                Cell::new(item.violation.id()),
                Cell::new(item.violation.actual_status),
                Cell::new(item.strategy.map_or_else(|| "-".to_string(), |s| s.to_string())),
                Cell::new(truncate(&item.reason, 60)),
            ]);
        }

        table.to_string()
    }

    /// Table of known fixes.
    pub fn format_patterns(&self, patterns: &[FixPattern]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&[
            "Error kind", "Endpoint", "Exception", "Fix", "File", "OK", "Fail", "Updated",
        ]));

        for pattern in patterns {
            let rate = pattern.success_rate();
            let ok_color = if rate >= 0.7 { Color::Green } else { Color::Yellow };
            table.add_row(vec![
                Cell::new(&pattern.key.error_kind),
                Cell::new(truncate(&pattern.key.endpoint, 30)),
                Cell::new(if pattern.key.exception_kind.is_empty() {
                    "-"
                } else {
                    pattern.key.exception_kind.as_str()
                }),
                Cell::new(pattern.fix_type.as_str()),
                Cell::new(truncate(&pattern.target_file.to_string_lossy(), 30)),
                self.colored(pattern.success_count.to_string(), ok_color),
                Cell::new(pattern.failure_count),
                Cell::new(pattern.updated_at.format("%Y-%m-%d %H:%M")),
            ]);
        }

        table.to_string()
    }

    /// Table of parsed stack traces.
    pub fn format_traces(&self, traces: &[StackTrace]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["#", "Exception", "Message", "Location", "Function"]));

        for (i, trace) in traces.iter().enumerate() {
            let location = match (&trace.source_file, trace.source_line) {
                (Some(file), Some(line)) => format!("{file}:{line}"),
                (Some(file), None) => file.clone(),
                _ => "-".to_string(),
            };
            table.add_row(vec![
                Cell::new(i + 1),
                self.colored(&trace.exception_kind, Color::Red),
                Cell::new(truncate(&trace.exception_message, 50)),
                Cell::new(truncate(&location, 45)),
                Cell::new(trace.function.as_deref().unwrap_or("-")),
            ]);
        }

        table.to_string()
    }

    /// A status line, colored by how the run ended.
    pub fn format_status(&self, status: RepairStatus) -> String {
        let color = match status {
            RepairStatus::TargetReached => Color::Green,
            RepairStatus::Converged | RepairStatus::IterationLimit => Color::Yellow,
            RepairStatus::Regressed | RepairStatus::CycleDetected => Color::Red,
            RepairStatus::Cancelled | RepairStatus::Running => Color::DarkGrey,
        };
        let mut table = Table::new();
        table.load_preset(presets::NOTHING);
        table.add_row(vec![self.colored(status.as_str(), color).add_attribute(Attribute::Bold)]);
        table.to_string().trim().to_string()
    }

    fn rate_cell(&self, rate: f64) -> Cell {
        let color = if rate >= 0.999 {
            Color::Green
        } else if rate >= 0.5 {
            Color::Yellow
        } else {
            Color::Red
        };
        self.colored(format!("{:.1}%", rate * 100.0), color)
    }

    fn colored(&self, text: impl ToString, color: Color) -> Cell {
        let cell = Cell::new(text.to_string());
        if self.use_colors {
            cell.fg(color)
        } else {
            cell
        }
    }

    /// Create a base table with common settings
    fn create_base_table(&self) -> Table {
        let mut table = Table::new();

        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(width);
        }

        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

/// Check if color output is supported
fn supports_color() -> bool {
    // Respect NO_COLOR environment variable
    if env::var("NO_COLOR").is_ok() {
        return false;
    }

    if let Ok(term) = env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    true
}

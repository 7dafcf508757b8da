//! Output formatting for CLI commands.
//!
//! Every command result is plain serializable data, printed either as a
//! comfy-table rendering or as pretty JSON.

use std::env;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

use crate::domain::models::{AutofixSummary, CheckDefinition, CheckStatus, CheckSuiteResult, Issue, Severity};

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to a maximum number of characters, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header(names: &[&str]) -> Vec<Cell> {
    names.iter().map(|n| Cell::new(n).add_attribute(Attribute::Bold)).collect()
}

const fn status_color(status: CheckStatus) -> Color {
    match status {
        CheckStatus::Passed => Color::Green,
        CheckStatus::Failed => Color::Red,
        CheckStatus::Timeout => Color::Yellow,
        CheckStatus::Error => Color::Magenta,
    }
}

const fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Error => Color::Red,
        Severity::Warning => Color::Yellow,
        Severity::Info => Color::Cyan,
    }
}

fn status_cell(status: CheckStatus, colors: bool) -> Cell {
    let cell = Cell::new(status.as_str());
    if colors {
        cell.fg(status_color(status))
    } else {
        cell
    }
}

fn issue_rows(table: &mut Table, issues: &[Issue], colors: bool) {
    for issue in issues {
        let location = match (issue.file(), issue.line) {
            (Some(file), Some(line)) => format!("{}:{line}", file.display()),
            (Some(file), None) => file.display().to_string(),
            _ => "-".to_string(),
        };
        let severity = Cell::new(issue.severity.as_str());
        table.add_row(vec![
            Cell::new(location),
            if colors { severity.fg(severity_color(issue.severity)) } else { severity },
            Cell::new(&issue.kind),
            Cell::new(truncate(&issue.message, 70)),
            Cell::new(&issue.check_id),
        ]);
    }
}

impl CommandOutput for CheckSuiteResult {
    fn to_human(&self) -> String {
        let colors = supports_color();
        let mut checks = base_table();
        checks.set_header(header(&["Check", "Status", "Exit", "Issues", "Duration", "Note"]));
        for result in &self.check_results {
            let note = if result.cached {
                "cached".to_string()
            } else if let Some(error) = &result.error {
                truncate(error, 50)
            } else if let Some(diagnostic) = &result.parse_diagnostic {
                diagnostic.to_string()
            } else if result.possible_hang {
                "possible hang".to_string()
            } else {
                String::new()
            };
            checks.add_row(vec![
                Cell::new(&result.check_id),
                status_cell(result.status, colors),
                Cell::new(result.exit_code.map_or_else(|| "-".to_string(), |c| c.to_string())),
                Cell::new(result.issue_count),
                Cell::new(format!("{:.2}s", result.duration().as_secs_f64())),
                Cell::new(note),
            ]);
        }

        let mut out = format!("Stage '{}'\n{checks}\n", self.stage);
        if !self.issues.is_empty() {
            let mut issues = base_table();
            issues.set_header(header(&["Location", "Severity", "Kind", "Message", "Check"]));
            issue_rows(&mut issues, &self.issues, colors);
            out.push_str(&format!("{issues}\n"));
        }
        out.push_str(&format!(
            "{} in {:.2}s ({} checks, {} issues, {} cached)",
            if self.passed { "PASSED" } else { "FAILED" },
            std::time::Duration::from_millis(self.duration_ms).as_secs_f64(),
            self.check_results.len(),
            self.issues.len(),
            self.cache_hits.len()
        ));
        out
    }
}

impl CommandOutput for AutofixSummary {
    fn to_human(&self) -> String {
        let mut iterations = base_table();
        iterations.set_header(header(&[
            "#", "Issues in", "Applied", "Rejected", "No fix", "Unroutable", "Remaining", "Re-run",
        ]));
        for record in &self.iterations {
            iterations.add_row(vec![
                Cell::new(record.index),
                Cell::new(record.issues_in),
                Cell::new(record.fixes_applied),
                Cell::new(record.fixes_rejected),
                Cell::new(record.no_fix_produced),
                Cell::new(record.issues_unroutable),
                Cell::new(record.issues_remaining),
                Cell::new(truncate(&record.checks_rerun.join(", "), 40)),
            ]);
        }

        let mut out = format!("{iterations}\n");
        if !self.final_issues.is_empty() {
            let mut issues = base_table();
            issues.set_header(header(&["Location", "Severity", "Kind", "Message", "Check"]));
            issue_rows(&mut issues, &self.final_issues, supports_color());
            out.push_str(&format!("Remaining issues:\n{issues}\n"));
        }
        out.push_str(&format!(
            "Autofix {}: {} iteration(s), {} fix(es) applied, {} issue(s) remaining",
            self.outcome,
            self.iterations.len(),
            self.total_fixes_applied(),
            self.final_issues.len()
        ));
        out
    }
}

/// Registered checks, for `quench checks`.
#[derive(Debug, Serialize)]
pub struct CheckList {
    pub checks: Vec<CheckDefinition>,
}

impl CommandOutput for CheckList {
    fn to_human(&self) -> String {
        if self.checks.is_empty() {
            return "No checks configured".to_string();
        }
        let mut table = base_table();
        table.set_header(header(&["Check", "Stages", "Command", "Format", "Cacheable", "Scope"]));
        for check in &self.checks {
            table.add_row(vec![
                Cell::new(&check.id),
                Cell::new(check.stages.join(", ")),
                Cell::new(truncate(&check.command.join(" "), 50)),
                Cell::new(check.output_format.to_string()),
                Cell::new(if check.cacheable { "yes" } else { "no" }),
                Cell::new(if check.scope.is_empty() { "*".to_string() } else { check.scope.join(", ") }),
            ]);
        }
        table.to_string()
    }
}

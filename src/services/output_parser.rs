//! Normalizes raw tool output into [`Issue`]s.
//!
//! Parsing never fails: lines or records that do not match the declared
//! format are skipped. The orchestrator reconciles the parsed count against
//! the count the tool reported and attaches a [`ParseDiagnostic`] when they
//! disagree.

use std::path::PathBuf;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::domain::models::{
    CheckDefinition, CheckResult, CheckStatus, Issue, OutputFormat, ParseDiagnostic, Severity,
};

const LOCATION_PATTERN: &str =
    r"^(?P<file>[^\s:][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?P<rest>.*)$";
const SEVERITY_PREFIX: &str = r"(?i)^(?P<sev>error|warning|warn|note|info|fatal error)\s*:\s*";
const LEADING_CODE: &str = r"^\[?(?P<code>[A-Z]{1,4}\d{1,5})(?:\]|\b)\s*(?:\[\*\]\s*)?";
const TRAILING_CODE: &str = r"\s+\[(?P<code>[a-z][a-z0-9_-]*)\]$";
const COUNT_GROUP: &str = "count";

const FILE_KEYS: &[&str] = &["filename", "file", "path", "filePath", "file_path"];
const LINE_KEYS: &[&str] = &["line", "row", "line_number", "lineNumber", "location.row", "location.line", "start.line"];
const COLUMN_KEYS: &[&str] = &["column", "col", "location.column", "location.col", "start.column"];
const MESSAGE_KEYS: &[&str] = &["message", "msg", "text", "description"];
const CODE_KEYS: &[&str] = &["code", "rule", "rule_id", "ruleId", "check_id", "symbol", "message-id", "test_id"];
const SEVERITY_KEYS: &[&str] = &["severity", "level", "type", "issue_severity"];
const WRAPPER_KEYS: &[&str] = &["results", "issues", "messages", "diagnostics", "errors"];

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn location_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&CELL, LOCATION_PATTERN)
}

fn severity_prefix_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&CELL, SEVERITY_PREFIX)
}

fn leading_code_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&CELL, LEADING_CODE)
}

fn trailing_code_regex() -> Option<&'static Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&CELL, TRAILING_CODE)
}

/// Stateless output normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputParser;

impl OutputParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse raw output into issues attributed to `check_id`.
    ///
    /// `default_kind` is used for findings that carry no rule code.
    pub fn parse(
        &self,
        check_id: &str,
        stdout: &str,
        stderr: &str,
        format: &OutputFormat,
        default_kind: &str,
    ) -> Vec<Issue> {
        let ctx = RecordContext {
            check_id,
            default_kind,
        };
        match format {
            OutputFormat::Location => output_lines(stdout, stderr)
                .filter_map(|line| parse_location_line(&ctx, line))
                .collect(),
            OutputFormat::Json => json_records(stdout)
                .iter()
                .filter_map(|record| parse_json_record(&ctx, record))
                .collect(),
            OutputFormat::JsonLines => stdout
                .lines()
                .filter_map(|line| serde_json::from_str::<Value>(line.trim()).ok())
                .flat_map(flatten_record)
                .filter_map(|record| parse_json_record(&ctx, &record))
                .collect(),
            OutputFormat::Regex { pattern } => match Regex::new(pattern) {
                Ok(re) => output_lines(stdout, stderr)
                    .filter_map(|line| re.captures(line))
                    .filter_map(|caps| parse_regex_captures(&ctx, &caps))
                    .collect(),
                Err(e) => {
                    tracing::warn!(check_id, error = %e, "invalid output pattern");
                    Vec::new()
                }
            },
            OutputFormat::Plain => Vec::new(),
        }
    }

    /// Number of candidate finding records in the output, before parsing.
    pub fn count(&self, format: &OutputFormat, stdout: &str, stderr: &str) -> u32 {
        let n = match format {
            OutputFormat::Location => location_regex().map_or(0, |re| {
                output_lines(stdout, stderr).filter(|l| re.is_match(l)).count()
            }),
            OutputFormat::Json => json_records(stdout).len(),
            OutputFormat::JsonLines => stdout
                .lines()
                .filter(|l| l.trim_start().starts_with('{'))
                .count(),
            OutputFormat::Regex { pattern } => Regex::new(pattern).map_or(0, |re| {
                output_lines(stdout, stderr).filter(|l| re.is_match(l)).count()
            }),
            OutputFormat::Plain => 0,
        };
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    /// Issue count a check reports about itself.
    ///
    /// Uses the declared summary pattern when it matches, then the format's
    /// record count, then 1 for a failed check that printed anything.
    /// Timed-out and errored runs report nothing.
    pub fn reported_count(&self, check: &CheckDefinition, result: &CheckResult) -> u32 {
        if !matches!(result.status, CheckStatus::Passed | CheckStatus::Failed) {
            return 0;
        }
        if let Some(n) = check
            .summary_pattern
            .as_deref()
            .and_then(|p| summary_count(p, &result.stdout, &result.stderr))
        {
            return n;
        }
        let counted = self.count(&check.output_format, &result.stdout, &result.stderr);
        if counted > 0 {
            return counted;
        }
        let printed = !result.stdout.trim().is_empty() || !result.stderr.trim().is_empty();
        u32::from(result.status == CheckStatus::Failed && printed)
    }

    /// Parse a result's output and reconcile it with the reported count.
    ///
    /// Results reporting no issues are not parsed. When nothing parses, an
    /// `Unparsed` diagnostic is attached and `issue_count` is left as
    /// reported; otherwise `issue_count` becomes the parsed count.
    pub fn reconcile(&self, check: &CheckDefinition, result: &mut CheckResult) -> Vec<Issue> {
        if result.issue_count == 0 {
            return Vec::new();
        }

        let issues = self.parse(
            &check.id,
            &result.stdout,
            &result.stderr,
            &check.output_format,
            check.default_kind(),
        );
        let parsed = u32::try_from(issues.len()).unwrap_or(u32::MAX);

        if parsed == 0 {
            tracing::warn!(
                check_id = %check.id,
                reported = result.issue_count,
                format = %check.output_format,
                "check reported issues but none could be parsed"
            );
            result.parse_diagnostic = Some(ParseDiagnostic::Unparsed {
                reported: result.issue_count,
                format: check.output_format.to_string(),
            });
        } else if parsed != result.issue_count {
            tracing::warn!(
                check_id = %check.id,
                reported = result.issue_count,
                parsed,
                "issue count mismatch"
            );
            result.parse_diagnostic = Some(ParseDiagnostic::CountMismatch {
                reported: result.issue_count,
                parsed,
            });
            result.issue_count = parsed;
        }

        issues
    }
}

struct RecordContext<'a> {
    check_id: &'a str,
    default_kind: &'a str,
}

fn output_lines<'a>(stdout: &'a str, stderr: &'a str) -> impl Iterator<Item = &'a str> {
    stdout.lines().chain(stderr.lines()).map(str::trim_end)
}

fn summary_count(pattern: &str, stdout: &str, stderr: &str) -> Option<u32> {
    let re = Regex::new(pattern).ok()?;
    output_lines(stdout, stderr)
        .filter_map(|line| re.captures(line))
        .filter_map(|caps| caps.name(COUNT_GROUP)?.as_str().parse::<u32>().ok())
        .last()
}

// ---------------------------------------------------------------------------
// location format
// ---------------------------------------------------------------------------

fn parse_location_line(ctx: &RecordContext<'_>, line: &str) -> Option<Issue> {
    let caps = location_regex()?.captures(line)?;
    let file = caps.name("file")?.as_str().trim();
    let line_no = caps.name("line")?.as_str().parse::<u32>().ok()?;
    let column = caps.name("col").and_then(|m| m.as_str().parse::<u32>().ok());
    let mut rest = caps.name("rest").map_or("", |m| m.as_str()).trim();

    let mut severity = Severity::Error;
    if let Some(sev) = severity_prefix_regex().and_then(|re| re.captures(rest)) {
        let label = sev.name("sev").map_or("", |m| m.as_str());
        severity = Severity::from_label(label.split_whitespace().last().unwrap_or(label))
            .unwrap_or(Severity::Error);
        rest = rest[sev.get(0).map_or(0, |m| m.end())..].trim();
    }

    let mut kind = None;
    if let Some(code) = leading_code_regex().and_then(|re| re.captures(rest)) {
        kind = code.name("code").map(|m| m.as_str().to_string());
        if let Some(code_str) = kind.as_deref() {
            severity = severity_from_code(code_str).unwrap_or(severity);
        }
        rest = rest[code.get(0).map_or(0, |m| m.end())..].trim();
    } else if let Some(code) = trailing_code_regex().and_then(|re| re.captures(rest)) {
        kind = code.name("code").map(|m| m.as_str().to_string());
        rest = rest[..code.get(0).map_or(rest.len(), |m| m.start())].trim();
    }

    if rest.is_empty() {
        return None;
    }

    Some(
        Issue::new(
            ctx.check_id,
            kind.unwrap_or_else(|| ctx.default_kind.to_string()),
            rest,
        )
        .at(file, Some(line_no), column)
        .with_severity(severity),
    )
}

/// pycodestyle-style codes: `W` warnings, `C`/`N`/`D` conventions.
fn severity_from_code(code: &str) -> Option<Severity> {
    match code.chars().next()? {
        'W' => Some(Severity::Warning),
        'C' | 'N' | 'D' | 'R' => Some(Severity::Info),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// json / json_lines formats
// ---------------------------------------------------------------------------

fn json_records(stdout: &str) -> Vec<Value> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items.into_iter().flat_map(flatten_record).collect(),
        Ok(Value::Object(map)) => {
            for key in WRAPPER_KEYS {
                if let Some(Value::Array(items)) = map.get(*key) {
                    return items.iter().cloned().flat_map(flatten_record).collect();
                }
            }
            flatten_record(Value::Object(map))
        }
        Ok(_) => Vec::new(),
        Err(e) => {
            tracing::debug!(error = %e, "output is not valid JSON");
            Vec::new()
        }
    }
}

/// Expand per-file records (`{"filePath": .., "messages": [..]}`) into one
/// record per message carrying the file path.
fn flatten_record(value: Value) -> Vec<Value> {
    let Value::Object(map) = value else {
        return Vec::new();
    };
    let file = FILE_KEYS
        .iter()
        .find_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::to_string);
    match (file, map.get("messages")) {
        (Some(file), Some(Value::Array(messages))) => messages
            .iter()
            .filter_map(|m| {
                let mut inner = m.as_object()?.clone();
                inner
                    .entry("file".to_string())
                    .or_insert_with(|| Value::String(file.clone()));
                Some(Value::Object(inner))
            })
            .collect(),
        _ => vec![Value::Object(map)],
    }
}

fn lookup<'v>(record: &'v Value, keys: &[&str]) -> Option<&'v Value> {
    keys.iter().find_map(|key| {
        let mut current = record;
        for part in key.split('.') {
            current = current.get(part)?;
        }
        (!current.is_null()).then_some(current)
    })
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_json_record(ctx: &RecordContext<'_>, record: &Value) -> Option<Issue> {
    let message = lookup(record, MESSAGE_KEYS).and_then(value_to_string)?;
    let kind = lookup(record, CODE_KEYS)
        .and_then(value_to_string)
        .unwrap_or_else(|| ctx.default_kind.to_string());
    let severity = lookup(record, SEVERITY_KEYS)
        .and_then(value_to_string)
        .and_then(|s| Severity::from_label(&s))
        .unwrap_or(Severity::Error);

    let mut issue = Issue::new(ctx.check_id, kind, message).with_severity(severity);
    if let Some(file) = lookup(record, FILE_KEYS).and_then(value_to_string) {
        let line = lookup(record, LINE_KEYS).and_then(value_to_u32);
        let column = lookup(record, COLUMN_KEYS).and_then(value_to_u32);
        issue = issue.at(PathBuf::from(file), line, column);
    }
    Some(issue)
}

// ---------------------------------------------------------------------------
// regex format
// ---------------------------------------------------------------------------

fn parse_regex_captures(ctx: &RecordContext<'_>, caps: &Captures<'_>) -> Option<Issue> {
    let whole = caps.get(0)?.as_str().trim();
    let message = caps
        .name("message")
        .map_or(whole, |m| m.as_str().trim());
    if message.is_empty() {
        return None;
    }
    let kind = caps
        .name("code")
        .map_or_else(|| ctx.default_kind.to_string(), |m| m.as_str().to_string());
    let severity = caps
        .name("severity")
        .and_then(|m| Severity::from_label(m.as_str()))
        .unwrap_or(Severity::Error);

    let mut issue = Issue::new(ctx.check_id, kind, message).with_severity(severity);
    if let Some(file) = caps.name("file") {
        let line = caps.name("line").and_then(|m| m.as_str().parse().ok());
        let column = caps.name("col").and_then(|m| m.as_str().parse().ok());
        issue = issue.at(file.as_str(), line, column);
    }
    Some(issue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    fn parse(format: &OutputFormat, stdout: &str) -> Vec<Issue> {
        OutputParser::new().parse("chk", stdout, "", format, "chk")
    }

    #[test]
    fn static_patterns_compile() {
        assert!(location_regex().is_some());
        assert!(severity_prefix_regex().is_some());
        assert!(leading_code_regex().is_some());
        assert!(trailing_code_regex().is_some());
    }

    #[test]
    fn location_flake8_style() {
        let out = "a.py:1:80: E501 line too long (88 > 79 characters)\n\
                   a.py:3:1: W291 trailing whitespace\n";
        let issues = parse(&OutputFormat::Location, out);

        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].kind, "E501");
        assert_eq!(issues[0].file(), Some(Path::new("a.py")));
        assert_eq!(issues[0].line, Some(1));
        assert_eq!(issues[0].column, Some(80));
        assert_eq!(issues[0].message, "line too long (88 > 79 characters)");
        assert_eq!(issues[1].severity, Severity::Warning);
    }

    #[test]
    fn location_mypy_style() {
        let out = "m.py:7: error: Argument 1 has incompatible type  [arg-type]\n\
                   Found 1 error in 1 file (checked 2 source files)\n";
        let issues = parse(&OutputFormat::Location, out);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, "arg-type");
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[0].column, None);
        assert_eq!(issues[0].message, "Argument 1 has incompatible type");
    }

    #[test]
    fn location_without_code_uses_default_kind() {
        let issues = parse(&OutputFormat::Location, "x.c:3:5: warning: unused variable 'y'\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, "chk");
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn location_skips_noise() {
        let out = "All done!\n\n:12: nothing\nsrc/a.py:notanumber: boom\n";
        assert!(parse(&OutputFormat::Location, out).is_empty());
    }

    #[test]
    fn json_array_ruff_style() {
        let out = r#"[{"code":"F401","filename":"a.py","location":{"row":1,"column":8},"message":"`os` imported but unused"}]"#;
        let issues = parse(&OutputFormat::Json, out);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, "F401");
        assert_eq!(issues[0].line, Some(1));
        assert_eq!(issues[0].column, Some(8));
    }

    #[test]
    fn json_eslint_style_is_flattened() {
        let out = r#"[{"filePath":"/p/a.js","messages":[
            {"ruleId":"no-unused-vars","severity":2,"message":"x is unused","line":1,"column":5},
            {"ruleId":"semi","severity":1,"message":"Missing semicolon","line":2,"column":9}
        ]}]"#;
        let issues = parse(&OutputFormat::Json, out);

        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].file(), Some(Path::new("/p/a.js")));
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[1].severity, Severity::Warning);
    }

    #[test]
    fn json_wrapper_object_and_bad_records() {
        let out = r#"{"results":[{"message":"ok","path":"b.py","line":"4"}, 17, {"nomessage":true}]}"#;
        let issues = parse(&OutputFormat::Json, out);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, Some(4));
    }

    #[test]
    fn json_garbage_yields_nothing() {
        assert!(parse(&OutputFormat::Json, "Traceback (most recent call last):").is_empty());
        assert_eq!(OutputParser::new().count(&OutputFormat::Json, "not json", ""), 0);
    }

    #[test]
    fn json_lines_skip_bad_lines() {
        let out = "{\"message\":\"one\",\"file\":\"a\",\"line\":1}\nnot json\n{\"message\":\"two\"}\n";
        let issues = parse(&OutputFormat::JsonLines, out);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[1].file_path, None);
    }

    #[test]
    fn regex_named_groups() {
        let format = OutputFormat::Regex {
            pattern: r"^(?P<severity>\w+) (?P<file>\S+) L(?P<line>\d+) (?P<code>\w+): (?P<message>.+)$".into(),
        };
        let issues = parse(&format, "warning lib.sh L4 SC2086: Double quote to prevent globbing\n");

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, "SC2086");
        assert_eq!(issues[0].severity, Severity::Warning);
        assert_eq!(issues[0].line, Some(4));
    }

    #[test]
    fn plain_never_parses() {
        assert!(parse(&OutputFormat::Plain, "a.py:1:1: E1 x").is_empty());
    }

    fn failed(stdout: &str) -> CheckResult {
        CheckResult::from_exit("chk", Some(1), stdout.into(), String::new(), Duration::ZERO)
    }

    #[test]
    fn reported_count_prefers_summary_pattern() {
        let mut check = CheckDefinition::new("chk", vec!["x".into()]);
        check.summary_pattern = Some(r"Found (?P<count>\d+) errors?".into());
        let result = failed("a.py:1: error: x\nFound 3 errors in 1 file\n");

        assert_eq!(OutputParser::new().reported_count(&check, &result), 3);
    }

    #[test]
    fn reported_count_falls_back_to_one() {
        let check = CheckDefinition::new("chk", vec!["x".into()]).with_format(OutputFormat::Plain);
        let parser = OutputParser::new();

        assert_eq!(parser.reported_count(&check, &failed("it broke")), 1);
        assert_eq!(parser.reported_count(&check, &failed("")), 0);

        let timed_out = CheckResult::timed_out("chk", "a:1: x".into(), String::new(), Duration::ZERO, 5);
        assert_eq!(parser.reported_count(&check, &timed_out), 0);
    }

    #[test]
    fn reconcile_marks_unparsed() {
        let check = CheckDefinition::new("chk", vec!["x".into()]).with_format(OutputFormat::Plain);
        let mut result = failed("something went wrong");
        result.issue_count = 1;

        let issues = OutputParser::new().reconcile(&check, &mut result);

        assert!(issues.is_empty());
        assert_eq!(result.issue_count, 1);
        assert_eq!(
            result.parse_diagnostic,
            Some(ParseDiagnostic::Unparsed {
                reported: 1,
                format: "plain".into()
            })
        );
    }

    #[test]
    fn reconcile_records_mismatch() {
        let check = CheckDefinition::new("chk", vec!["x".into()]);
        let mut result = failed("a.py:1:1: E1 first\na.py:2:1: E2 second\n");
        result.issue_count = 5;

        let issues = OutputParser::new().reconcile(&check, &mut result);

        assert_eq!(issues.len(), 2);
        assert_eq!(result.issue_count, 2);
        assert_eq!(
            result.parse_diagnostic,
            Some(ParseDiagnostic::CountMismatch {
                reported: 5,
                parsed: 2
            })
        );
    }

    #[test]
    fn reconcile_skips_zero_count() {
        let check = CheckDefinition::new("chk", vec!["x".into()]);
        let mut result = failed("a.py:1:1: E1 would parse\n");
        result.issue_count = 0;

        assert!(OutputParser::new().reconcile(&check, &mut result).is_empty());
        assert!(result.parse_diagnostic.is_none());
    }
}

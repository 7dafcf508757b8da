//! Check domain models.
//!
//! A [`CheckDefinition`] is the static description of one external checking
//! tool, loaded once from configuration. Every invocation of it produces a
//! [`CheckResult`]; the results of one stage are gathered into a
//! [`CheckSuiteResult`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::issue::Issue;
use crate::domain::errors::CheckError;

/// Token in a command template that expands to the in-scope files.
pub const FILES_PLACEHOLDER: &str = "{files}";

/// Token in a command template that expands to the working directory.
pub const ROOT_PLACEHOLDER: &str = "{root}";

// ---------------------------------------------------------------------------
// OutputFormat
// ---------------------------------------------------------------------------

/// The shape of a tool's output, used to normalize it into issues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputFormat {
    /// `path:line[:col]: message` lines (flake8, mypy, gcc, grep -n).
    #[default]
    Location,
    /// A JSON array of finding records, or an object wrapping one.
    Json,
    /// One JSON finding record per line.
    JsonLines,
    /// A custom regular expression with named groups
    /// (`file`, `line`, `col`, `code`, `severity`, `message`).
    Regex { pattern: String },
    /// Unstructured output; never yields issues.
    Plain,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Location => write!(f, "location"),
            Self::Json => write!(f, "json"),
            Self::JsonLines => write!(f, "json_lines"),
            Self::Regex { .. } => write!(f, "regex"),
            Self::Plain => write!(f, "plain"),
        }
    }
}

// ---------------------------------------------------------------------------
// CheckDefinition
// ---------------------------------------------------------------------------

/// Static description of one check.
///
/// Definitions are immutable once the [`CheckRegistry`] is built.
///
/// [`CheckRegistry`]: crate::services::check_registry::CheckRegistry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Unique check identifier, also the tool identity in cache keys.
    pub id: String,

    /// Argv template. May contain [`FILES_PLACEHOLDER`] and
    /// [`ROOT_PLACEHOLDER`] tokens.
    pub command: Vec<String>,

    /// Stages this check belongs to.
    #[serde(default = "default_stages")]
    pub stages: Vec<String>,

    /// Per-invocation timeout; falls back to the execution default.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Whether results depend only on input content and tool version.
    #[serde(default)]
    pub cacheable: bool,

    /// Declared output format.
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Glob patterns of the files this check inspects. Empty means all files.
    #[serde(default)]
    pub scope: Vec<String>,

    /// Declared tool version string used in cache keys.
    #[serde(default)]
    pub tool_version: Option<String>,

    /// Command printing the tool version, probed when `tool_version` is unset.
    #[serde(default)]
    pub version_command: Option<Vec<String>>,

    /// Expected duration used by the adaptive strategy before any history exists.
    #[serde(default)]
    pub expected_duration_secs: Option<f64>,

    /// Regex with a `count` group matching the tool's own summary line.
    #[serde(default)]
    pub summary_pattern: Option<String>,

    /// Issue kind assigned when the tool output carries no rule code.
    #[serde(default)]
    pub issue_kind: Option<String>,

    /// Working directory for the subprocess.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_stages() -> Vec<String> {
    vec!["default".to_string()]
}

impl CheckDefinition {
    /// Create a definition with defaults for everything but id and command.
    pub fn new(id: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            id: id.into(),
            command,
            stages: default_stages(),
            timeout_secs: None,
            cacheable: false,
            output_format: OutputFormat::default(),
            scope: Vec::new(),
            tool_version: None,
            version_command: None,
            expected_duration_secs: None,
            summary_pattern: None,
            issue_kind: None,
            working_dir: None,
        }
    }

    /// Convenience constructor for `sh -c <script>` checks.
    pub fn shell(id: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(id, vec!["sh".into(), "-c".into(), script.into()])
    }

    pub fn with_stages(mut self, stages: &[&str]) -> Self {
        self.stages = stages.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    pub fn with_scope(mut self, patterns: &[&str]) -> Self {
        self.scope = patterns.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn with_tool_version(mut self, version: impl Into<String>) -> Self {
        self.tool_version = Some(version.into());
        self
    }

    pub fn with_expected_duration_secs(mut self, secs: f64) -> Self {
        self.expected_duration_secs = Some(secs);
        self
    }

    pub fn with_issue_kind(mut self, kind: impl Into<String>) -> Self {
        self.issue_kind = Some(kind.into());
        self
    }

    /// Whether the check is part of the named stage.
    pub fn runs_in_stage(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s == stage)
    }

    /// Effective timeout given the execution default.
    pub fn timeout(&self, default_secs: u64) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(default_secs))
    }

    /// Issue kind used when the output carries no rule code.
    pub fn default_kind(&self) -> &str {
        self.issue_kind.as_deref().unwrap_or(&self.id)
    }

    /// Whether the command template takes file arguments.
    pub fn takes_files(&self) -> bool {
        self.command.iter().any(|arg| arg == FILES_PLACEHOLDER)
    }

    /// Whether `path` falls inside this check's declared scope.
    ///
    /// Patterns that fail to compile never match; the config loader rejects
    /// them before a registry is built.
    pub fn in_scope(&self, path: &Path) -> bool {
        if self.scope.is_empty() {
            return true;
        }
        self.scope.iter().any(|pattern| {
            glob::Pattern::new(pattern)
                .map(|p| p.matches_path(path))
                .unwrap_or(false)
        })
    }

    /// The subset of `files` this check inspects, in input order.
    pub fn scoped_files(&self, files: &[PathBuf]) -> Vec<PathBuf> {
        files
            .iter()
            .filter(|f| self.in_scope(f))
            .cloned()
            .collect()
    }

    /// Whether any of `modified` falls inside this check's scope.
    pub fn intersects<'a>(&self, mut modified: impl Iterator<Item = &'a PathBuf>) -> bool {
        modified.any(|path| self.in_scope(path))
    }

    /// Expand the command template into a concrete argv.
    pub fn render_argv(&self, files: &[PathBuf], root: &Path) -> Vec<String> {
        let scoped = self.scoped_files(files);
        let mut argv = Vec::with_capacity(self.command.len() + scoped.len());
        for arg in &self.command {
            if arg == FILES_PLACEHOLDER {
                argv.extend(scoped.iter().map(|f| f.to_string_lossy().into_owned()));
            } else if arg.contains(ROOT_PLACEHOLDER) {
                argv.push(arg.replace(ROOT_PLACEHOLDER, &root.to_string_lossy()));
            } else {
                argv.push(arg.clone());
            }
        }
        argv
    }
}

// ---------------------------------------------------------------------------
// CheckStatus / CheckResult
// ---------------------------------------------------------------------------

/// Outcome class of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    /// Exit code zero.
    Passed,
    /// Non-zero exit code.
    Failed,
    /// Killed after exceeding its timeout.
    Timeout,
    /// Could not be launched, or was cancelled before completing.
    Error,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Error => "ERROR",
        }
    }

    /// The tool ran to completion, so its findings are authoritative.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit marker attached when parsed issues do not line up with the
/// count the tool reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseDiagnostic {
    /// The tool reported findings but none could be parsed from its output.
    Unparsed { reported: u32, format: String },
    /// Some findings were parsed, but not as many as the tool reported.
    CountMismatch { reported: u32, parsed: u32 },
}

impl fmt::Display for ParseDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unparsed { reported, format } => write!(
                f,
                "unparsed issues: tool reported {reported} but none matched the {format} format"
            ),
            Self::CountMismatch { reported, parsed } => {
                write!(f, "tool reported {reported} issues, parsed {parsed}")
            }
        }
    }
}

/// Outcome of one check invocation. Read-only once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub check_id: String,
    pub status: CheckStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Issues the tool reported, or the parsed count once reconciled.
    pub issue_count: u32,
    /// Launch failure, cancellation or crash reason.
    #[serde(default)]
    pub error: Option<String>,
    /// Whether the result was served from the result cache.
    #[serde(default)]
    pub cached: bool,
    /// Whether a possible hang was signalled while the check ran.
    #[serde(default)]
    pub possible_hang: bool,
    #[serde(default)]
    pub parse_diagnostic: Option<ParseDiagnostic>,
}

impl CheckResult {
    /// Build a result from a completed process.
    pub fn from_exit(
        check_id: impl Into<String>,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        let status = if exit_code == Some(0) {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed
        };
        Self {
            check_id: check_id.into(),
            status,
            exit_code,
            stdout,
            stderr,
            duration_ms: duration_ms(duration),
            issue_count: 0,
            error: None,
            cached: false,
            possible_hang: false,
            parse_diagnostic: None,
        }
    }

    /// A process that was killed after exceeding its timeout.
    pub fn timed_out(
        check_id: impl Into<String>,
        stdout: String,
        stderr: String,
        duration: Duration,
        timeout_secs: u64,
    ) -> Self {
        Self {
            check_id: check_id.into(),
            status: CheckStatus::Timeout,
            exit_code: None,
            stdout,
            stderr,
            duration_ms: duration_ms(duration),
            issue_count: 0,
            error: Some(CheckError::Timeout { timeout_secs }.to_string()),
            cached: false,
            possible_hang: false,
            parse_diagnostic: None,
        }
    }

    /// A check that never produced a process outcome.
    pub fn errored(check_id: impl Into<String>, reason: impl Into<String>, duration: Duration) -> Self {
        Self {
            check_id: check_id.into(),
            status: CheckStatus::Error,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: duration_ms(duration),
            issue_count: 0,
            error: Some(reason.into()),
            cached: false,
            possible_hang: false,
            parse_diagnostic: None,
        }
    }

    /// A check left unresolved by a cancelled or crashed batch.
    pub fn cancelled(check_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::errored(check_id, format!("cancelled: {}", reason.into()), Duration::ZERO)
    }

    pub fn is_passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// CheckSuiteResult
// ---------------------------------------------------------------------------

/// Outcome of running one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckSuiteResult {
    pub stage: String,
    pub check_results: Vec<CheckResult>,
    pub issues: Vec<Issue>,
    /// True only if every check passed.
    pub passed: bool,
    pub duration_ms: u64,
    /// Ids of the checks served from the result cache.
    pub cache_hits: Vec<String>,
}

impl CheckSuiteResult {
    /// Result of a stage with no selected checks.
    pub fn empty(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            check_results: Vec::new(),
            issues: Vec::new(),
            passed: true,
            duration_ms: 0,
            cache_hits: Vec::new(),
        }
    }

    /// Look up the result of one check.
    pub fn result_for(&self, check_id: &str) -> Option<&CheckResult> {
        self.check_results.iter().find(|r| r.check_id == check_id)
    }

    /// Results that did not pass.
    pub fn failed_checks(&self) -> impl Iterator<Item = &CheckResult> {
        self.check_results.iter().filter(|r| !r.is_passed())
    }

    /// Issues produced by one check.
    pub fn issues_for<'a>(&'a self, check_id: &'a str) -> impl Iterator<Item = &'a Issue> + 'a {
        self.issues.iter().filter(move |i| i.check_id == check_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_maps_to_status() {
        let ok = CheckResult::from_exit("a", Some(0), String::new(), String::new(), Duration::ZERO);
        assert_eq!(ok.status, CheckStatus::Passed);

        let failed = CheckResult::from_exit("a", Some(3), String::new(), String::new(), Duration::ZERO);
        assert_eq!(failed.status, CheckStatus::Failed);
        assert!(failed.error.is_none());

        let signalled = CheckResult::from_exit("a", None, String::new(), String::new(), Duration::ZERO);
        assert_eq!(signalled.status, CheckStatus::Failed);
    }

    #[test]
    fn only_passed_and_failed_are_completed() {
        assert!(CheckStatus::Passed.is_completed());
        assert!(CheckStatus::Failed.is_completed());
        assert!(!CheckStatus::Timeout.is_completed());
        assert!(!CheckStatus::Error.is_completed());
    }

    #[test]
    fn scope_filters_files() {
        let check = CheckDefinition::new("lint", vec!["lint".into()]).with_scope(&["*.py"]);
        let files = vec![PathBuf::from("src/a.py"), PathBuf::from("README.md")];

        assert_eq!(check.scoped_files(&files), vec![PathBuf::from("src/a.py")]);
        assert!(check.intersects(files.iter()));
        assert!(!check.intersects([PathBuf::from("x.toml")].iter()));
    }

    #[test]
    fn empty_scope_matches_everything() {
        let check = CheckDefinition::new("all", vec!["true".into()]);
        assert!(check.in_scope(Path::new("anything/at/all.bin")));
    }

    #[test]
    fn render_argv_expands_placeholders() {
        let check = CheckDefinition::new(
            "flake8",
            vec!["flake8".into(), "--config={root}/setup.cfg".into(), FILES_PLACEHOLDER.into()],
        )
        .with_scope(&["*.py"]);
        let files = vec![PathBuf::from("a.py"), PathBuf::from("b.md"), PathBuf::from("c.py")];

        let argv = check.render_argv(&files, Path::new("/proj"));
        assert_eq!(argv, vec!["flake8", "--config=/proj/setup.cfg", "a.py", "c.py"]);
        assert!(check.takes_files());
    }

    #[test]
    fn stage_membership() {
        let check = CheckDefinition::new("x", vec!["x".into()]).with_stages(&["fast", "full"]);
        assert!(check.runs_in_stage("fast"));
        assert!(check.runs_in_stage("full"));
        assert!(!check.runs_in_stage("default"));
    }

    #[test]
    fn output_format_from_yaml() {
        let yaml = "id: ruff\ncommand: [ruff, check]\noutput_format:\n  type: regex\n  pattern: '(?P<message>.*)'\n";
        let check: CheckDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            check.output_format,
            OutputFormat::Regex {
                pattern: "(?P<message>.*)".into()
            }
        );
        assert_eq!(check.stages, vec!["default"]);
        assert!(!check.cacheable);
    }
}

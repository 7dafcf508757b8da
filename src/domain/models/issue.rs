//! Normalized findings.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Map a tool's severity label onto a [`Severity`].
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "error" | "err" | "e" | "fatal" | "critical" | "high" | "2" => Some(Self::Error),
            "warning" | "warn" | "w" | "medium" | "1" => Some(Self::Warning),
            "info" | "note" | "hint" | "convention" | "refactor" | "low" | "i" | "0" => {
                Some(Self::Info)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized finding extracted from a check's output.
///
/// The `id` is derived from the finding's content so the same finding keeps
/// its identity across re-runs of the check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub kind: String,
    pub severity: Severity,
    pub file_path: Option<PathBuf>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
    /// Id of the check that produced the finding.
    pub check_id: String,
}

impl Issue {
    pub fn new(
        check_id: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let mut issue = Self {
            id: String::new(),
            kind: kind.into(),
            severity: Severity::Error,
            file_path: None,
            line: None,
            column: None,
            message: message.into(),
            check_id: check_id.into(),
        };
        issue.rehash();
        issue
    }

    /// Attach a source location.
    pub fn at(mut self, file: impl Into<PathBuf>, line: Option<u32>, column: Option<u32>) -> Self {
        self.file_path = Some(file.into());
        self.line = line;
        self.column = column;
        self.rehash();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn file(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    fn rehash(&mut self) {
        let mut hasher = Sha256::new();
        hasher.update(self.check_id.as_bytes());
        hasher.update([0]);
        if let Some(path) = &self.file_path {
            hasher.update(path.to_string_lossy().as_bytes());
        }
        hasher.update([0]);
        hasher.update(self.line.unwrap_or(0).to_le_bytes());
        hasher.update(self.column.unwrap_or(0).to_le_bytes());
        hasher.update(self.kind.as_bytes());
        hasher.update([0]);
        hasher.update(self.message.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        self.id = digest[..16].to_string();
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file_path, self.line) {
            (Some(path), Some(line)) => write!(
                f,
                "{}:{}: [{}] {}",
                path.display(),
                line,
                self.kind,
                self.message
            ),
            (Some(path), None) => write!(f, "{}: [{}] {}", path.display(), self.kind, self.message),
            _ => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_and_content_derived() {
        let a = Issue::new("flake8", "E501", "line too long").at("a.py", Some(3), Some(80));
        let b = Issue::new("flake8", "E501", "line too long").at("a.py", Some(3), Some(80));
        let c = Issue::new("flake8", "E501", "line too long").at("a.py", Some(4), Some(80));

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert_eq!(a.id.len(), 16);
    }

    #[test]
    fn severity_labels() {
        assert_eq!(Severity::from_label("Warning"), Some(Severity::Warning));
        assert_eq!(Severity::from_label("note"), Some(Severity::Info));
        assert_eq!(Severity::from_label("fatal"), Some(Severity::Error));
        assert_eq!(Severity::from_label("banana"), None);
    }

    #[test]
    fn display_includes_location() {
        let issue = Issue::new("mypy", "arg-type", "bad arg").at("m.py", Some(7), None);
        assert_eq!(issue.to_string(), "m.py:7: [arg-type] bad arg");
    }
}

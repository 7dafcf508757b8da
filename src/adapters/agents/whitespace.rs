//! Trailing whitespace and end-of-file newline fixer.
//!
//! Handles the pycodestyle whitespace family and the generic kinds emitted
//! by `grep`-style checks. Rewrites whole files, so several issues in one
//! file are fixed in a single batched call.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::errors::AgentError;
use crate::domain::models::{FileEdit, Fix, FixProposal, Issue, IssueGroup};
use crate::domain::ports::FixAgent;

const AGENT_ID: &str = "whitespace";

const DEFAULT_KINDS: &[&str] = &[
    "W291",
    "W292",
    "W293",
    "W391",
    "trailing-whitespace",
    "missing-final-newline",
];

pub struct WhitespaceAgent {
    kinds: Vec<String>,
}

impl WhitespaceAgent {
    pub fn new() -> Self {
        Self {
            kinds: DEFAULT_KINDS.iter().map(|k| (*k).to_string()).collect(),
        }
    }

    /// Also claim `kind`, e.g. a custom check's default kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kinds.push(kind.into());
        self
    }
}

impl Default for WhitespaceAgent {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip trailing whitespace and leave exactly one final newline.
pub fn normalize_whitespace(content: &str) -> String {
    let mut out: String = content
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let trimmed_len = out.trim_end_matches('\n').len();
    out.truncate(trimmed_len);
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[async_trait]
impl FixAgent for WhitespaceAgent {
    fn id(&self) -> &str {
        AGENT_ID
    }

    fn kinds(&self) -> &[String] {
        &self.kinds
    }

    fn priority(&self) -> i32 {
        10
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn can_handle(&self, issue: &Issue) -> f64 {
        if issue.file_path.is_some() && self.covers(&issue.kind) {
            0.95
        } else {
            0.0
        }
    }

    async fn fix(
        &self,
        group: &IssueGroup,
        files: &BTreeMap<PathBuf, String>,
    ) -> Result<FixProposal, AgentError> {
        let mut edits = Vec::new();
        for path in group.files() {
            let Some(content) = files.get(&path) else {
                return Err(AgentError::Io {
                    agent_id: AGENT_ID.to_string(),
                    path,
                    message: "file contents not provided".to_string(),
                });
            };
            let normalized = normalize_whitespace(content);
            if normalized != *content {
                edits.push(FileEdit::new(path, normalized));
            }
        }

        if edits.is_empty() {
            return Ok(FixProposal::none("files already normalized"));
        }
        Ok(FixProposal::Fix(
            Fix::new(AGENT_ID, group.issue_ids(), edits).with_confidence(0.95),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(kind: &str, file: &str) -> Issue {
        Issue::new("lint", kind, "whitespace").at(file, Some(1), None)
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("a  \nb\t\n\n\n"), "a\nb\n");
        assert_eq!(normalize_whitespace("a"), "a\n");
        assert_eq!(normalize_whitespace(""), "");
        assert_eq!(normalize_whitespace("a\n\n  b\n"), "a\n\n  b\n");
    }

    #[test]
    fn test_can_handle() {
        let agent = WhitespaceAgent::new().with_kind("ws");
        assert!(agent.can_handle(&issue("W291", "a.py")) > 0.9);
        assert!(agent.can_handle(&issue("ws", "a.py")) > 0.9);
        assert!(agent.can_handle(&issue("E501", "a.py")).abs() < f64::EPSILON);
        assert!(agent.can_handle(&Issue::new("lint", "W291", "no file")).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_fix_rewrites_file() {
        let agent = WhitespaceAgent::new();
        let group = IssueGroup {
            kind: "W291".into(),
            file_path: Some("a.py".into()),
            issues: vec![issue("W291", "a.py")],
        };
        let files = BTreeMap::from([(PathBuf::from("a.py"), "x = 1   \n".to_string())]);

        let FixProposal::Fix(fix) = agent.fix(&group, &files).await.unwrap() else {
            panic!("expected a fix");
        };
        assert_eq!(fix.edits, vec![FileEdit::new("a.py", "x = 1\n")]);
        assert_eq!(fix.issue_ids, group.issue_ids());
    }

    #[tokio::test]
    async fn test_clean_file_produces_no_fix() {
        let agent = WhitespaceAgent::new();
        let group = IssueGroup::single(issue("W291", "a.py"));
        let files = BTreeMap::from([(PathBuf::from("a.py"), "x = 1\n".to_string())]);

        assert!(matches!(
            agent.fix(&group, &files).await.unwrap(),
            FixProposal::NoFixProduced { .. }
        ));
    }
}

//! Fix proposals and their grouping.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::issue::Issue;

/// Full replacement content for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEdit {
    /// Path relative to the project root.
    pub path: PathBuf,
    pub new_content: String,
}

impl FileEdit {
    pub fn new(path: impl Into<PathBuf>, new_content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            new_content: new_content.into(),
        }
    }
}

/// A proposed edit produced by an agent, consumed once by the validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub issue_ids: Vec<String>,
    pub edits: Vec<FileEdit>,
    pub agent_id: String,
    /// Agent's confidence in the fix, in `[0, 1]`.
    pub confidence: f64,
}

impl Fix {
    pub fn new(agent_id: impl Into<String>, issue_ids: Vec<String>, edits: Vec<FileEdit>) -> Self {
        Self {
            issue_ids,
            edits,
            agent_id: agent_id.into(),
            confidence: 1.0,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Paths touched by this fix.
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.edits.iter().map(|e| e.path.as_path())
    }
}

/// What an agent returns for one group.
#[derive(Debug, Clone, PartialEq)]
pub enum FixProposal {
    Fix(Fix),
    NoFixProduced { reason: String },
}

impl FixProposal {
    pub fn none(reason: impl Into<String>) -> Self {
        Self::NoFixProduced {
            reason: reason.into(),
        }
    }
}

/// Validator decision on one fix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    /// Every file was well-formed and has been written.
    Accepted { files_written: Vec<PathBuf> },
    /// Nothing was written.
    Rejected { reason: String },
}

impl ValidationVerdict {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// Issues handed to one agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueGroup {
    pub kind: String,
    /// Set when the group was batched by file.
    pub file_path: Option<PathBuf>,
    pub issues: Vec<Issue>,
}

impl IssueGroup {
    pub fn single(issue: Issue) -> Self {
        Self {
            kind: issue.kind.clone(),
            file_path: issue.file_path.clone(),
            issues: vec![issue],
        }
    }

    pub fn issue_ids(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.id.clone()).collect()
    }

    /// Distinct files referenced by the group's issues, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .issues
            .iter()
            .filter_map(|i| i.file_path.clone())
            .collect();
        files.sort();
        files.dedup();
        files
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

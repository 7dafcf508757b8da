//! Autofix loop accounting.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::issue::Issue;

/// Accounting for one pass of the autofix loop.
///
/// Every field describes this iteration alone; totals are derived by summing
/// records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub index: u32,
    pub issues_in: usize,
    pub fixes_applied: usize,
    pub fixes_rejected: usize,
    pub no_fix_produced: usize,
    pub issues_unroutable: usize,
    pub issues_remaining: usize,
    pub checks_rerun: Vec<String>,
    pub duration_ms: u64,
}

/// Why a loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutofixOutcome {
    /// No issues remain.
    Converged,
    /// Iteration or wall-clock budget spent.
    Exhausted,
    /// `issues_remaining` did not move over the stuck window.
    Stuck,
    /// No issue could be routed to any agent.
    NoApplicableAgents,
    /// Cancelled from outside.
    Cancelled,
}

impl fmt::Display for AutofixOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Converged => "converged",
            Self::Exhausted => "exhausted",
            Self::Stuck => "stuck",
            Self::NoApplicableAgents => "no applicable agents",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Coordinator states.
///
/// `Init -> Iterating -> {Converged | Exhausted | Failed} -> Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutofixState {
    Init,
    Iterating { index: u32 },
    Converged,
    Exhausted,
    Failed(AutofixOutcome),
    Done(AutofixOutcome),
}

impl AutofixState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Iterating { .. } => "iterating",
            Self::Converged => "converged",
            Self::Exhausted => "exhausted",
            Self::Failed(_) => "failed",
            Self::Done(_) => "done",
        }
    }
}

/// Outcome of one coordinator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutofixSummary {
    pub run_id: Uuid,
    pub iterations: Vec<IterationRecord>,
    pub final_issues: Vec<Issue>,
    /// Issues left because no agent claimed them in the last routing pass.
    pub unroutable: Vec<Issue>,
    pub outcome: AutofixOutcome,
    pub success: bool,
    pub duration_ms: u64,
}

impl AutofixSummary {
    pub fn total_fixes_applied(&self) -> usize {
        self.iterations.iter().map(|r| r.fixes_applied).sum()
    }

    pub fn total_fixes_rejected(&self) -> usize {
        self.iterations.iter().map(|r| r.fixes_rejected).sum()
    }
}

use serde::Serialize;

use super::fix::IssueGroup;
use super::issue::Issue;

/// A group of issues assigned to one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedGroup {
    pub group: IssueGroup,
    pub agent_id: String,
    /// Lowest per-issue confidence in the group.
    pub confidence: f64,
    /// Whether the route came from the solution cache.
    pub from_solution_cache: bool,
}

/// Result of routing one issue list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoutingPlan {
    pub routed: Vec<RoutedGroup>,
    /// Issues no agent claimed above the confidence threshold.
    pub unroutable: Vec<Issue>,
}

impl RoutingPlan {
    pub fn routed_issue_count(&self) -> usize {
        self.routed.iter().map(|r| r.group.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routed.is_empty()
    }
}

/// How one agent invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationOutcome {
    Accepted,
    Rejected,
    NoFixProduced,
    Errored,
}

/// Per-agent counters for the current run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentMetrics {
    pub invocations: u32,
    pub successes: u32,
    pub rejections: u32,
    pub no_fix: u32,
    pub failures: u32,
    pub confidence_sum: f64,
}

impl AgentMetrics {
    pub fn record(&mut self, outcome: InvocationOutcome, confidence: f64) {
        self.invocations += 1;
        self.confidence_sum += confidence;
        match outcome {
            InvocationOutcome::Accepted => self.successes += 1,
            InvocationOutcome::Rejected => self.rejections += 1,
            InvocationOutcome::NoFixProduced => self.no_fix += 1,
            InvocationOutcome::Errored => self.failures += 1,
        }
    }

    pub fn average_confidence(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.confidence_sum / f64::from(self.invocations)
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            f64::from(self.successes) / f64::from(self.invocations)
        }
    }
}

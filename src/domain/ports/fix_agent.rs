use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::errors::AgentError;
use crate::domain::models::{FixProposal, Issue, IssueGroup};

/// Issue kind that matches every issue.
pub const ANY_KIND: &str = "*";

/// A fix agent.
///
/// The router only relies on the declared capabilities and the confidence
/// function; how an agent derives its edits is its own business.
#[async_trait]
pub trait FixAgent: Send + Sync {
    /// Unique agent identifier.
    fn id(&self) -> &str;

    /// Issue kinds this agent declares support for. [`ANY_KIND`] matches all.
    fn kinds(&self) -> &[String];

    /// Tie-breaker between equally confident agents; higher wins.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether the agent accepts several issues of one file in one call.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Confidence in `[0, 1]` that this agent can fix `issue`.
    fn can_handle(&self, issue: &Issue) -> f64;

    /// Propose a fix for `group`.
    ///
    /// # Arguments
    /// * `group` - Issues routed to this agent in one invocation
    /// * `files` - Current on-disk contents of the group's files, keyed by
    ///   project-relative path
    async fn fix(
        &self,
        group: &IssueGroup,
        files: &BTreeMap<PathBuf, String>,
    ) -> Result<FixProposal, AgentError>;

    /// Whether the declared kinds cover `kind`.
    fn covers(&self, kind: &str) -> bool {
        self.kinds().iter().any(|k| k == kind || k == ANY_KIND)
    }
}

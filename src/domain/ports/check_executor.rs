use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{CheckDefinition, CheckResult};

/// Runs a single check invocation.
///
/// Implementations never fail: launch errors, timeouts and cancellation are
/// all folded into the returned [`CheckResult`] status.
#[async_trait]
pub trait CheckExecutor: Send + Sync {
    /// Execute `check` against `files`.
    ///
    /// # Arguments
    /// * `check` - The check to run
    /// * `files` - Candidate files; the executor applies the check's scope
    /// * `cancel` - Cancelling it kills the process and yields `Error`
    async fn execute(
        &self,
        check: &CheckDefinition,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> CheckResult;
}

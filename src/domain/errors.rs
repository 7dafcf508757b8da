//! Domain errors for the quench check orchestrator.

use std::path::PathBuf;

use thiserror::Error;

/// Domain-level errors that can occur while orchestrating checks and fixes.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Check not found: {0}")]
    CheckNotFound(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

/// Failures of a single check invocation.
///
/// None of these abort a stage: the runner folds them into a
/// [`CheckResult`](crate::domain::models::CheckResult) with an `Error` or
/// `Timeout` status.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Failed to launch `{program}`: {source}")]
    StartFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Check command is empty")]
    EmptyCommand,

    #[error("Check exceeded its timeout of {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Check cancelled: {0}")]
    Cancelled(String),

    #[error("Failed to wait on child process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Errors raised by fix agents.
///
/// The coordinator treats every variant as "no fix produced" for the
/// affected group and keeps iterating.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent {agent_id} failed: {message}")]
    Failed { agent_id: String, message: String },

    #[error("Agent {agent_id} timed out after {timeout_secs}s")]
    Timeout { agent_id: String, timeout_secs: u64 },

    #[error("Agent {agent_id} could not read {path}: {message}")]
    Io {
        agent_id: String,
        path: PathBuf,
        message: String,
    },
}

/// Errors raised by result cache persistence.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache storage error: {0}")]
    Storage(String),

    #[error("Corrupt cache entry {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

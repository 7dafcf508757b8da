//! Progress events published on the event bus.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::autofix::AutofixOutcome;
use super::check::CheckStatus;

/// Discrete progress events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QaEvent {
    StageStarted {
        stage: String,
        check_ids: Vec<String>,
    },
    CheckCompleted {
        check_id: String,
        status: CheckStatus,
        duration_ms: u64,
        cached: bool,
    },
    /// Non-fatal: the process is alive but has used almost no CPU for a while.
    PossibleHang {
        check_id: String,
        idle_secs: u64,
        cpu_percent: f32,
    },
    IterationStarted {
        index: u32,
        issues_in: usize,
    },
    IterationCompleted {
        index: u32,
        fixes_applied: usize,
        issues_remaining: usize,
    },
    FixRejected {
        agent_id: String,
        files: Vec<PathBuf>,
        reason: String,
    },
    AutofixFinished {
        outcome: AutofixOutcome,
        iterations: usize,
        remaining: usize,
    },
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Monotonically increasing per bus.
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub event: QaEvent,
}

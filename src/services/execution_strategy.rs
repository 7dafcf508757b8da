//! Scheduling of a batch of checks over a worker budget.
//!
//! Every strategy returns exactly one [`CheckResult`] per input check, at the
//! same index. Cancellation or a crashed worker never discards results that
//! already completed; unresolved checks come back as `Error` with the reason.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::domain::models::{CheckDefinition, CheckResult, StrategyKind};
use crate::domain::ports::CheckExecutor;

/// Expected duration used when nothing better is known.
pub const FALLBACK_EXPECTED_SECS: f64 = 1.0;

const CANCELLED_REASON: &str = "batch cancelled before the check ran";

/// Worker budget derived from host concurrency.
pub fn default_worker_budget(fraction: f64) -> usize {
    let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let scaled = (cores as f64 * fraction.clamp(0.0, 1.0)).floor() as usize;
    scaled.max(1)
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `checks` over `files` using at most `worker_budget` concurrent
    /// processes.
    async fn run(
        &self,
        checks: &[CheckDefinition],
        files: &[PathBuf],
        worker_budget: usize,
        cancel: &CancellationToken,
    ) -> Vec<CheckResult>;
}

fn crashed(check_id: &str, err: &JoinError) -> CheckResult {
    if err.is_cancelled() {
        CheckResult::cancelled(check_id, "worker aborted")
    } else {
        CheckResult::errored(check_id, format!("worker crashed: {err}"), Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// DurationHistory
// ---------------------------------------------------------------------------

/// Observed check durations, smoothed across runs.
#[derive(Debug, Default)]
pub struct DurationHistory {
    observed: RwLock<HashMap<String, f64>>,
}

impl DurationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the running average.
    pub fn record(&self, check_id: &str, duration: Duration) {
        let secs = duration.as_secs_f64();
        if let Ok(mut observed) = self.observed.write() {
            observed
                .entry(check_id.to_string())
                .and_modify(|avg| *avg = 0.5 * *avg + 0.5 * secs)
                .or_insert(secs);
        }
    }

    pub fn get(&self, check_id: &str) -> Option<f64> {
        self.observed.read().ok()?.get(check_id).copied()
    }

    /// History, else the priority table, else the declared estimate, else 1s.
    pub fn expected(&self, check: &CheckDefinition, priority_table: &BTreeMap<String, f64>) -> f64 {
        self.get(&check.id)
            .or_else(|| priority_table.get(&check.id).copied())
            .or(check.expected_duration_secs)
            .unwrap_or(FALLBACK_EXPECTED_SECS)
    }
}

// ---------------------------------------------------------------------------
// SequentialStrategy
// ---------------------------------------------------------------------------

/// One check at a time, in declaration order.
pub struct SequentialStrategy {
    executor: Arc<dyn CheckExecutor>,
}

impl SequentialStrategy {
    pub fn new(executor: Arc<dyn CheckExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ExecutionStrategy for SequentialStrategy {
    fn name(&self) -> &'static str {
        "sequential"
    }

    async fn run(
        &self,
        checks: &[CheckDefinition],
        files: &[PathBuf],
        _worker_budget: usize,
        cancel: &CancellationToken,
    ) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            if cancel.is_cancelled() {
                results.push(CheckResult::cancelled(&check.id, CANCELLED_REASON));
                continue;
            }
            results.push(self.executor.execute(check, files, cancel).await);
        }
        results
    }
}

// ---------------------------------------------------------------------------
// ParallelStrategy
// ---------------------------------------------------------------------------

/// Up to `worker_budget` checks at once, bounded by a semaphore.
pub struct ParallelStrategy {
    executor: Arc<dyn CheckExecutor>,
}

impl ParallelStrategy {
    pub fn new(executor: Arc<dyn CheckExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl ExecutionStrategy for ParallelStrategy {
    fn name(&self) -> &'static str {
        "parallel"
    }

    async fn run(
        &self,
        checks: &[CheckDefinition],
        files: &[PathBuf],
        worker_budget: usize,
        cancel: &CancellationToken,
    ) -> Vec<CheckResult> {
        let semaphore = Arc::new(Semaphore::new(worker_budget.max(1)));
        let files: Arc<[PathBuf]> = files.into();
        let mut handles = Vec::with_capacity(checks.len());

        for check in checks {
            let check = check.clone();
            let executor = self.executor.clone();
            let semaphore = semaphore.clone();
            let files = files.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let permit = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    return CheckResult::cancelled(&check.id, CANCELLED_REASON);
                };
                executor.execute(&check, &files, &cancel).await
            }));
        }

        join_all(handles)
            .await
            .into_iter()
            .zip(checks)
            .map(|(joined, check)| match joined {
                Ok(result) => result,
                Err(err) => {
                    tracing::error!(check_id = %check.id, error = %err, "check worker failed");
                    crashed(&check.id, &err)
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// AdaptiveStrategy
// ---------------------------------------------------------------------------

/// Assign check indices to at most `slots` queues, longest first, each to
/// the currently least-loaded queue.
///
/// Ties on duration keep declaration order; ties on load pick the lowest
/// slot. Empty queues are dropped.
pub fn plan_slots(durations: &[f64], slots: usize) -> Vec<Vec<usize>> {
    let slots = slots.max(1).min(durations.len().max(1));
    let mut order: Vec<usize> = (0..durations.len()).collect();
    order.sort_by(|&a, &b| durations[b].total_cmp(&durations[a]).then(a.cmp(&b)));

    let mut queues: Vec<Vec<usize>> = vec![Vec::new(); slots];
    let mut loads = vec![0.0_f64; slots];
    for index in order {
        let slot = (0..slots)
            .min_by(|&a, &b| loads[a].total_cmp(&loads[b]).then(a.cmp(&b)))
            .unwrap_or(0);
        queues[slot].push(index);
        loads[slot] += durations[index].max(0.0);
    }
    queues.retain(|q| !q.is_empty());
    queues
}

/// Longest-processing-time-first packing into `worker_budget` slots.
pub struct AdaptiveStrategy {
    executor: Arc<dyn CheckExecutor>,
    history: Arc<DurationHistory>,
    priority_table: BTreeMap<String, f64>,
}

impl AdaptiveStrategy {
    pub fn new(
        executor: Arc<dyn CheckExecutor>,
        history: Arc<DurationHistory>,
        priority_table: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            executor,
            history,
            priority_table,
        }
    }

    /// Expected durations for `checks`, index-aligned.
    pub fn expected_durations(&self, checks: &[CheckDefinition]) -> Vec<f64> {
        checks
            .iter()
            .map(|c| self.history.expected(c, &self.priority_table))
            .collect()
    }
}

#[async_trait]
impl ExecutionStrategy for AdaptiveStrategy {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    async fn run(
        &self,
        checks: &[CheckDefinition],
        files: &[PathBuf],
        worker_budget: usize,
        cancel: &CancellationToken,
    ) -> Vec<CheckResult> {
        if checks.is_empty() {
            return Vec::new();
        }
        let plan = plan_slots(&self.expected_durations(checks), worker_budget);
        tracing::debug!(slots = plan.len(), plan = ?plan, "adaptive schedule");

        let slots: Arc<Mutex<Vec<Option<CheckResult>>>> = Arc::new(Mutex::new(vec![None; checks.len()]));
        let files: Arc<[PathBuf]> = files.into();
        let mut handles = Vec::with_capacity(plan.len());

        for queue in plan {
            let queue: Vec<(usize, CheckDefinition)> =
                queue.into_iter().map(|i| (i, checks[i].clone())).collect();
            let executor = self.executor.clone();
            let slots = slots.clone();
            let files = files.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                for (index, check) in queue {
                    let result = if cancel.is_cancelled() {
                        CheckResult::cancelled(&check.id, CANCELLED_REASON)
                    } else {
                        executor.execute(&check, &files, &cancel).await
                    };
                    if let Ok(mut slots) = slots.lock() {
                        slots[index] = Some(result);
                    }
                }
            }));
        }

        let mut crash_reason = None;
        for err in join_all(handles).await.into_iter().filter_map(Result::err) {
            tracing::error!(error = %err, "adaptive slot failed");
            crash_reason = Some(err);
        }

        let resolved = slots
            .lock()
            .map(|mut slots| std::mem::take(&mut *slots))
            .unwrap_or_default();
        checks
            .iter()
            .enumerate()
            .map(|(i, check)| match resolved.get(i).cloned().flatten() {
                Some(result) => result,
                None => match &crash_reason {
                    Some(err) => crashed(&check.id, err),
                    None => CheckResult::cancelled(&check.id, CANCELLED_REASON),
                },
            })
            .collect()
    }
}

/// Build the configured strategy.
pub fn build_strategy(
    kind: StrategyKind,
    executor: Arc<dyn CheckExecutor>,
    history: Arc<DurationHistory>,
    priority_table: BTreeMap<String, f64>,
) -> Arc<dyn ExecutionStrategy> {
    match kind {
        StrategyKind::Sequential => Arc::new(SequentialStrategy::new(executor)),
        StrategyKind::Parallel => Arc::new(ParallelStrategy::new(executor)),
        StrategyKind::Adaptive => Arc::new(AdaptiveStrategy::new(executor, history, priority_table)),
    }
}

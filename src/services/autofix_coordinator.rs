//! The autofix convergence loop.
//!
//! Each iteration routes the open issues, invokes agents one group at a
//! time, validates and writes their fixes, re-runs the checks whose scope
//! touches a modified file and records an [`IterationRecord`]. The loop ends
//! when no issues remain, a budget is spent, progress stalls or nothing can
//! be routed.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::AgentError;
use crate::domain::models::{
    AutofixConfig, AutofixOutcome, AutofixState, AutofixSummary, FixProposal, InvocationOutcome,
    Issue, IterationRecord, QaEvent, RoutedGroup, ValidationVerdict,
};
use crate::services::agent_router::AgentRouter;
use crate::services::event_bus::EventBus;
use crate::services::orchestrator::Orchestrator;
use crate::services::validator::Validator;

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// What the loop observed since the last transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    Begin,
    /// Top of an iteration, before any work.
    IterationStart { open_issues: usize, budget_spent: bool },
    /// An iteration was recorded.
    IterationRecorded { routed_groups: usize, stuck: bool },
    Cancelled,
    Finish,
}

/// Synchronous transition function of the coordinator.
pub fn next_state(state: AutofixState, signal: LoopSignal, max_iterations: u32) -> AutofixState {
    use AutofixState as S;
    match (state, signal) {
        (S::Init, LoopSignal::Begin) => S::Iterating { index: 0 },
        (S::Iterating { index }, LoopSignal::IterationStart { open_issues, budget_spent }) => {
            if open_issues == 0 {
                S::Converged
            } else if index >= max_iterations || budget_spent {
                S::Exhausted
            } else {
                S::Iterating { index }
            }
        }
        (S::Iterating { index }, LoopSignal::IterationRecorded { routed_groups, stuck }) => {
            if routed_groups == 0 {
                S::Failed(AutofixOutcome::NoApplicableAgents)
            } else if stuck {
                S::Failed(AutofixOutcome::Stuck)
            } else {
                S::Iterating { index: index + 1 }
            }
        }
        (S::Init | S::Iterating { .. }, LoopSignal::Cancelled) => S::Failed(AutofixOutcome::Cancelled),
        (S::Converged, LoopSignal::Finish) => S::Done(AutofixOutcome::Converged),
        (S::Exhausted, LoopSignal::Finish) => S::Done(AutofixOutcome::Exhausted),
        (S::Failed(outcome), LoopSignal::Finish) => S::Done(outcome),
        (state, _) => state,
    }
}

/// Drop repeated findings by content id, keeping first occurrences in order.
pub fn dedup_issues(issues: impl IntoIterator<Item = Issue>) -> Vec<Issue> {
    let mut seen = HashSet::new();
    issues.into_iter().filter(|i| seen.insert(i.id.clone())).collect()
}

/// Whether the last `window` records all ended with the same open count.
pub fn is_stuck(records: &[IterationRecord], window: u32) -> bool {
    let window = usize::try_from(window).unwrap_or(usize::MAX).max(2);
    if records.len() < window {
        return false;
    }
    let tail = &records[records.len() - window..];
    tail.windows(2).all(|w| w[0].issues_remaining == w[1].issues_remaining)
}

// ---------------------------------------------------------------------------
// AutofixCoordinator
// ---------------------------------------------------------------------------

#[derive(Default)]
struct IterationTally {
    fixes_applied: usize,
    fixes_rejected: usize,
    no_fix_produced: usize,
    modified: BTreeSet<PathBuf>,
}

pub struct AutofixCoordinator {
    orchestrator: Arc<Orchestrator>,
    router: Arc<AgentRouter>,
    validator: Arc<Validator>,
    config: AutofixConfig,
    events: Option<Arc<EventBus>>,
}

impl AutofixCoordinator {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        router: Arc<AgentRouter>,
        validator: Arc<Validator>,
        config: AutofixConfig,
    ) -> Self {
        Self {
            orchestrator,
            router,
            validator,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// Drive `initial_issues` towards zero.
    ///
    /// # Arguments
    /// * `initial_issues` - Open issues from the first stage run
    /// * `max_iterations` - Hard iteration budget
    /// * `files` - Candidate files handed to re-verification runs
    /// * `cancel` - Checked between routing, fixing and re-verification
    pub async fn run(
        &self,
        initial_issues: Vec<Issue>,
        max_iterations: u32,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> AutofixSummary {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let budget = self.config.wall_clock_budget_secs.map(Duration::from_secs);
        self.router.reset_run_state().await;

        tracing::info!(%run_id, issues = initial_issues.len(), max_iterations, "autofix started");

        let mut state = next_state(AutofixState::Init, LoopSignal::Begin, max_iterations);
        let mut current = dedup_issues(initial_issues);
        let mut records: Vec<IterationRecord> = Vec::new();
        let mut unroutable: Vec<Issue> = Vec::new();

        while let AutofixState::Iterating { index } = state {
            let budget_spent = budget.is_some_and(|b| started.elapsed() >= b);
            state = next_state(
                state,
                LoopSignal::IterationStart {
                    open_issues: current.len(),
                    budget_spent,
                },
                max_iterations,
            );
            if !matches!(state, AutofixState::Iterating { .. }) {
                break;
            }
            if cancel.is_cancelled() {
                state = next_state(state, LoopSignal::Cancelled, max_iterations);
                break;
            }

            let iteration_started = Instant::now();
            let issues_in = current.len();
            tracing::info!(%run_id, index, issues_in, "iteration started");
            self.publish(QaEvent::IterationStarted { index, issues_in });

            let plan = self.router.route(&current).await;
            unroutable.clone_from(&plan.unroutable);

            let mut tally = IterationTally::default();
            for routed in &plan.routed {
                if cancel.is_cancelled() {
                    break;
                }
                self.invoke(routed, &mut tally).await;
            }

            let mut checks_rerun = Vec::new();
            if !tally.modified.is_empty() && !cancel.is_cancelled() {
                checks_rerun = self.affected_checks(&tally.modified);
                current = self.reverify(current, &checks_rerun, files, cancel).await;
            }

            let record = IterationRecord {
                index,
                issues_in,
                fixes_applied: tally.fixes_applied,
                fixes_rejected: tally.fixes_rejected,
                no_fix_produced: tally.no_fix_produced,
                issues_unroutable: plan.unroutable.len(),
                issues_remaining: current.len(),
                checks_rerun,
                duration_ms: u64::try_from(iteration_started.elapsed().as_millis()).unwrap_or(u64::MAX),
            };
            tracing::info!(
                %run_id,
                index,
                fixes_applied = record.fixes_applied,
                fixes_rejected = record.fixes_rejected,
                issues_remaining = record.issues_remaining,
                "iteration completed"
            );
            self.publish(QaEvent::IterationCompleted {
                index,
                fixes_applied: record.fixes_applied,
                issues_remaining: record.issues_remaining,
            });
            records.push(record);

            if cancel.is_cancelled() {
                state = next_state(state, LoopSignal::Cancelled, max_iterations);
                break;
            }
            state = next_state(
                state,
                LoopSignal::IterationRecorded {
                    routed_groups: plan.routed.len(),
                    stuck: is_stuck(&records, self.config.stuck_window),
                },
                max_iterations,
            );
        }

        let outcome = match next_state(state, LoopSignal::Finish, max_iterations) {
            AutofixState::Done(outcome) => outcome,
            other => {
                tracing::warn!(state = other.name(), "autofix loop left in a non-final state");
                AutofixOutcome::Cancelled
            }
        };

        tracing::info!(
            %run_id,
            outcome = %outcome,
            iterations = records.len(),
            remaining = current.len(),
            "autofix finished"
        );
        self.publish(QaEvent::AutofixFinished {
            outcome,
            iterations: records.len(),
            remaining: current.len(),
        });

        AutofixSummary {
            run_id,
            iterations: records,
            final_issues: current,
            unroutable,
            outcome,
            success: outcome == AutofixOutcome::Converged,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    async fn invoke(&self, routed: &RoutedGroup, tally: &mut IterationTally) {
        let Some(agent) = self.router.registry().get(&routed.agent_id).cloned() else {
            tally.no_fix_produced += 1;
            return;
        };

        let contents = self.read_files(&routed.group.files()).await;
        let timeout = Duration::from_secs(self.config.agent_timeout_secs);
        let proposal = match tokio::time::timeout(timeout, agent.fix(&routed.group, &contents)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout {
                agent_id: routed.agent_id.clone(),
                timeout_secs: self.config.agent_timeout_secs,
            }),
        };

        let outcome = match proposal {
            Ok(FixProposal::Fix(fix)) => match self.validator.validate(&fix).await {
                ValidationVerdict::Accepted { files_written } => {
                    tally.fixes_applied += 1;
                    tally.modified.extend(files_written);
                    InvocationOutcome::Accepted
                }
                ValidationVerdict::Rejected { reason } => {
                    tally.fixes_rejected += 1;
                    self.publish(QaEvent::FixRejected {
                        agent_id: routed.agent_id.clone(),
                        files: fix.files().map(PathBuf::from).collect(),
                        reason,
                    });
                    InvocationOutcome::Rejected
                }
            },
            Ok(FixProposal::NoFixProduced { reason }) => {
                tracing::debug!(agent_id = %routed.agent_id, reason = %reason, "agent produced no fix");
                tally.no_fix_produced += 1;
                InvocationOutcome::NoFixProduced
            }
            Err(e) => {
                tracing::warn!(agent_id = %routed.agent_id, error = %e, "agent failed");
                tally.no_fix_produced += 1;
                InvocationOutcome::Errored
            }
        };
        self.router.record_outcome(routed, outcome).await;
    }

    async fn read_files(&self, paths: &[PathBuf]) -> BTreeMap<PathBuf, String> {
        let mut contents = BTreeMap::new();
        for path in paths {
            match tokio::fs::read_to_string(self.validator.root().join(path)).await {
                Ok(text) => {
                    contents.insert(path.clone(), text);
                }
                Err(e) => tracing::debug!(path = %path.display(), error = %e, "file not readable for agent"),
            }
        }
        contents
    }

    /// Ids of the stage's checks whose scope covers a modified file.
    fn affected_checks(&self, modified: &BTreeSet<PathBuf>) -> Vec<String> {
        self.orchestrator
            .registry()
            .for_stage(&self.config.stage)
            .into_iter()
            .filter(|c| c.intersects(modified.iter()))
            .map(|c| c.id)
            .collect()
    }

    /// Fresh issues from the re-run checks plus the untouched carry-over.
    async fn reverify(
        &self,
        current: Vec<Issue>,
        check_ids: &[String],
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Vec<Issue> {
        if check_ids.is_empty() {
            return current;
        }
        let budget = self
            .config
            .max_workers
            .unwrap_or_else(|| self.orchestrator.worker_budget());
        let suite = self
            .orchestrator
            .rerun_checks(&self.config.stage, check_ids, files, budget, cancel)
            .await;
        if cancel.is_cancelled() {
            return current;
        }

        // A check that timed out or errored keeps its previous findings.
        let completed: HashSet<&str> = suite
            .check_results
            .iter()
            .filter(|r| r.status.is_completed())
            .map(|r| r.check_id.as_str())
            .collect();
        for result in suite.check_results.iter().filter(|r| !r.status.is_completed()) {
            tracing::warn!(
                check_id = %result.check_id,
                status = %result.status,
                "re-verification incomplete, keeping previous issues"
            );
        }
        let fresh: Vec<Issue> = suite
            .issues
            .iter()
            .filter(|i| completed.contains(i.check_id.as_str()))
            .cloned()
            .collect();
        dedup_issues(
            current
                .into_iter()
                .filter(|i| !completed.contains(i.check_id.as_str()))
                .chain(fresh),
        )
    }

    fn publish(&self, event: QaEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

//! Stage orchestration.
//!
//! Runs every check selected for a stage: cache split, strategy dispatch,
//! result aggregation and parsing. One check failing never aborts the stage.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::domain::models::{CheckDefinition, CheckResult, CheckStatus, CheckSuiteResult, QaEvent};
use crate::services::check_registry::CheckRegistry;
use crate::services::event_bus::EventBus;
use crate::services::execution_strategy::{DurationHistory, ExecutionStrategy};
use crate::services::output_parser::OutputParser;
use crate::services::result_cache::ResultCache;

/// Runs named stages against the check registry.
pub struct Orchestrator {
    registry: Arc<CheckRegistry>,
    strategy: Arc<dyn ExecutionStrategy>,
    history: Arc<DurationHistory>,
    cache: Option<Arc<ResultCache>>,
    events: Option<Arc<EventBus>>,
    parser: OutputParser,
    worker_budget: usize,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<CheckRegistry>,
        strategy: Arc<dyn ExecutionStrategy>,
        history: Arc<DurationHistory>,
        worker_budget: usize,
    ) -> Self {
        Self {
            registry,
            strategy,
            history,
            cache: None,
            events: None,
            parser: OutputParser::new(),
            worker_budget: worker_budget.max(1),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    pub fn worker_budget(&self) -> usize {
        self.worker_budget
    }

    /// Run every check of `stage` over `files`.
    pub async fn run_stage(
        &self,
        stage: &str,
        files: &[PathBuf],
        cancel: &CancellationToken,
    ) -> CheckSuiteResult {
        if !self.registry.has_stage(stage) {
            tracing::warn!(stage, "no checks registered for stage");
            return CheckSuiteResult::empty(stage);
        }
        let checks = self.registry.for_stage(stage);
        self.run_checks(stage, checks, files, self.worker_budget, cancel).await
    }

    /// Run a subset of checks, used for re-verification after fixes.
    ///
    /// Unknown ids are logged and skipped.
    pub async fn rerun_checks(
        &self,
        stage: &str,
        check_ids: &[String],
        files: &[PathBuf],
        worker_budget: usize,
        cancel: &CancellationToken,
    ) -> CheckSuiteResult {
        let mut checks = Vec::with_capacity(check_ids.len());
        for id in check_ids {
            match self.registry.get(id) {
                Ok(check) => checks.push(check.clone()),
                Err(e) => tracing::warn!(stage, check_id = %id, error = %e, "skipping re-run of unknown check"),
            }
        }
        self.run_checks(stage, checks, files, worker_budget.max(1), cancel).await
    }

    async fn run_checks(
        &self,
        stage: &str,
        checks: Vec<CheckDefinition>,
        files: &[PathBuf],
        worker_budget: usize,
        cancel: &CancellationToken,
    ) -> CheckSuiteResult {
        let started = Instant::now();
        tracing::info!(stage, checks = checks.len(), worker_budget, strategy = self.strategy.name(), "stage started");
        self.publish(QaEvent::StageStarted {
            stage: stage.to_string(),
            check_ids: checks.iter().map(|c| c.id.clone()).collect(),
        });

        let mut slots: Vec<Option<CheckResult>> = vec![None; checks.len()];
        let mut keys: Vec<Option<String>> = vec![None; checks.len()];
        let mut cache_hits = Vec::new();

        if let Some(cache) = &self.cache {
            for (i, check) in checks.iter().enumerate().filter(|(_, c)| c.cacheable) {
                let key = cache.content_hash(check, files).await;
                if let Some(hit) = cache.lookup(&check.id, &key).await {
                    cache_hits.push(check.id.clone());
                    slots[i] = Some(hit);
                }
                keys[i] = Some(key);
            }
        }

        let misses: Vec<usize> = (0..checks.len()).filter(|&i| slots[i].is_none()).collect();
        if !misses.is_empty() {
            let batch: Vec<CheckDefinition> = misses.iter().map(|&i| checks[i].clone()).collect();
            let fresh = self.strategy.run(&batch, files, worker_budget, cancel).await;

            for (&i, result) in misses.iter().zip(fresh) {
                let check = &checks[i];
                if result.status != CheckStatus::Error {
                    self.history.record(&check.id, result.duration());
                }
                if let (Some(cache), Some(key)) = (&self.cache, &keys[i]) {
                    cache.store(&check.id, key, &result).await;
                }
                slots[i] = Some(result);
            }
        }

        let mut check_results = Vec::with_capacity(checks.len());
        let mut issues = Vec::new();
        for (check, slot) in checks.iter().zip(slots) {
            let mut result =
                slot.unwrap_or_else(|| CheckResult::cancelled(&check.id, "no result produced"));
            issues.extend(self.parser.reconcile(check, &mut result));
            self.publish(QaEvent::CheckCompleted {
                check_id: result.check_id.clone(),
                status: result.status,
                duration_ms: result.duration_ms,
                cached: result.cached,
            });
            check_results.push(result);
        }

        let passed = check_results.iter().all(CheckResult::is_passed);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            stage,
            passed,
            issues = issues.len(),
            cache_hits = cache_hits.len(),
            duration_ms,
            "stage finished"
        );

        CheckSuiteResult {
            stage: stage.to_string(),
            check_results,
            issues,
            passed,
            duration_ms,
            cache_hits,
        }
    }

    fn publish(&self, event: QaEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

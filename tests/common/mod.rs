//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use quench::domain::models::{CheckDefinition, ExecutionConfig, StrategyKind};
use quench::domain::ports::CheckExecutor;
use quench::services::{build_strategy, CheckRegistry, DurationHistory, Orchestrator, ProcessRunner, RunnerConfig};

/// Scratch project with the given `(relative path, content)` files.
pub fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    for (path, content) in files {
        write(dir.path(), path, content);
    }
    dir
}

pub fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    std::fs::write(full, content).expect("Failed to write fixture");
}

pub fn read(root: &Path, path: &str) -> String {
    std::fs::read_to_string(root.join(path)).expect("Failed to read fixture")
}

pub fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(PathBuf::from).collect()
}

/// Execution settings with a short poll interval.
pub fn fast_execution() -> ExecutionConfig {
    ExecutionConfig {
        poll_interval_ms: 20,
        term_grace_ms: 200,
        ..ExecutionConfig::default()
    }
}

/// Orchestrator running real subprocesses under `root`.
pub fn orchestrator(root: &Path, checks: Vec<CheckDefinition>, kind: StrategyKind, budget: usize) -> Orchestrator {
    let execution = fast_execution();
    let runner: Arc<dyn CheckExecutor> = Arc::new(ProcessRunner::new(RunnerConfig::from_execution(&execution, root)));
    let history = Arc::new(DurationHistory::new());
    let strategy = build_strategy(kind, runner, history.clone(), execution.priority_table);
    let registry = Arc::new(CheckRegistry::new(checks).expect("Failed to build registry"));
    Orchestrator::new(registry, strategy, history, budget)
}

/// Initialize tracing for tests that want log output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::check::CheckDefinition;

/// Main configuration structure for quench
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Registered checks
    #[serde(default)]
    pub checks: Vec<CheckDefinition>,

    /// Check scheduling and process supervision
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Fix agent routing configuration
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Autofix loop configuration
    #[serde(default)]
    pub autofix: AutofixConfig,

    /// Fix validation configuration
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which scheduling strategy runs a batch of checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Sequential,
    #[default]
    Parallel,
    Adaptive,
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExecutionConfig {
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Fixed worker budget; detected from host concurrency when unset
    #[serde(default)]
    pub worker_budget: Option<usize>,

    /// Fraction of detected host concurrency to use (0, 1]
    #[serde(default = "default_worker_fraction")]
    pub worker_fraction: f64,

    /// Liveness poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Seconds of low CPU before a possible hang is signalled
    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,

    /// CPU utilization (percent) below which a process counts as idle
    #[serde(default = "default_stall_cpu_percent")]
    pub stall_cpu_percent: f32,

    /// Timeout for checks that do not declare one
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL
    #[serde(default = "default_term_grace_ms")]
    pub term_grace_ms: u64,

    /// Static expected durations (seconds) by check id for the adaptive strategy
    #[serde(default)]
    pub priority_table: BTreeMap<String, f64>,
}

const fn default_worker_fraction() -> f64 {
    1.0
}

const fn default_poll_interval_ms() -> u64 {
    100
}

const fn default_stall_threshold_secs() -> u64 {
    30
}

const fn default_stall_cpu_percent() -> f32 {
    1.0
}

const fn default_timeout_secs() -> u64 {
    300
}

const fn default_term_grace_ms() -> u64 {
    2000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            worker_budget: None,
            worker_fraction: default_worker_fraction(),
            poll_interval_ms: default_poll_interval_ms(),
            stall_threshold_secs: default_stall_threshold_secs(),
            stall_cpu_percent: default_stall_cpu_percent(),
            default_timeout_secs: default_timeout_secs(),
            term_grace_ms: default_term_grace_ms(),
            priority_table: BTreeMap::new(),
        }
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to `SQLite` cache database file
    #[serde(default = "default_cache_path")]
    pub path: String,

    /// Entries kept per check when stale keys are collected
    #[serde(default = "default_max_entries_per_check")]
    pub max_entries_per_check: usize,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_cache_path() -> String {
    ".quench/cache.db".to_string()
}

const fn default_max_entries_per_check() -> usize {
    16
}

const fn default_max_connections() -> u32 {
    5
}

const fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
            max_entries_per_check: default_max_entries_per_check(),
            max_connections: default_max_connections(),
        }
    }
}

/// Agent routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RoutingConfig {
    /// Minimum confidence an agent must report to be routed an issue
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Reuse agents that already fixed the same issue signature this run
    #[serde(default = "default_true")]
    pub solution_cache_enabled: bool,
}

const fn default_min_confidence() -> f64 {
    0.5
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            solution_cache_enabled: true,
        }
    }
}

/// Autofix loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AutofixConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Consecutive iterations with unchanged `issues_remaining` before giving up
    #[serde(default = "default_stuck_window")]
    pub stuck_window: u32,

    /// Optional wall-clock budget for the whole loop
    #[serde(default)]
    pub wall_clock_budget_secs: Option<u64>,

    /// Per-invocation agent timeout
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,

    /// Worker ceiling for re-verification; falls back to the execution budget
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Stage whose checks seed and re-verify the loop
    #[serde(default = "default_stage")]
    pub stage: String,
}

const fn default_max_iterations() -> u32 {
    5
}

const fn default_stuck_window() -> u32 {
    2
}

const fn default_agent_timeout_secs() -> u64 {
    120
}

fn default_stage() -> String {
    "default".to_string()
}

impl Default for AutofixConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            stuck_window: default_stuck_window(),
            wall_clock_budget_secs: None,
            agent_timeout_secs: default_agent_timeout_secs(),
            max_workers: None,
            stage: default_stage(),
        }
    }
}

/// Fix validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ValidationConfig {
    /// Interpreter used to byte-compile staged Python files
    #[serde(default = "default_python_interpreter")]
    pub python_interpreter: String,

    #[serde(default = "default_validation_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_python_interpreter() -> String {
    "python3".to_string()
}

const fn default_validation_timeout_secs() -> u64 {
    30
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            python_interpreter: default_python_interpreter(),
            timeout_secs: default_validation_timeout_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub enable_console: bool,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_console: true,
            rotation: default_rotation(),
            retention_days: default_retention_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.checks.is_empty());
        assert_eq!(config.execution.strategy, StrategyKind::Parallel);
        assert_eq!(config.execution.poll_interval_ms, 100);
        assert!((config.routing.min_confidence - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.autofix.stuck_window, 2);
        assert_eq!(config.autofix.stage, "default");
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
checks:
  - id: flake8
    command: [flake8, '{files}']
    stages: [fast]
    cacheable: true
    scope: ['*.py']
execution:
  strategy: adaptive
  worker_budget: 4
  priority_table:
    flake8: 2.5
autofix:
  max_iterations: 3
";
        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.checks.len(), 1);
        assert!(config.checks[0].cacheable);
        assert_eq!(config.execution.strategy, StrategyKind::Adaptive);
        assert_eq!(config.execution.worker_budget, Some(4));
        assert_eq!(config.execution.priority_table.get("flake8"), Some(&2.5));
        assert_eq!(config.autofix.max_iterations, 3);
        assert_eq!(config.autofix.stuck_window, 2);
    }
}

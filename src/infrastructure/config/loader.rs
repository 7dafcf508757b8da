use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::{Config, OutputFormat};

/// Project-local configuration directory
pub const CONFIG_DIR: &str = ".quench";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid worker_budget: {0}. Must be at least 1")]
    InvalidWorkerBudget(usize),

    #[error("Invalid worker_fraction: {0}. Must be in (0, 1]")]
    InvalidWorkerFraction(f64),

    #[error("Invalid poll_interval_ms: {0}. Must be positive")]
    InvalidPollInterval(u64),

    #[error("Invalid min_confidence: {0}. Must be in [0, 1]")]
    InvalidMinConfidence(f64),

    #[error("Invalid stuck_window: {0}. Must be at least 2")]
    InvalidStuckWindow(u32),

    #[error("Invalid max_iterations: {0}. Must be at least 1")]
    InvalidMaxIterations(u32),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Cache path cannot be empty")]
    EmptyCachePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Duplicate check id: {0}")]
    DuplicateCheck(String),

    #[error("Check '{0}' has an empty command")]
    EmptyCommand(String),

    #[error("Check '{check}' has an invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        check: String,
        pattern: String,
        message: String,
    },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for the project rooted at `root`
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .quench/config.yaml (project config)
    /// 3. .quench/local.yaml (local overrides, optional)
    /// 4. Environment variables (QUENCH_* prefix, `__` for nesting)
    pub fn load(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(CONFIG_DIR);
        let config: Config = Self::figment(&dir.join("config.yaml"), &dir.join("local.yaml"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("QUENCH_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(project: &Path, local: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(project))
            .merge(Yaml::file(local))
            .merge(Env::prefixed("QUENCH_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let execution = &config.execution;
        if let Some(budget) = execution.worker_budget {
            if budget == 0 {
                return Err(ConfigError::InvalidWorkerBudget(budget));
            }
        }
        if !(execution.worker_fraction > 0.0 && execution.worker_fraction <= 1.0) {
            return Err(ConfigError::InvalidWorkerFraction(execution.worker_fraction));
        }
        if execution.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval(execution.poll_interval_ms));
        }

        if !(0.0..=1.0).contains(&config.routing.min_confidence) {
            return Err(ConfigError::InvalidMinConfidence(config.routing.min_confidence));
        }

        if config.autofix.stuck_window < 2 {
            return Err(ConfigError::InvalidStuckWindow(config.autofix.stuck_window));
        }
        if config.autofix.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(config.autofix.max_iterations));
        }
        if config.autofix.max_workers == Some(0) {
            return Err(ConfigError::InvalidWorkerBudget(0));
        }

        if config.cache.path.is_empty() {
            return Err(ConfigError::EmptyCachePath);
        }
        if config.cache.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.cache.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Self::validate_checks(config)
    }

    fn validate_checks(config: &Config) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for check in &config.checks {
            if check.id.trim().is_empty() {
                return Err(ConfigError::ValidationFailed("check id cannot be empty".to_string()));
            }
            if !seen.insert(check.id.as_str()) {
                return Err(ConfigError::DuplicateCheck(check.id.clone()));
            }
            if check.command.is_empty() || check.command[0].trim().is_empty() {
                return Err(ConfigError::EmptyCommand(check.id.clone()));
            }
            if check.stages.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "check '{}' belongs to no stage",
                    check.id
                )));
            }

            let invalid = |pattern: &str, message: String| ConfigError::InvalidPattern {
                check: check.id.clone(),
                pattern: pattern.to_string(),
                message,
            };
            for glob in &check.scope {
                glob::Pattern::new(glob).map_err(|e| invalid(glob, e.to_string()))?;
            }
            if let OutputFormat::Regex { pattern } = &check.output_format {
                regex::Regex::new(pattern).map_err(|e| invalid(pattern, e.to_string()))?;
            }
            if let Some(pattern) = &check.summary_pattern {
                let re = regex::Regex::new(pattern).map_err(|e| invalid(pattern, e.to_string()))?;
                if !re.capture_names().flatten().any(|n| n == "count") {
                    return Err(invalid(pattern, "missing a named group 'count'".to_string()));
                }
            }
        }
        Ok(())
    }
}

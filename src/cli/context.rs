//! Explicit composition of the core components for one CLI invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::adapters::agents::WhitespaceAgent;
use crate::adapters::sqlite::{all_embedded_migrations, create_pool, database_url, Migrator, PoolConfig, SqliteCacheStore};
use crate::domain::models::Config;
use crate::domain::ports::{CheckExecutor, FixAgent};
use crate::services::{
    build_strategy, default_worker_budget, AgentRegistry, AgentRouter, AutofixCoordinator, CheckRegistry,
    DurationHistory, EventBus, Orchestrator, ProcessRunner, ResultCache, RunnerConfig, Validator,
};

/// Fully wired services for one project root.
pub struct AppContext {
    pub root: PathBuf,
    pub config: Config,
    pub events: Arc<EventBus>,
    pub orchestrator: Arc<Orchestrator>,
    pub coordinator: AutofixCoordinator,
}

impl AppContext {
    pub async fn build(root: &Path, config: Config) -> Result<Self> {
        let events = Arc::new(EventBus::default());
        let registry = Arc::new(CheckRegistry::new(config.checks.clone()).context("invalid check registry")?);

        let runner: Arc<dyn CheckExecutor> = Arc::new(
            ProcessRunner::new(RunnerConfig::from_execution(&config.execution, root)).with_events(events.clone()),
        );
        let history = Arc::new(DurationHistory::new());
        let strategy = build_strategy(
            config.execution.strategy,
            runner,
            history.clone(),
            config.execution.priority_table.clone(),
        );
        let worker_budget = config
            .execution
            .worker_budget
            .unwrap_or_else(|| default_worker_budget(config.execution.worker_fraction));

        let mut orchestrator =
            Orchestrator::new(registry, strategy, history, worker_budget).with_events(events.clone());
        if config.cache.enabled {
            orchestrator = orchestrator.with_cache(Arc::new(open_cache(root, &config).await?));
        }
        let orchestrator = Arc::new(orchestrator);

        let agents: Vec<Arc<dyn FixAgent>> = vec![Arc::new(WhitespaceAgent::new())];
        let router = Arc::new(AgentRouter::new(
            Arc::new(AgentRegistry::new(agents).context("invalid agent registry")?),
            config.routing.clone(),
        ));
        let validator = Arc::new(Validator::with_default_checkers(root, &config.validation));
        let coordinator = AutofixCoordinator::new(orchestrator.clone(), router, validator, config.autofix.clone())
            .with_events(events.clone());

        tracing::debug!(root = %root.display(), worker_budget, "application wired");
        Ok(Self {
            root: root.to_path_buf(),
            config,
            events,
            orchestrator,
            coordinator,
        })
    }
}

async fn open_cache(root: &Path, config: &Config) -> Result<ResultCache> {
    let path = root.join(&config.cache.path);
    let url = database_url(&path.to_string_lossy());
    let pool = create_pool(
        &url,
        Some(PoolConfig {
            max_connections: config.cache.max_connections,
            ..PoolConfig::default()
        }),
    )
    .await
    .with_context(|| format!("failed to open cache at {}", path.display()))?;

    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .context("failed to migrate cache database")?;

    Ok(ResultCache::new(
        Arc::new(SqliteCacheStore::new(pool)),
        root,
        config.cache.max_entries_per_check,
    ))
}

/// Build output and dependency trees never handed to checks.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "__pycache__", "venv"];

/// Every regular file under `root`, relative, skipping hidden entries and
/// build output.
pub fn discover_files(root: &Path) -> Result<Vec<PathBuf>> {
    let pattern = root.join("**").join("*");
    let mut files = Vec::new();
    for entry in glob::glob(&pattern.to_string_lossy()).context("invalid discovery pattern")? {
        let Ok(path) = entry else { continue };
        let Ok(relative) = path.strip_prefix(root) else { continue };
        let skipped = relative.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
        });
        if !skipped && path.is_file() {
            files.push(relative.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

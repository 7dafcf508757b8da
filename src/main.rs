//! Quench CLI entry point.

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use quench::cli::context::AppContext;
use quench::cli::{dispatch, handle_error, Cli};
use quench::infrastructure::config::ConfigLoader;
use quench::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => handle_error(err, json_mode),
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("project root {} not found", cli.root.display()))?;
    let config = ConfigLoader::load(&root)?;

    let mut log_config = LogConfig::try_from(&config.logging).context("invalid logging configuration")?;
    if let Some(level) = cli.verbosity_level() {
        log_config = log_config.with_level(level);
    }
    let _logger = LoggerImpl::init(&log_config)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    let ctx = AppContext::build(&root, config).await?;
    dispatch(cli.command, &ctx, cli.json, &cancel).await
}

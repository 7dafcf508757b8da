//! `quench fix`: run a stage, then drive the autofix loop over its issues.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::cli::commands::resolve_files;
use crate::cli::context::AppContext;
use crate::cli::output::output;
use crate::cli::progress::ProgressReporter;

#[derive(Args, Debug)]
pub struct FixArgs {
    /// Stage whose issues are fixed (defaults to autofix.stage)
    pub stage: Option<String>,

    /// Override autofix.max_iterations
    #[arg(short = 'n', long)]
    pub max_iterations: Option<u32>,

    /// Files to check (defaults to every non-hidden file under the root)
    #[arg(short, long, num_args = 1..)]
    pub files: Vec<PathBuf>,
}

/// Returns whether the loop converged.
pub async fn execute(args: FixArgs, ctx: &AppContext, json_mode: bool, cancel: &CancellationToken) -> Result<bool> {
    let files = resolve_files(&ctx.root, args.files)?;
    let stage = args.stage.unwrap_or_else(|| ctx.config.autofix.stage.clone());
    let max_iterations = args
        .max_iterations
        .unwrap_or(ctx.config.autofix.max_iterations)
        .max(1);

    let progress = ProgressReporter::start(&ctx.events, !json_mode);
    let initial = ctx.orchestrator.run_stage(&stage, &files, cancel).await;
    tracing::info!(%stage, issues = initial.issues.len(), "initial stage run finished");

    let summary = ctx
        .coordinator
        .run(initial.issues, max_iterations, &files, cancel)
        .await;
    progress.finish();

    output(&summary, json_mode);
    Ok(summary.success)
}

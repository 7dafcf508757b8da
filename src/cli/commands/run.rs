//! `quench run`: execute one stage and report its results.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::cli::commands::resolve_files;
use crate::cli::context::AppContext;
use crate::cli::output::output;
use crate::cli::progress::ProgressReporter;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Stage to run
    #[arg(default_value = "default")]
    pub stage: String,

    /// Files to check (defaults to every non-hidden file under the root)
    #[arg(short, long, num_args = 1..)]
    pub files: Vec<PathBuf>,
}

/// Returns whether every check in the stage passed.
pub async fn execute(args: RunArgs, ctx: &AppContext, json_mode: bool, cancel: &CancellationToken) -> Result<bool> {
    let files = resolve_files(&ctx.root, args.files)?;
    let progress = ProgressReporter::start(&ctx.events, !json_mode);
    let result = ctx.orchestrator.run_stage(&args.stage, &files, cancel).await;
    progress.finish();

    output(&result, json_mode);
    Ok(result.passed)
}

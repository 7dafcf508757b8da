//! Command-line entry point: argument parsing, wiring and result printing.

pub mod commands;
pub mod context;
pub mod output;
pub mod progress;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::cli::commands::{fix::FixArgs, run::RunArgs};
use crate::cli::context::AppContext;

#[derive(Parser, Debug)]
#[command(name = "quench")]
#[command(about = "Run code-quality checks and converge their findings with fix agents", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Project root holding `.quench/`
    #[arg(short, long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every check of a stage
    Run(RunArgs),
    /// Run a stage, then iterate fixes until its issues converge
    Fix(FixArgs),
    /// List the configured checks
    Checks,
}

impl Cli {
    /// Log level implied by `-v`, if any.
    pub fn verbosity_level(&self) -> Option<&'static str> {
        match self.verbose {
            0 => None,
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        }
    }
}

/// Dispatch the parsed command. Returns whether it succeeded.
pub async fn dispatch(command: Commands, ctx: &AppContext, json_mode: bool, cancel: &CancellationToken) -> Result<bool> {
    match command {
        Commands::Run(args) => commands::run::execute(args, ctx, json_mode, cancel).await,
        Commands::Fix(args) => commands::fix::execute(args, ctx, json_mode, cancel).await,
        Commands::Checks => commands::checks::execute(ctx, json_mode),
    }
}

/// Print an error in the selected output mode and exit with status 2.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
        });
        println!("{body}");
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(2)
}

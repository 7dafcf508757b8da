//! `quench checks`: list the configured checks.

use anyhow::Result;

use crate::cli::context::AppContext;
use crate::cli::output::{output, CheckList};

pub fn execute(ctx: &AppContext, json_mode: bool) -> Result<bool> {
    let list = CheckList {
        checks: ctx.orchestrator.registry().all().to_vec(),
    };
    output(&list, json_mode);
    Ok(true)
}

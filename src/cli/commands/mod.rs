//! CLI command implementations.

pub mod checks;
pub mod fix;
pub mod run;

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::cli::context::discover_files;

/// Explicit file arguments, or every non-hidden file under `root`.
pub(crate) fn resolve_files(root: &Path, files: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    if files.is_empty() {
        return discover_files(root);
    }
    Ok(files
        .into_iter()
        .map(|f| f.strip_prefix(root).map(Path::to_path_buf).unwrap_or(f))
        .collect())
}

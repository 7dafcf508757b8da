use std::path::Path;

use async_trait::async_trait;

/// Well-formedness check for one kind of file.
#[async_trait]
pub trait FileKindChecker: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this checker owns files like `target`.
    fn applies_to(&self, target: &Path) -> bool;

    /// Check staged content.
    ///
    /// `staged` is a temporary file holding `content`, placed next to the
    /// target. Returns a human-readable reason on failure.
    async fn check(&self, staged: &Path, content: &str) -> Result<(), String>;
}

//! Accept/reject gate for agent-produced edits.
//!
//! A fix is all-or-nothing: every edited file is staged next to its target
//! and checked for well-formedness before any target is touched. Persisting
//! is a rename per file; if one rename fails the files already written are
//! restored from their original contents. Staged files carry the target's
//! permissions, and directories created for new files are removed again when
//! the fix is rejected.

use std::fs::Permissions;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;

use crate::domain::models::{Fix, ValidationConfig, ValidationVerdict};
use crate::domain::ports::FileKindChecker;

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

// ---------------------------------------------------------------------------
// File-kind checkers
// ---------------------------------------------------------------------------

pub struct JsonChecker;

#[async_trait]
impl FileKindChecker for JsonChecker {
    fn name(&self) -> &'static str {
        "json"
    }

    fn applies_to(&self, target: &Path) -> bool {
        has_extension(target, &["json"])
    }

    async fn check(&self, _staged: &Path, content: &str) -> Result<(), String> {
        serde_json::from_str::<serde_json::Value>(content)
            .map(|_| ())
            .map_err(|e| format!("invalid JSON: {e}"))
    }
}

pub struct YamlChecker;

#[async_trait]
impl FileKindChecker for YamlChecker {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn applies_to(&self, target: &Path) -> bool {
        has_extension(target, &["yaml", "yml"])
    }

    async fn check(&self, _staged: &Path, content: &str) -> Result<(), String> {
        serde_yaml::from_str::<serde_yaml::Value>(content)
            .map(|_| ())
            .map_err(|e| format!("invalid YAML: {e}"))
    }
}

pub struct TomlChecker;

#[async_trait]
impl FileKindChecker for TomlChecker {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn applies_to(&self, target: &Path) -> bool {
        has_extension(target, &["toml"])
    }

    async fn check(&self, _staged: &Path, content: &str) -> Result<(), String> {
        content
            .parse::<toml::Table>()
            .map(|_| ())
            .map_err(|e| format!("invalid TOML: {e}"))
    }
}

/// Compiles staged Python source with the configured interpreter.
///
/// Uses the same `compile()` call as `py_compile` without writing bytecode
/// next to the staged file.
pub struct PythonChecker {
    interpreter: String,
    timeout: Duration,
}

const PY_COMPILE_SNIPPET: &str =
    "import sys\nwith open(sys.argv[1], 'rb') as f:\n    compile(f.read(), sys.argv[1], 'exec')\n";

impl PythonChecker {
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
        }
    }
}

#[async_trait]
impl FileKindChecker for PythonChecker {
    fn name(&self) -> &'static str {
        "python"
    }

    fn applies_to(&self, target: &Path) -> bool {
        has_extension(target, &["py", "pyi"])
    }

    async fn check(&self, staged: &Path, _content: &str) -> Result<(), String> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.interpreter)
                .arg("-B")
                .arg("-c")
                .arg(PY_COMPILE_SNIPPET)
                .arg(staged)
                .env("PYTHONDONTWRITEBYTECODE", "1")
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| format!("{} timed out compiling", self.interpreter))?
        .map_err(|e| format!("could not run {}: {e}", self.interpreter))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("compile failed");
            Err(format!("invalid Python: {}", last.trim()))
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

struct Staged {
    relative: PathBuf,
    target: PathBuf,
    file: NamedTempFile,
    original: Option<Vec<u8>>,
}

/// Directories created while staging, shallowest first.
#[derive(Default)]
struct CreatedDirs(Vec<PathBuf>);

impl CreatedDirs {
    async fn ensure(&mut self, dir: &Path) -> std::io::Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(dir);
        while let Some(d) = current {
            if d.as_os_str().is_empty() || tokio::fs::try_exists(d).await? {
                break;
            }
            missing.push(d.to_path_buf());
            current = d.parent();
        }
        if missing.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(dir).await?;
        self.0.extend(missing.into_iter().rev());
        Ok(())
    }

    async fn remove(&self) {
        for dir in self.0.iter().rev() {
            if let Err(e) = tokio::fs::remove_dir(dir).await {
                tracing::debug!(path = %dir.display(), error = %e, "could not remove staging directory");
            }
        }
    }
}

pub struct Validator {
    root: PathBuf,
    checkers: Vec<Arc<dyn FileKindChecker>>,
}

impl Validator {
    pub fn new(root: impl Into<PathBuf>, checkers: Vec<Arc<dyn FileKindChecker>>) -> Self {
        Self {
            root: root.into(),
            checkers,
        }
    }

    /// Validator with the JSON, YAML, TOML and Python checkers.
    pub fn with_default_checkers(root: impl Into<PathBuf>, config: &ValidationConfig) -> Self {
        Self::new(
            root,
            vec![
                Arc::new(JsonChecker),
                Arc::new(YamlChecker),
                Arc::new(TomlChecker),
                Arc::new(PythonChecker::new(
                    config.python_interpreter.clone(),
                    Duration::from_secs(config.timeout_secs),
                )),
            ],
        )
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check every edit of `fix` and write all of them, or none.
    pub async fn validate(&self, fix: &Fix) -> ValidationVerdict {
        let mut created = CreatedDirs::default();
        let verdict = match self.stage_and_check(fix, &mut created).await {
            Ok(staged) => tokio::task::spawn_blocking(move || persist(staged))
                .await
                .unwrap_or_else(|e| ValidationVerdict::rejected(format!("write task failed: {e}"))),
            Err(reason) => ValidationVerdict::rejected(reason),
        };
        if !verdict.is_accepted() {
            created.remove().await;
        }
        match &verdict {
            ValidationVerdict::Accepted { files_written } => {
                tracing::info!(agent_id = %fix.agent_id, files = files_written.len(), "fix accepted");
            }
            ValidationVerdict::Rejected { reason } => {
                tracing::warn!(agent_id = %fix.agent_id, reason = %reason, "fix rejected");
            }
        }
        verdict
    }

    async fn stage_and_check(&self, fix: &Fix, created: &mut CreatedDirs) -> Result<Vec<Staged>, String> {
        if fix.edits.is_empty() {
            return Err("fix contains no edits".to_string());
        }

        let mut staged: Vec<Staged> = Vec::with_capacity(fix.edits.len());
        for edit in &fix.edits {
            let relative = confine(&edit.path)?;
            if staged.iter().any(|s| s.relative == relative) {
                return Err(format!("{} is edited more than once", relative.display()));
            }
            if edit.new_content.is_empty() {
                return Err(format!("empty edit for {}", relative.display()));
            }

            let target = self.root.join(&relative);
            let original = match tokio::fs::read(&target).await {
                Ok(bytes) => Some(bytes),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(format!("cannot read {}: {e}", relative.display())),
            };
            let permissions = if original.is_some() {
                let meta = tokio::fs::metadata(&target)
                    .await
                    .map_err(|e| format!("cannot read {}: {e}", relative.display()))?;
                Some(meta.permissions())
            } else {
                None
            };
            if let Some(dir) = target.parent() {
                created
                    .ensure(dir)
                    .await
                    .map_err(|e| format!("cannot create directory for {}: {e}", relative.display()))?;
            }
            let file = stage(target.clone(), edit.new_content.clone(), permissions)
                .await
                .map_err(|e| format!("cannot stage {}: {e}", relative.display()))?;

            if let Some(checker) = self.checkers.iter().find(|c| c.applies_to(&target)) {
                tracing::debug!(path = %relative.display(), checker = checker.name(), "checking staged file");
                checker
                    .check(file.path(), &edit.new_content)
                    .await
                    .map_err(|reason| format!("{}: {reason}", relative.display()))?;
            }

            staged.push(Staged {
                relative,
                target,
                file,
                original,
            });
        }
        Ok(staged)
    }
}

fn persist(staged: Vec<Staged>) -> ValidationVerdict {
    let mut written: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::with_capacity(staged.len());
    let mut files_written = Vec::with_capacity(staged.len());

    for item in staged {
        if let Err(e) = item.file.persist(&item.target) {
            let reason = format!("failed to write {}: {}", item.relative.display(), e.error);
            rollback(&written);
            return ValidationVerdict::rejected(reason);
        }
        written.push((item.target, item.original));
        files_written.push(item.relative);
    }
    ValidationVerdict::Accepted { files_written }
}

/// Normalize an edit path, refusing anything that leaves the project root.
fn confine(path: &Path) -> Result<PathBuf, String> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(format!("{} escapes the project root", path.display()));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err("edit has an empty path".to_string());
    }
    Ok(relative)
}

async fn stage(
    target: PathBuf,
    content: String,
    permissions: Option<Permissions>,
) -> std::io::Result<NamedTempFile> {
    tokio::task::spawn_blocking(move || stage_blocking(&target, &content, permissions))
        .await
        .map_err(std::io::Error::other)?
}

fn stage_blocking(target: &Path, content: &str, permissions: Option<Permissions>) -> std::io::Result<NamedTempFile> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let suffix = target
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut file = tempfile::Builder::new()
        .prefix(".quench-staged-")
        .suffix(&suffix)
        .tempfile_in(dir)?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    if let Some(permissions) = permissions {
        file.as_file().set_permissions(permissions)?;
    }
    Ok(file)
}

fn rollback(written: &[(PathBuf, Option<Vec<u8>>)]) {
    for (target, original) in written.iter().rev() {
        let restored = match original {
            Some(bytes) => std::fs::write(target, bytes),
            None => std::fs::remove_file(target),
        };
        if let Err(e) = restored {
            tracing::error!(path = %target.display(), error = %e, "failed to roll back partial fix");
        }
    }
}

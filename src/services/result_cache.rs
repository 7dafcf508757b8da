//! Content-addressed memoization of check results.
//!
//! A key covers the tool identity (check id and command template), the tool
//! version, and every in-scope input file's path and content hash. Any edit,
//! rename or version bump therefore produces a new key; old keys are left to
//! be pruned lazily on the next store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::domain::models::{CheckDefinition, CheckResult, CheckStatus};
use crate::domain::ports::CacheStore;

/// Version used when a check declares neither a version nor a probe.
pub const UNVERSIONED: &str = "unversioned";

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// ToolVersionResolver
// ---------------------------------------------------------------------------

/// Resolves and memoizes tool versions for cache keys.
pub struct ToolVersionResolver {
    root: PathBuf,
    probed: Mutex<HashMap<String, String>>,
}

impl ToolVersionResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            probed: Mutex::new(HashMap::new()),
        }
    }

    /// Declared version, else the probe's output, else [`UNVERSIONED`].
    pub async fn resolve(&self, check: &CheckDefinition) -> String {
        if let Some(version) = &check.tool_version {
            return version.clone();
        }
        let Some(probe) = check.version_command.as_ref().filter(|c| !c.is_empty()) else {
            return UNVERSIONED.to_string();
        };

        let mut probed = self.probed.lock().await;
        if let Some(version) = probed.get(&check.id) {
            return version.clone();
        }
        let version = self.probe(&check.id, probe).await;
        probed.insert(check.id.clone(), version.clone());
        version
    }

    async fn probe(&self, check_id: &str, argv: &[String]) -> String {
        let Some((program, args)) = argv.split_first() else {
            return UNVERSIONED.to_string();
        };
        let output = tokio::time::timeout(
            VERSION_PROBE_TIMEOUT,
            Command::new(program)
                .args(args)
                .current_dir(&self.root)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match output {
            Ok(Ok(out)) if out.status.success() => {
                let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
                let version = if stdout.is_empty() {
                    String::from_utf8_lossy(&out.stderr).trim().to_string()
                } else {
                    stdout
                };
                tracing::debug!(check_id, version = %version, "resolved tool version");
                version
            }
            Ok(Ok(out)) => {
                tracing::warn!(check_id, exit_code = ?out.status.code(), "version probe failed");
                UNVERSIONED.to_string()
            }
            Ok(Err(e)) => {
                tracing::warn!(check_id, error = %e, "version probe could not start");
                UNVERSIONED.to_string()
            }
            Err(_) => {
                tracing::warn!(check_id, "version probe timed out");
                UNVERSIONED.to_string()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ResultCache
// ---------------------------------------------------------------------------

/// Result cache over a [`CacheStore`].
///
/// Storage failures never fail a stage: a failed lookup is a miss and a
/// failed store is logged and dropped.
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    versions: ToolVersionResolver,
    root: PathBuf,
    max_entries_per_check: usize,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, root: impl Into<PathBuf>, max_entries_per_check: usize) -> Self {
        let root = root.into();
        Self {
            store,
            versions: ToolVersionResolver::new(root.clone()),
            root,
            max_entries_per_check: max_entries_per_check.max(1),
        }
    }

    /// Compute the cache key for running `check` over `files`.
    pub async fn content_hash(&self, check: &CheckDefinition, files: &[PathBuf]) -> String {
        let version = self.versions.resolve(check).await;

        let mut inputs = check.scoped_files(files);
        inputs.sort();
        inputs.dedup();

        let mut hasher = Sha256::new();
        hasher.update(check.id.as_bytes());
        hasher.update([0]);
        for arg in &check.command {
            hasher.update(arg.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update([0]);
        hasher.update(version.as_bytes());
        hasher.update([0]);
        for path in &inputs {
            hasher.update(path.to_string_lossy().as_bytes());
            hasher.update([0]);
            hasher.update(self.file_digest(path).await.as_bytes());
            hasher.update([0]);
        }
        format!("{:x}", hasher.finalize())
    }

    async fn file_digest(&self, path: &Path) -> String {
        match tokio::fs::read(self.root.join(path)).await {
            Ok(bytes) => format!("{:x}", Sha256::digest(&bytes)),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "input unreadable, hashing as absent");
                "absent".to_string()
            }
        }
    }

    /// Look up a prior result. Hits come back with `cached` set.
    pub async fn lookup(&self, check_id: &str, content_hash: &str) -> Option<CheckResult> {
        match self.store.get(content_hash).await {
            Ok(Some(mut result)) if result.check_id == check_id => {
                tracing::debug!(check_id, key = %content_hash, "cache hit");
                result.cached = true;
                Some(result)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(check_id, error = %e, "cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Memoize a freshly computed result.
    ///
    /// Timed-out and errored results are not deterministic and are skipped.
    pub async fn store(&self, check_id: &str, content_hash: &str, result: &CheckResult) {
        if matches!(result.status, CheckStatus::Timeout | CheckStatus::Error) {
            return;
        }
        let mut stored = result.clone();
        stored.cached = false;

        if let Err(e) = self.store.put(content_hash, check_id, &stored).await {
            tracing::warn!(check_id, error = %e, "failed to store cache entry");
            return;
        }
        match self.store.prune(check_id, self.max_entries_per_check).await {
            Ok(0) => {}
            Ok(removed) => tracing::debug!(check_id, removed, "pruned stale cache entries"),
            Err(e) => tracing::warn!(check_id, error = %e, "failed to prune cache entries"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryCacheStore;

    fn result(check_id: &str, status_code: Option<i32>) -> CheckResult {
        CheckResult::from_exit(check_id, status_code, "out".into(), String::new(), Duration::from_millis(7))
    }

    fn setup() -> (tempfile::TempDir, ResultCache, Arc<InMemoryCacheStore>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        std::fs::write(dir.path().join("b.py"), "y = 2\n").unwrap();
        let store = Arc::new(InMemoryCacheStore::new());
        let cache = ResultCache::new(store.clone(), dir.path(), 2);
        (dir, cache, store)
    }

    fn check() -> CheckDefinition {
        CheckDefinition::new("lint", vec!["lint".into(), "{files}".into()])
            .with_cacheable(true)
            .with_tool_version("1.0")
            .with_scope(&["*.py"])
    }

    #[tokio::test]
    async fn key_is_stable_and_order_insensitive() {
        let (_dir, cache, _) = setup();
        let a = vec![PathBuf::from("a.py"), PathBuf::from("b.py")];
        let b = vec![PathBuf::from("b.py"), PathBuf::from("a.py"), PathBuf::from("README")];

        assert_eq!(cache.content_hash(&check(), &a).await, cache.content_hash(&check(), &b).await);
    }

    #[tokio::test]
    async fn key_changes_with_content_version_and_path() {
        let (dir, cache, _) = setup();
        let files = vec![PathBuf::from("a.py")];
        let before = cache.content_hash(&check(), &files).await;

        let bumped = check().with_tool_version("1.1");
        assert_ne!(before, cache.content_hash(&bumped, &files).await);

        std::fs::write(dir.path().join("a.py"), "x = 2\n").unwrap();
        assert_ne!(before, cache.content_hash(&check(), &files).await);

        std::fs::write(dir.path().join("c.py"), "x = 2\n").unwrap();
        let renamed = vec![PathBuf::from("c.py")];
        assert_ne!(
            cache.content_hash(&check(), &files).await,
            cache.content_hash(&check(), &renamed).await
        );
    }

    #[tokio::test]
    async fn hit_is_value_equal_and_marked_cached() {
        let (_dir, cache, _) = setup();
        let first = result("lint", Some(1));
        cache.store("lint", "k1", &first).await;

        let hit = cache.lookup("lint", "k1").await.unwrap();
        assert!(hit.cached);
        assert_eq!(CheckResult { cached: false, ..hit }, first);
        assert!(cache.lookup("lint", "k2").await.is_none());
        assert!(cache.lookup("other", "k1").await.is_none());
    }

    #[tokio::test]
    async fn timeouts_and_errors_are_not_stored() {
        let (_dir, cache, store) = setup();
        let timed_out = CheckResult::timed_out("lint", String::new(), String::new(), Duration::ZERO, 1);
        let errored = CheckResult::errored("lint", "boom", Duration::ZERO);

        cache.store("lint", "t", &timed_out).await;
        cache.store("lint", "e", &errored).await;

        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn store_prunes_oldest_entries() {
        let (_dir, cache, store) = setup();
        for key in ["k1", "k2", "k3"] {
            cache.store("lint", key, &result("lint", Some(0))).await;
        }

        assert_eq!(store.len().await, 2);
        assert!(cache.lookup("lint", "k1").await.is_none());
        assert!(cache.lookup("lint", "k3").await.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn version_probe_is_used_and_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = ToolVersionResolver::new(dir.path());
        let mut probed = CheckDefinition::new("probe", vec!["true".into()]);
        probed.version_command = Some(vec!["sh".into(), "-c".into(), "echo tool 4.2".into()]);

        assert_eq!(resolver.resolve(&probed).await, "tool 4.2");

        probed.version_command = Some(vec!["sh".into(), "-c".into(), "echo changed".into()]);
        assert_eq!(resolver.resolve(&probed).await, "tool 4.2");

        let plain = CheckDefinition::new("plain", vec!["true".into()]);
        assert_eq!(resolver.resolve(&plain).await, UNVERSIONED);
    }
}

use async_trait::async_trait;

use crate::domain::errors::CacheError;
use crate::domain::models::CheckResult;

/// Persistence boundary for memoized check results.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the result stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<CheckResult>, CacheError>;

    /// Store `result` under `key`, replacing any existing entry.
    async fn put(&self, key: &str, check_id: &str, result: &CheckResult) -> Result<(), CacheError>;

    /// Delete all but the `keep` newest entries for `check_id`.
    ///
    /// # Returns
    /// * Number of deleted entries
    async fn prune(&self, check_id: &str, keep: usize) -> Result<u64, CacheError>;
}

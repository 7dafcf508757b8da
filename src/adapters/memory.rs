//! In-process result cache store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::CacheError;
use crate::domain::models::CheckResult;
use crate::domain::ports::CacheStore;

struct Entry {
    check_id: String,
    result: CheckResult,
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

/// Cache store that lives only as long as the process.
///
/// Used by tests and by embedders that do not want a SQLite file.
#[derive(Default)]
pub struct InMemoryCacheStore {
    inner: RwLock<Inner>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CheckResult>, CacheError> {
        Ok(self.inner.read().await.entries.get(key).map(|e| e.result.clone()))
    }

    async fn put(&self, key: &str, check_id: &str, result: &CheckResult) -> Result<(), CacheError> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key.to_string(),
            Entry {
                check_id: check_id.to_string(),
                result: result.clone(),
                seq,
            },
        );
        Ok(())
    }

    async fn prune(&self, check_id: &str, keep: usize) -> Result<u64, CacheError> {
        let mut inner = self.inner.write().await;
        let mut seqs: Vec<u64> = inner
            .entries
            .values()
            .filter(|e| e.check_id == check_id)
            .map(|e| e.seq)
            .collect();
        if seqs.len() <= keep {
            return Ok(0);
        }
        seqs.sort_unstable_by(|a, b| b.cmp(a));
        let oldest_kept = keep.checked_sub(1).map(|i| seqs[i]);
        let before = inner.entries.len();
        inner.entries.retain(|_, e| {
            e.check_id != check_id || oldest_kept.is_some_and(|oldest| e.seq >= oldest)
        });
        Ok(u64::try_from(before - inner.entries.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(id: &str) -> CheckResult {
        CheckResult::from_exit(id, Some(0), String::new(), String::new(), Duration::ZERO)
    }

    #[tokio::test]
    async fn prune_only_touches_one_check() {
        let store = InMemoryCacheStore::new();
        store.put("a1", "a", &result("a")).await.unwrap();
        store.put("a2", "a", &result("a")).await.unwrap();
        store.put("b1", "b", &result("b")).await.unwrap();

        assert_eq!(store.prune("a", 1).await.unwrap(), 1);
        assert!(store.get("a1").await.unwrap().is_none());
        assert!(store.get("a2").await.unwrap().is_some());

        assert_eq!(store.prune("b", 0).await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }
}

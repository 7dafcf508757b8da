use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::CacheError;
use crate::domain::models::CheckResult;
use crate::domain::ports::CacheStore;

/// Durable result cache backed by the `check_cache` table.
#[derive(Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<i64, CacheError> {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM check_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CheckResult>, CacheError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT result_json FROM check_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(json,)| {
            serde_json::from_str(&json).map_err(|e| CacheError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
    }

    async fn put(&self, key: &str, check_id: &str, result: &CheckResult) -> Result<(), CacheError> {
        let json = serde_json::to_string(result).map_err(|e| CacheError::Storage(e.to_string()))?;
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        // Concurrent writers of the same key: last write wins.
        sqlx::query(
            "INSERT OR REPLACE INTO check_cache (key, check_id, result_json, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(key)
        .bind(check_id)
        .bind(json)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn prune(&self, check_id: &str, keep: usize) -> Result<u64, CacheError> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let result = sqlx::query(
            "DELETE FROM check_cache
             WHERE check_id = ?1
               AND key NOT IN (
                   SELECT key FROM check_cache
                   WHERE check_id = ?1
                   ORDER BY created_at DESC, rowid DESC
                   LIMIT ?2
               )",
        )
        .bind(check_id)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

use sqlx::Row;
use steward_core::quota::{QuotaError, QuotaStore};

use crate::DbPool;

/// Quota counters backed by the `org_token_usage` table. Increments run
/// as a single upsert statement, so concurrent sessions of the same org
/// never lose an update.
#[derive(Clone)]
pub struct SqlQuotaStore {
    pool: DbPool,
}

impl SqlQuotaStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn store_error(error: sqlx::Error) -> QuotaError {
    QuotaError::Store(error.to_string())
}

#[async_trait::async_trait]
impl QuotaStore for SqlQuotaStore {
    async fn fetch(&self, org_id: &str) -> Result<(u64, Option<u64>), QuotaError> {
        let row = sqlx::query("SELECT used, token_limit FROM org_token_usage WHERE org_id = ?")
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        match row {
            Some(row) => {
                let used: i64 = row.get("used");
                let limit: Option<i64> = row.get("token_limit");
                Ok((used.max(0) as u64, limit.map(|l| l.max(0) as u64)))
            }
            None => Ok((0, None)),
        }
    }

    async fn increment(&self, org_id: &str, amount: u64) -> Result<u64, QuotaError> {
        let row = sqlx::query(
            "INSERT INTO org_token_usage (org_id, used) VALUES (?, ?) \
             ON CONFLICT (org_id) DO UPDATE SET \
                 used = used + excluded.used, \
                 updated_at = datetime('now') \
             RETURNING used",
        )
        .bind(org_id)
        .bind(amount as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error)?;

        let used: i64 = row.get("used");
        Ok(used.max(0) as u64)
    }

    async fn set_limit(&self, org_id: &str, limit: u64) -> Result<(), QuotaError> {
        sqlx::query(
            "INSERT INTO org_token_usage (org_id, used, token_limit) VALUES (?, 0, ?) \
             ON CONFLICT (org_id) DO UPDATE SET \
                 token_limit = excluded.token_limit, \
                 updated_at = datetime('now')",
        )
        .bind(org_id)
        .bind(limit as i64)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn reset_usage(&self, org_id: &str) -> Result<(), QuotaError> {
        sqlx::query(
            "UPDATE org_token_usage SET used = 0, updated_at = datetime('now') WHERE org_id = ?",
        )
        .bind(org_id)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use steward_core::quota::QuotaStore;

    use super::SqlQuotaStore;
    use crate::{connect_with_settings, migrations::run_pending, DbPool};

    async fn test_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    async fn fetch_returns_zero_for_unknown_org() {
        let store = SqlQuotaStore::new(test_pool().await);
        let (used, limit) = store.fetch("org-unseen").await.expect("fetch");
        assert_eq!(used, 0);
        assert_eq!(limit, None);
    }

    #[tokio::test]
    async fn increment_upserts_and_accumulates() {
        let store = SqlQuotaStore::new(test_pool().await);

        assert_eq!(store.increment("org-1", 120).await.expect("first"), 120);
        assert_eq!(store.increment("org-1", 80).await.expect("second"), 200);

        let (used, limit) = store.fetch("org-1").await.expect("fetch");
        assert_eq!(used, 200);
        assert_eq!(limit, None);
    }

    #[tokio::test]
    async fn set_limit_preserves_usage() {
        let store = SqlQuotaStore::new(test_pool().await);
        store.increment("org-1", 500).await.expect("seed usage");
        store.set_limit("org-1", 10_000).await.expect("set limit");

        let (used, limit) = store.fetch("org-1").await.expect("fetch");
        assert_eq!(used, 500);
        assert_eq!(limit, Some(10_000));
    }

    #[tokio::test]
    async fn reset_usage_zeroes_counter_but_keeps_limit() {
        let store = SqlQuotaStore::new(test_pool().await);
        store.set_limit("org-1", 10_000).await.expect("set limit");
        store.increment("org-1", 500).await.expect("seed usage");

        store.reset_usage("org-1").await.expect("reset");

        let (used, limit) = store.fetch("org-1").await.expect("fetch");
        assert_eq!(used, 0);
        assert_eq!(limit, Some(10_000));
    }

    #[tokio::test]
    async fn concurrent_increments_lose_no_updates() {
        let store = Arc::new(SqlQuotaStore::new(test_pool().await));

        let mut handles = Vec::new();
        for _ in 0..20u64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.increment("org-1", 10).await.expect("increment")
            }));
        }
        for handle in handles {
            handle.await.expect("task join");
        }

        let (used, _) = store.fetch("org-1").await.expect("fetch");
        assert_eq!(used, 200);
    }
}

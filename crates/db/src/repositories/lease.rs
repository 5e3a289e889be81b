use chrono::{DateTime, Utc};

use super::{format_timestamp, LeaseRepository, RepositoryError};
use crate::DbPool;

/// Short-lived mutual exclusion rows keyed by an arbitrary string, used to keep
/// a single model call in flight per conversation.
pub struct SqlLeaseRepository {
    pool: DbPool,
}

impl SqlLeaseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl LeaseRepository for SqlLeaseRepository {
    async fn try_acquire(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO message_lease (lease_key, holder, expires_at)
             VALUES (?, ?, ?)
             ON CONFLICT(lease_key) DO UPDATE SET
                 holder = excluded.holder,
                 expires_at = excluded.expires_at
             WHERE message_lease.expires_at <= ?",
        )
        .bind(key)
        .bind(holder)
        .bind(format_timestamp(now + ttl))
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, key: &str, holder: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM message_lease WHERE lease_key = ? AND holder = ?")
            .bind(key)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::SqlLeaseRepository;
    use crate::repositories::test_support::{parse_ts, setup_pool};
    use crate::repositories::LeaseRepository;

    #[tokio::test]
    async fn lease_is_exclusive_until_expiry_or_release() {
        let repo = SqlLeaseRepository::new(setup_pool().await);
        let now = parse_ts("2026-03-01T12:00:00Z");
        let ttl = Duration::seconds(120);

        assert!(repo.try_acquire("llm:biz-1:5511", "msg-1", now, ttl).await.expect("acquire"));
        assert!(!repo
            .try_acquire("llm:biz-1:5511", "msg-2", now + Duration::seconds(10), ttl)
            .await
            .expect("acquire"));
        assert!(repo
            .try_acquire("llm:biz-1:5511", "msg-2", now + Duration::seconds(121), ttl)
            .await
            .expect("acquire after expiry"));

        repo.release("llm:biz-1:5511", "msg-1").await.expect("stale release");
        assert!(!repo
            .try_acquire("llm:biz-1:5511", "msg-3", now + Duration::seconds(122), ttl)
            .await
            .expect("still held"));

        repo.release("llm:biz-1:5511", "msg-2").await.expect("release");
        assert!(repo
            .try_acquire("llm:biz-1:5511", "msg-3", now + Duration::seconds(123), ttl)
            .await
            .expect("acquire after release"));
    }
}

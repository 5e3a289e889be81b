use chrono::{DateTime, Utc};

use vendabot_core::domain::account::BusinessId;

use super::{format_timestamp, get, RepositoryError, TemplateRepository};
use crate::DbPool;

/// Per-business overrides for canned reply templates.
pub struct SqlTemplateRepository {
    pool: DbPool,
}

impl SqlTemplateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TemplateRepository for SqlTemplateRepository {
    async fn find(
        &self,
        business_id: &BusinessId,
        template_key: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query(
            "SELECT body FROM reply_template WHERE business_id = ? AND template_key = ?",
        )
        .bind(&business_id.0)
        .bind(template_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(|row| get(row, "body")).transpose()
    }

    async fn save(
        &self,
        business_id: &BusinessId,
        template_key: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO reply_template (business_id, template_key, body, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(business_id, template_key) DO UPDATE SET
                 body = excluded.body,
                 updated_at = excluded.updated_at",
        )
        .bind(&business_id.0)
        .bind(template_key)
        .bind(body)
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use vendabot_core::domain::account::BusinessId;

    use super::SqlTemplateRepository;
    use crate::repositories::test_support::{insert_account, parse_ts, setup_pool};
    use crate::repositories::TemplateRepository;

    #[tokio::test]
    async fn override_is_scoped_to_business_and_replaceable() {
        let pool = setup_pool().await;
        insert_account(&pool, "biz-1", "1111").await;
        let repo = SqlTemplateRepository::new(pool);
        let business = BusinessId("biz-1".to_string());
        let now = parse_ts("2026-03-01T12:00:00Z");

        assert!(repo.find(&business, "greeting").await.expect("find").is_none());

        repo.save(&business, "greeting", "Oi! Aqui é a {{ business_name }}.", now).await.expect("save");
        repo.save(&business, "greeting", "Olá, {{ business_name }}!", now).await.expect("replace");

        assert_eq!(
            repo.find(&business, "greeting").await.expect("find").as_deref(),
            Some("Olá, {{ business_name }}!")
        );
        assert!(repo
            .find(&BusinessId("biz-2".to_string()), "greeting")
            .await
            .expect("find")
            .is_none());
    }
}

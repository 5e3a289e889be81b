use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use vendabot_core::domain::account::BusinessId;
use vendabot_core::domain::message::MessageId;
use vendabot_core::domain::webhook_event::{
    EventKind, ProcessingStatus, WebhookEvent, WebhookEventId,
};

use super::{
    format_optional_timestamp, format_timestamp, get, parse_json, parse_optional_timestamp,
    parse_timestamp, parse_u32, to_json, RepositoryError, WebhookEventRepository,
};
use crate::DbPool;

const SELECT_EVENT: &str = "SELECT id, external_event_id, kind, business_id, phone_number_id,
        provider_message_id, payload_json, status, retry_count, available_at, claimed_by,
        claimed_at, last_error, message_id, received_at, updated_at
 FROM webhook_event";

pub struct SqlWebhookEventRepository {
    pool: DbPool,
}

impl SqlWebhookEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: &SqliteRow) -> Result<WebhookEvent, RepositoryError> {
    let kind: String = get(row, "kind")?;
    let status: String = get(row, "status")?;
    let payload: String = get(row, "payload_json")?;
    Ok(WebhookEvent {
        id: WebhookEventId(get(row, "id")?),
        external_event_id: get(row, "external_event_id")?,
        kind: EventKind::parse(&kind)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown event kind `{kind}`")))?,
        business_id: get::<Option<String>>(row, "business_id")?.map(BusinessId),
        phone_number_id: get(row, "phone_number_id")?,
        provider_message_id: get(row, "provider_message_id")?,
        payload: parse_json("payload_json", &payload)?,
        status: ProcessingStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown processing status `{status}`"))
        })?,
        retry_count: parse_u32("retry_count", get(row, "retry_count")?)?,
        available_at: parse_timestamp("available_at", get(row, "available_at")?)?,
        claimed_by: get(row, "claimed_by")?,
        claimed_at: parse_optional_timestamp("claimed_at", get(row, "claimed_at")?)?,
        last_error: get(row, "last_error")?,
        message_id: get::<Option<String>>(row, "message_id")?.map(MessageId),
        received_at: parse_timestamp("received_at", get(row, "received_at")?)?,
        updated_at: parse_timestamp("updated_at", get(row, "updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl WebhookEventRepository for SqlWebhookEventRepository {
    async fn insert_if_absent(&self, event: WebhookEvent) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO webhook_event (id, external_event_id, kind, business_id,
                                                  phone_number_id, provider_message_id,
                                                  payload_json, status, retry_count,
                                                  available_at, claimed_by, claimed_at,
                                                  last_error, message_id, received_at,
                                                  updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id.0)
        .bind(&event.external_event_id)
        .bind(event.kind.as_str())
        .bind(event.business_id.as_ref().map(|id| id.0.as_str()))
        .bind(&event.phone_number_id)
        .bind(&event.provider_message_id)
        .bind(to_json("payload_json", &event.payload)?)
        .bind(event.status.as_str())
        .bind(i64::from(event.retry_count))
        .bind(format_timestamp(event.available_at))
        .bind(&event.claimed_by)
        .bind(format_optional_timestamp(event.claimed_at))
        .bind(&event.last_error)
        .bind(event.message_id.as_ref().map(|id| id.0.as_str()))
        .bind(format_timestamp(event.received_at))
        .bind(format_timestamp(event.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_by_id(
        &self,
        id: &WebhookEventId,
    ) -> Result<Option<WebhookEvent>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_EVENT} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn find_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<WebhookEvent>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_EVENT} WHERE external_event_id = ?"))
            .bind(external_event_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn compare_and_swap(
        &self,
        previous: &WebhookEvent,
        next: &WebhookEvent,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE webhook_event
             SET status = ?, retry_count = ?, available_at = ?, claimed_by = ?, claimed_at = ?,
                 last_error = ?, message_id = ?, business_id = ?, updated_at = ?
             WHERE id = ? AND status = ? AND updated_at = ?",
        )
        .bind(next.status.as_str())
        .bind(i64::from(next.retry_count))
        .bind(format_timestamp(next.available_at))
        .bind(&next.claimed_by)
        .bind(format_optional_timestamp(next.claimed_at))
        .bind(&next.last_error)
        .bind(next.message_id.as_ref().map(|id| id.0.as_str()))
        .bind(next.business_id.as_ref().map(|id| id.0.as_str()))
        .bind(format_timestamp(next.updated_at))
        .bind(&previous.id.0)
        .bind(previous.status.as_str())
        .bind(format_timestamp(previous.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WebhookEvent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_EVENT} WHERE status = 'pending' AND available_at <= ?
             ORDER BY available_at, received_at LIMIT ?"
        ))
        .bind(format_timestamp(now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn list_by_status(
        &self,
        status: ProcessingStatus,
        limit: u32,
    ) -> Result<Vec<WebhookEvent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_EVENT} WHERE status = ? ORDER BY updated_at LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use vendabot_core::dispatch::EventProcessingEngine;
    use vendabot_core::domain::webhook_event::{EventKind, ProcessingStatus, WebhookEvent};

    use super::SqlWebhookEventRepository;
    use crate::repositories::test_support::{parse_ts, setup_pool};
    use crate::repositories::WebhookEventRepository;

    fn event(external_id: &str, received_at: &str) -> WebhookEvent {
        WebhookEvent::new(
            external_id,
            EventKind::Message,
            None,
            "1111",
            Some("wamid.A".to_string()),
            json!({"text": {"body": "oi"}}),
            parse_ts(received_at),
        )
    }

    #[tokio::test]
    async fn duplicate_external_ids_are_not_inserted_twice() {
        let pool = setup_pool().await;
        let repo = SqlWebhookEventRepository::new(pool);

        assert!(repo.insert_if_absent(event("evt_a", "2026-03-01T12:00:00Z")).await.expect("insert"));
        assert!(!repo.insert_if_absent(event("evt_a", "2026-03-01T12:00:01Z")).await.expect("insert"));

        let stored = repo.find_by_external_id("evt_a").await.expect("find").expect("present");
        assert_eq!(stored.payload, json!({"text": {"body": "oi"}}));
        assert_eq!(stored.status, ProcessingStatus::Pending);
    }

    #[tokio::test]
    async fn compare_and_swap_lets_only_one_claim_win() {
        let pool = setup_pool().await;
        let repo = SqlWebhookEventRepository::new(pool);
        let engine = EventProcessingEngine::new();
        let now = parse_ts("2026-03-01T12:00:00Z");

        let pending = event("evt_a", "2026-03-01T12:00:00Z");
        repo.insert_if_absent(pending.clone()).await.expect("insert");

        let first = engine.claim(pending.clone(), "worker-1", now + Duration::seconds(1)).expect("claim");
        let second = engine.claim(pending.clone(), "worker-2", now + Duration::seconds(2)).expect("claim");

        assert!(repo.compare_and_swap(&pending, &first.event).await.expect("cas"));
        assert!(!repo.compare_and_swap(&pending, &second.event).await.expect("cas"));

        let stored = repo.find_by_id(&pending.id).await.expect("find").expect("present");
        assert_eq!(stored.status, ProcessingStatus::Processing);
        assert_eq!(stored.claimed_by.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn list_due_respects_available_at() {
        let pool = setup_pool().await;
        let repo = SqlWebhookEventRepository::new(pool);
        let engine = EventProcessingEngine::new();
        let now = parse_ts("2026-03-01T12:00:00Z");

        let ready = event("evt_ready", "2026-03-01T11:59:00Z");
        repo.insert_if_absent(ready).await.expect("insert");

        let backing_off = event("evt_retry", "2026-03-01T11:59:30Z");
        repo.insert_if_absent(backing_off.clone()).await.expect("insert");
        let claimed = engine.claim(backing_off.clone(), "worker-1", now).expect("claim");
        repo.compare_and_swap(&backing_off, &claimed.event).await.expect("cas");
        let failed = engine
            .fail(claimed.event.clone(), "timeout", vendabot_core::dispatch::RetryPolicy::Retry, now)
            .expect("fail");
        repo.compare_and_swap(&claimed.event, &failed.event).await.expect("cas");

        let due = repo.list_due(now, 10).await.expect("list");
        let ids: Vec<&str> = due.iter().map(|event| event.external_event_id.as_str()).collect();
        assert_eq!(ids, vec!["evt_ready"]);

        let later = repo.list_due(now + Duration::minutes(1), 10).await.expect("list");
        assert_eq!(later.len(), 2);
        assert_eq!(later[1].retry_count, 1);
        assert_eq!(later[1].last_error.as_deref(), Some("timeout"));

        let pending = repo.list_by_status(ProcessingStatus::Pending, 10).await.expect("list");
        assert_eq!(pending.len(), 2);
    }
}

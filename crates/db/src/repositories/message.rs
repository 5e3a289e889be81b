use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use vendabot_core::domain::account::BusinessId;
use vendabot_core::domain::message::{DeliveryStatus, Direction, Message, MessageId, MessageType};

use super::{
    format_optional_timestamp, format_timestamp, get, parse_json, parse_optional_timestamp,
    parse_timestamp, to_json, MessageRepository, RepositoryError,
};
use crate::DbPool;

const SELECT_MESSAGE: &str = "SELECT id, business_id, provider_message_id, direction, message_type,
        status, from_address, to_address, body, content_json, error, reply_claimed_at, sent_at,
        delivered_at, read_at, failed_at, created_at, updated_at
 FROM message";

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn write(&self, message: &Message, or_ignore: bool) -> Result<bool, RepositoryError> {
        let statement = if or_ignore {
            "INSERT OR IGNORE INTO message"
        } else {
            "INSERT INTO message"
        };
        let upsert = if or_ignore {
            ""
        } else {
            " ON CONFLICT(id) DO UPDATE SET
                 provider_message_id = excluded.provider_message_id,
                 status = excluded.status,
                 body = excluded.body,
                 content_json = excluded.content_json,
                 error = excluded.error,
                 reply_claimed_at = excluded.reply_claimed_at,
                 sent_at = excluded.sent_at,
                 delivered_at = excluded.delivered_at,
                 read_at = excluded.read_at,
                 failed_at = excluded.failed_at,
                 updated_at = excluded.updated_at"
        };
        let content = message.content.as_ref().map(|value| to_json("content_json", value)).transpose()?;

        let result = sqlx::query(&format!(
            "{statement} (id, business_id, provider_message_id, direction, message_type, status,
                          from_address, to_address, body, content_json, error, reply_claimed_at,
                          sent_at, delivered_at, read_at, failed_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?){upsert}"
        ))
        .bind(&message.id.0)
        .bind(&message.business_id.0)
        .bind(&message.provider_message_id)
        .bind(message.direction.as_str())
        .bind(message.message_type.as_str())
        .bind(message.status.as_str())
        .bind(&message.from_address)
        .bind(&message.to_address)
        .bind(&message.body)
        .bind(content)
        .bind(&message.error)
        .bind(format_optional_timestamp(message.reply_claimed_at))
        .bind(format_optional_timestamp(message.sent_at))
        .bind(format_optional_timestamp(message.delivered_at))
        .bind(format_optional_timestamp(message.read_at))
        .bind(format_optional_timestamp(message.failed_at))
        .bind(format_timestamp(message.created_at))
        .bind(format_timestamp(message.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message, RepositoryError> {
    let direction: String = get(row, "direction")?;
    let message_type: String = get(row, "message_type")?;
    let status: String = get(row, "status")?;
    let content: Option<String> = get(row, "content_json")?;
    Ok(Message {
        id: MessageId(get(row, "id")?),
        business_id: BusinessId(get(row, "business_id")?),
        provider_message_id: get(row, "provider_message_id")?,
        direction: Direction::parse(&direction)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown direction `{direction}`")))?,
        message_type: MessageType::parse(&message_type).unwrap_or(MessageType::Other),
        status: DeliveryStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown delivery status `{status}`")))?,
        from_address: get(row, "from_address")?,
        to_address: get(row, "to_address")?,
        body: get(row, "body")?,
        content: content.map(|value| parse_json("content_json", &value)).transpose()?,
        error: get(row, "error")?,
        reply_claimed_at: parse_optional_timestamp("reply_claimed_at", get(row, "reply_claimed_at")?)?,
        sent_at: parse_optional_timestamp("sent_at", get(row, "sent_at")?)?,
        delivered_at: parse_optional_timestamp("delivered_at", get(row, "delivered_at")?)?,
        read_at: parse_optional_timestamp("read_at", get(row, "read_at")?)?,
        failed_at: parse_optional_timestamp("failed_at", get(row, "failed_at")?)?,
        created_at: parse_timestamp("created_at", get(row, "created_at")?)?,
        updated_at: parse_timestamp("updated_at", get(row, "updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn insert_if_absent(&self, message: Message) -> Result<bool, RepositoryError> {
        self.write(&message, true).await
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_MESSAGE} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_MESSAGE} WHERE provider_message_id = ?"))
            .bind(provider_message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn save(&self, message: Message) -> Result<(), RepositoryError> {
        self.write(&message, false).await.map(|_| ())
    }

    async fn claim_reply(
        &self,
        id: &MessageId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE message SET reply_claimed_at = ?, updated_at = ?
             WHERE id = ? AND reply_claimed_at IS NULL",
        )
        .bind(format_timestamp(now))
        .bind(format_timestamp(now))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_reply_claim(&self, id: &MessageId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE message SET reply_claimed_at = NULL WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_conversation(
        &self,
        business_id: &BusinessId,
        phone_number: &str,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_MESSAGE}
             WHERE business_id = ? AND (from_address = ? OR to_address = ?)
             ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(&business_id.0)
        .bind(phone_number)
        .bind(phone_number)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows.iter().map(message_from_row).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

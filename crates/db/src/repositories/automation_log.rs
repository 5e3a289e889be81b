use sqlx::sqlite::SqliteRow;

use vendabot_core::domain::account::BusinessId;
use vendabot_core::domain::automation::{AutomationLog, AutomationLogId, ResponseKind};
use vendabot_core::domain::intent::Intent;
use vendabot_core::domain::message::MessageId;

use super::{format_timestamp, get, parse_timestamp, AutomationLogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAutomationLogRepository {
    pool: DbPool,
}

impl SqlAutomationLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn log_from_row(row: &SqliteRow) -> Result<AutomationLog, RepositoryError> {
    let response_kind: String = get(row, "response_kind")?;
    let intent: Option<String> = get(row, "intent")?;
    let latency: i64 = get(row, "latency_ms")?;
    Ok(AutomationLog {
        id: AutomationLogId(get(row, "id")?),
        business_id: BusinessId(get(row, "business_id")?),
        message_id: get::<Option<String>>(row, "message_id")?.map(MessageId),
        phone_number: get(row, "phone_number")?,
        intent: intent.as_deref().and_then(Intent::parse),
        handler: get(row, "handler")?,
        response_kind: ResponseKind::parse(&response_kind).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown response kind `{response_kind}`"))
        })?,
        latency_ms: u64::try_from(latency).unwrap_or_default(),
        error: get(row, "error")?,
        created_at: parse_timestamp("created_at", get(row, "created_at")?)?,
    })
}

#[async_trait::async_trait]
impl AutomationLogRepository for SqlAutomationLogRepository {
    async fn append(&self, log: AutomationLog) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO automation_log (id, business_id, message_id, phone_number, intent,
                                         handler, response_kind, latency_ms, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.id.0)
        .bind(&log.business_id.0)
        .bind(log.message_id.as_ref().map(|id| id.0.as_str()))
        .bind(&log.phone_number)
        .bind(log.intent.map(|intent| intent.as_str()))
        .bind(&log.handler)
        .bind(log.response_kind.as_str())
        .bind(i64::try_from(log.latency_ms).unwrap_or(i64::MAX))
        .bind(&log.error)
        .bind(format_timestamp(log.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_business(
        &self,
        business_id: &BusinessId,
        limit: u32,
    ) -> Result<Vec<AutomationLog>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, business_id, message_id, phone_number, intent, handler, response_kind,
                    latency_ms, error, created_at
             FROM automation_log WHERE business_id = ?
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(&business_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(log_from_row).collect()
    }
}

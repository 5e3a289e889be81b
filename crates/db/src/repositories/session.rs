use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use vendabot_core::domain::account::BusinessId;
use vendabot_core::domain::order::OrderId;
use vendabot_core::domain::session::{
    CustomerSession, NotificationType, SessionId, SessionStatus,
};

use super::{
    format_timestamp, get, parse_decimal, parse_json, parse_timestamp, to_json, RepositoryError,
    SessionRepository,
};
use crate::DbPool;

const SELECT_SESSION: &str = "SELECT s.id, s.business_id, s.phone_number, s.status, s.cart_json,
        s.cart_total_text, s.payment_reference, s.payment_code, s.order_id, s.last_activity_at,
        s.created_at, s.updated_at,
        (SELECT json_group_array(n.notification_type)
           FROM session_notification n WHERE n.session_id = s.id) AS notifications_json
 FROM customer_session s";

const OPEN_FILTER: &str = "s.status NOT IN ('completed', 'expired', 'cancelled')";

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn session_from_row(row: &SqliteRow) -> Result<CustomerSession, RepositoryError> {
    let status: String = get(row, "status")?;
    let cart: String = get(row, "cart_json")?;
    let cart_total: String = get(row, "cart_total_text")?;
    let notifications: Option<String> = get(row, "notifications_json")?;
    let notifications: Vec<String> = match notifications {
        Some(value) => parse_json("notifications_json", &value)?,
        None => Vec::new(),
    };

    Ok(CustomerSession {
        id: SessionId(get(row, "id")?),
        business_id: BusinessId(get(row, "business_id")?),
        phone_number: get(row, "phone_number")?,
        status: SessionStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown session status `{status}`")))?,
        cart: parse_json("cart_json", &cart)?,
        cart_total: parse_decimal("cart_total_text", &cart_total)?,
        payment_reference: get(row, "payment_reference")?,
        payment_code: get(row, "payment_code")?,
        order_id: get::<Option<String>>(row, "order_id")?.map(OrderId),
        notifications_sent: notifications
            .iter()
            .filter_map(|value| NotificationType::parse(value))
            .collect::<BTreeSet<_>>(),
        last_activity_at: parse_timestamp("last_activity_at", get(row, "last_activity_at")?)?,
        created_at: parse_timestamp("created_at", get(row, "created_at")?)?,
        updated_at: parse_timestamp("updated_at", get(row, "updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn get_or_create(
        &self,
        business_id: &BusinessId,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<CustomerSession, RepositoryError> {
        let fresh = CustomerSession::new(business_id.clone(), phone_number, now);
        // The partial unique index turns a concurrent second insert into a no-op.
        sqlx::query(
            "INSERT OR IGNORE INTO customer_session (id, business_id, phone_number, status,
                                                     cart_json, cart_total_text,
                                                     last_activity_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, '[]', '0', ?, ?, ?)",
        )
        .bind(&fresh.id.0)
        .bind(&business_id.0)
        .bind(phone_number)
        .bind(fresh.status.as_str())
        .bind(format_timestamp(now))
        .bind(format_timestamp(now))
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?;

        self.find_open(business_id, phone_number).await?.ok_or_else(|| {
            RepositoryError::NotFound(format!("open session for {phone_number}"))
        })
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<CustomerSession>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_SESSION} WHERE s.id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn find_open(
        &self,
        business_id: &BusinessId,
        phone_number: &str,
    ) -> Result<Option<CustomerSession>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_SESSION} WHERE s.business_id = ? AND s.phone_number = ? AND {OPEN_FILTER}"
        ))
        .bind(&business_id.0)
        .bind(phone_number)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn save(&self, session: CustomerSession) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO customer_session (id, business_id, phone_number, status, cart_json,
                                           cart_total_text, payment_reference, payment_code,
                                           order_id, last_activity_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 cart_json = excluded.cart_json,
                 cart_total_text = excluded.cart_total_text,
                 payment_reference = excluded.payment_reference,
                 payment_code = excluded.payment_code,
                 order_id = excluded.order_id,
                 last_activity_at = excluded.last_activity_at,
                 updated_at = excluded.updated_at",
        )
        .bind(&session.id.0)
        .bind(&session.business_id.0)
        .bind(&session.phone_number)
        .bind(session.status.as_str())
        .bind(to_json("cart_json", &session.cart)?)
        .bind(session.cart_total.to_string())
        .bind(&session.payment_reference)
        .bind(&session.payment_code)
        .bind(session.order_id.as_ref().map(|id| id.0.as_str()))
        .bind(format_timestamp(session.last_activity_at))
        .bind(format_timestamp(session.created_at))
        .bind(format_timestamp(session.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_idle(
        &self,
        statuses: &[SessionStatus],
        idle_since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CustomerSession>, RepositoryError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "{SELECT_SESSION} WHERE s.status IN ({placeholders}) AND s.last_activity_at <= ?
             ORDER BY s.last_activity_at LIMIT ?"
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query
            .bind(format_timestamp(idle_since))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn list_awaiting_notification(
        &self,
        statuses: &[SessionStatus],
        notification: NotificationType,
        idle_since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CustomerSession>, RepositoryError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "{SELECT_SESSION} WHERE s.status IN ({placeholders}) AND s.last_activity_at <= ?
               AND NOT EXISTS (SELECT 1 FROM session_notification sn
                               WHERE sn.session_id = s.id AND sn.notification_type = ?)
             ORDER BY s.last_activity_at LIMIT ?"
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query
            .bind(format_timestamp(idle_since))
            .bind(notification.as_str())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn record_notification(
        &self,
        session_id: &SessionId,
        notification: NotificationType,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO session_notification (session_id, notification_type, sent_at)
             VALUES (?, ?, ?)",
        )
        .bind(&session_id.0)
        .bind(notification.as_str())
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite};
use thiserror::Error;

use vendabot_core::domain::account::{BusinessAccount, BusinessId};
use vendabot_core::domain::automation::AutomationLog;
use vendabot_core::domain::message::{Message, MessageId};
use vendabot_core::domain::order::{Order, OrderId};
use vendabot_core::domain::product::{Product, ProductId};
use vendabot_core::domain::session::{CustomerSession, NotificationType, SessionId, SessionStatus};
use vendabot_core::domain::webhook_event::{ProcessingStatus, WebhookEvent, WebhookEventId};

pub mod account;
pub mod automation_log;
pub mod lease;
pub mod memory;
pub mod message;
pub mod order;
pub mod product;
pub mod session;
pub mod template;
pub mod webhook_event;

pub use account::SqlAccountRepository;
pub use automation_log::SqlAutomationLogRepository;
pub use lease::SqlLeaseRepository;
pub use memory::{
    InMemoryAccountRepository, InMemoryAutomationLogRepository, InMemoryLeaseRepository,
    InMemoryMessageRepository, InMemoryOrderRepository, InMemoryProductRepository,
    InMemorySessionRepository, InMemoryTemplateRepository, InMemoryWebhookEventRepository,
};
pub use message::SqlMessageRepository;
pub use order::SqlOrderRepository;
pub use product::SqlProductRepository;
pub use session::SqlSessionRepository;
pub use template::SqlTemplateRepository;
pub use webhook_event::SqlWebhookEventRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// A unique value other than the record's own key is already taken.
    #[error("conflict: {0}")]
    Conflict(String),
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn find_by_id(&self, id: &BusinessId) -> Result<Option<BusinessAccount>, RepositoryError>;
    async fn find_by_phone_number_id(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<BusinessAccount>, RepositoryError>;
    /// Compares digits only, so formatting differences do not matter.
    async fn find_by_display_number(
        &self,
        display_phone_number: &str,
    ) -> Result<Option<BusinessAccount>, RepositoryError>;
    async fn find_by_workspace_id(
        &self,
        workspace_id: &str,
    ) -> Result<Option<BusinessAccount>, RepositoryError>;
    async fn save(&self, account: BusinessAccount) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError>;
    async fn list_active(&self, business_id: &BusinessId) -> Result<Vec<Product>, RepositoryError>;
    async fn save(&self, product: Product) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts unless an order with the same idempotency key exists; returns
    /// the stored order either way.
    async fn create(&self, order: Order) -> Result<Order, RepositoryError>;
    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError>;
    async fn find_by_number(
        &self,
        business_id: &BusinessId,
        order_number: &str,
    ) -> Result<Option<Order>, RepositoryError>;
    async fn latest_for_customer(
        &self,
        business_id: &BusinessId,
        customer_phone: &str,
    ) -> Result<Option<Order>, RepositoryError>;
    async fn save(&self, order: Order) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Returns false when an event with the same external id already exists.
    async fn insert_if_absent(&self, event: WebhookEvent) -> Result<bool, RepositoryError>;
    async fn find_by_id(&self, id: &WebhookEventId)
        -> Result<Option<WebhookEvent>, RepositoryError>;
    async fn find_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<WebhookEvent>, RepositoryError>;
    /// Writes `next` only if the stored row still matches `previous`'s status
    /// and `updated_at`. Returns false when another writer got there first.
    async fn compare_and_swap(
        &self,
        previous: &WebhookEvent,
        next: &WebhookEvent,
    ) -> Result<bool, RepositoryError>;
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WebhookEvent>, RepositoryError>;
    async fn list_by_status(
        &self,
        status: ProcessingStatus,
        limit: u32,
    ) -> Result<Vec<WebhookEvent>, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Returns false when the provider message id is already stored.
    async fn insert_if_absent(&self, message: Message) -> Result<bool, RepositoryError>;
    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError>;
    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, RepositoryError>;
    async fn save(&self, message: Message) -> Result<(), RepositoryError>;
    /// Sets the reply claim if none is held. Returns false if already claimed.
    async fn claim_reply(&self, id: &MessageId, now: DateTime<Utc>)
        -> Result<bool, RepositoryError>;
    async fn release_reply_claim(&self, id: &MessageId) -> Result<(), RepositoryError>;
    /// Most recent messages between a business and a customer, oldest first.
    async fn recent_conversation(
        &self,
        business_id: &BusinessId,
        phone_number: &str,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Atomic: concurrent first contacts resolve to the same open session.
    async fn get_or_create(
        &self,
        business_id: &BusinessId,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<CustomerSession, RepositoryError>;
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<CustomerSession>, RepositoryError>;
    async fn find_open(
        &self,
        business_id: &BusinessId,
        phone_number: &str,
    ) -> Result<Option<CustomerSession>, RepositoryError>;
    async fn save(&self, session: CustomerSession) -> Result<(), RepositoryError>;
    async fn list_idle(
        &self,
        statuses: &[SessionStatus],
        idle_since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CustomerSession>, RepositoryError>;
    /// Like `list_idle`, but skips sessions whose ledger already holds
    /// `notification`, so handled sessions never crowd out newer ones.
    async fn list_awaiting_notification(
        &self,
        statuses: &[SessionStatus],
        notification: NotificationType,
        idle_since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CustomerSession>, RepositoryError>;
    /// Append-only ledger; returns false if this type was already recorded.
    async fn record_notification(
        &self,
        session_id: &SessionId,
        notification: NotificationType,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait LeaseRepository: Send + Sync {
    /// Acquires `key` for `holder` if free or expired.
    async fn try_acquire(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool, RepositoryError>;
    async fn release(&self, key: &str, holder: &str) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AutomationLogRepository: Send + Sync {
    async fn append(&self, log: AutomationLog) -> Result<(), RepositoryError>;
    async fn list_for_business(
        &self,
        business_id: &BusinessId,
        limit: u32,
    ) -> Result<Vec<AutomationLog>, RepositoryError>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find(
        &self,
        business_id: &BusinessId,
        template_key: &str,
    ) -> Result<Option<String>, RepositoryError>;
    async fn save(
        &self,
        business_id: &BusinessId,
        template_key: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

pub(crate) fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(column).map_err(|error| RepositoryError::Decode(format!("`{column}`: {error}")))
}

/// Fixed-width UTC timestamps so text comparison in SQL orders correctly.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn format_optional_timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(format_timestamp)
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn to_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Utc};

    use vendabot_core::domain::account::{BusinessAccount, BusinessId};

    use crate::repositories::{AccountRepository, SqlAccountRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    pub async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    pub fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    pub fn sample_account(id: &str, phone_number_id: &str) -> BusinessAccount {
        BusinessAccount {
            id: BusinessId(id.to_string()),
            name: "Cantina da Nona".to_string(),
            phone_number_id: phone_number_id.to_string(),
            display_phone_number: "+55 11 99999-0000".to_string(),
            workspace_id: Some(format!("waba-{id}")),
            pix_key: Some("nona@example.com".to_string()),
            merchant_city: "Sao Paulo".to_string(),
            active: true,
            created_at: parse_ts("2026-03-01T12:00:00Z"),
            updated_at: parse_ts("2026-03-01T12:00:00Z"),
        }
    }

    pub async fn insert_account(pool: &DbPool, id: &str, phone_number_id: &str) -> BusinessAccount {
        let account = sample_account(id, phone_number_id);
        SqlAccountRepository::new(pool.clone()).save(account.clone()).await.expect("save account");
        account
    }
}

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info};

use vendabot_core::domain::account::BusinessId;
use vendabot_core::domain::order::{LineItem, OrderId};
use vendabot_core::domain::session::{CustomerSession, NotificationType, SessionStatus};
use vendabot_core::errors::DomainError;
use vendabot_db::repositories::{RepositoryError, SessionRepository};

const EXPIRY_BATCH: u32 = 200;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Commits session transitions through the repository. Every mutator stamps
/// `last_activity_at` (the value type does that) and persists the result.
#[derive(Clone)]
pub struct SessionManager {
    repository: Arc<dyn SessionRepository>,
    staleness: Duration,
}

impl SessionManager {
    pub fn new(repository: Arc<dyn SessionRepository>, staleness_days: u32) -> Self {
        Self { repository, staleness: Duration::days(i64::from(staleness_days)) }
    }

    /// Returns the open session for the pair, creating one if needed. An open
    /// session idle past the staleness window is expired and replaced.
    pub async fn get_or_create(
        &self,
        business_id: &BusinessId,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<CustomerSession, SessionError> {
        let session = self.repository.get_or_create(business_id, phone_number, now).await?;
        if !session.is_stale(now, self.staleness) {
            return Ok(session);
        }

        debug!(
            event_name = "automation.session.expired_on_access",
            session_id = %session.id.0,
            business_id = %business_id.0,
            "stale session replaced"
        );
        self.repository.save(session.expire(now)?).await?;
        Ok(self.repository.get_or_create(business_id, phone_number, now).await?)
    }

    pub async fn update_cart(
        &self,
        session: CustomerSession,
        items: Vec<LineItem>,
        now: DateTime<Utc>,
    ) -> Result<CustomerSession, SessionError> {
        self.commit(session.update_cart(items, now)?).await
    }

    pub async fn clear_cart(
        &self,
        session: CustomerSession,
        now: DateTime<Utc>,
    ) -> Result<CustomerSession, SessionError> {
        self.commit(session.clear_cart(now)?).await
    }

    pub async fn set_payment_pending(
        &self,
        session: CustomerSession,
        order_id: OrderId,
        payment_reference: &str,
        payment_code: &str,
        now: DateTime<Utc>,
    ) -> Result<CustomerSession, SessionError> {
        self.commit(session.set_payment_pending(order_id, payment_reference, payment_code, now)?)
            .await
    }

    pub async fn confirm_payment(
        &self,
        session: CustomerSession,
        now: DateTime<Utc>,
    ) -> Result<CustomerSession, SessionError> {
        self.commit(session.confirm_payment(now)?).await
    }

    /// Walks a confirmed or placed session through to `completed`.
    pub async fn complete_order(
        &self,
        session: CustomerSession,
        now: DateTime<Utc>,
    ) -> Result<CustomerSession, SessionError> {
        let placed = match session.status {
            SessionStatus::PaymentConfirmed => session.place_order(now)?,
            _ => session,
        };
        self.commit(placed.complete(now)?).await
    }

    /// Cancels the current session and opens a fresh one for the same pair.
    /// A session with nothing in it is already what a reset produces and is
    /// kept as is.
    pub async fn reset(
        &self,
        session: CustomerSession,
        now: DateTime<Utc>,
    ) -> Result<CustomerSession, SessionError> {
        if session.is_pristine() {
            return Ok(session);
        }
        let business_id = session.business_id.clone();
        let phone_number = session.phone_number.clone();
        if !session.status.is_terminal() {
            self.repository.save(session.cancel(now)?).await?;
        }
        info!(
            event_name = "automation.session.reset",
            business_id = %business_id.0,
            "session reset by customer"
        );
        Ok(self.repository.get_or_create(&business_id, &phone_number, now).await?)
    }

    /// Ends the session without opening a new one.
    pub async fn cancel(
        &self,
        session: CustomerSession,
        now: DateTime<Utc>,
    ) -> Result<CustomerSession, SessionError> {
        self.commit(session.cancel(now)?).await
    }

    /// Records `notification` for the session in the shared ledger. Returns
    /// false when another sweep already sent it.
    pub async fn notify_once(
        &self,
        session: &mut CustomerSession,
        notification: NotificationType,
        now: DateTime<Utc>,
    ) -> Result<bool, SessionError> {
        if session.was_notification_sent(notification) {
            return Ok(false);
        }
        let first = self.repository.record_notification(&session.id, notification, now).await?;
        session.add_notification(notification);
        Ok(first)
    }

    /// Expires every open session idle past the staleness window.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<u32, SessionError> {
        let idle_since = now - self.staleness;
        let mut expired = 0;
        loop {
            let batch = self
                .repository
                .list_idle(&SessionStatus::NON_TERMINAL, idle_since, EXPIRY_BATCH)
                .await?;
            if batch.is_empty() {
                break;
            }
            let full_batch = batch.len() as u32 == EXPIRY_BATCH;
            for session in batch {
                self.repository.save(session.expire(now)?).await?;
                expired += 1;
            }
            if !full_batch {
                break;
            }
        }
        if expired > 0 {
            info!(event_name = "automation.session.expired", count = expired, "stale sessions expired");
        }
        Ok(expired)
    }

    /// Idle sessions in `statuses` that have not yet received `notification`.
    pub async fn awaiting_notification(
        &self,
        statuses: &[SessionStatus],
        notification: NotificationType,
        idle_since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CustomerSession>, SessionError> {
        Ok(self.repository.list_awaiting_notification(statuses, notification, idle_since, limit).await?)
    }

    pub async fn save(&self, session: CustomerSession) -> Result<CustomerSession, SessionError> {
        self.commit(session).await
    }

    async fn commit(&self, session: CustomerSession) -> Result<CustomerSession, SessionError> {
        self.repository.save(session.clone()).await?;
        Ok(session)
    }
}

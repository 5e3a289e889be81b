use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::account::BusinessId;
use crate::domain::order::{items_total, LineItem, OrderId};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    CartCreated,
    CartAbandoned,
    PaymentPending,
    PaymentConfirmed,
    OrderPlaced,
    Completed,
    Expired,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::CartCreated => "cart_created",
            Self::CartAbandoned => "cart_abandoned",
            Self::PaymentPending => "payment_pending",
            Self::PaymentConfirmed => "payment_confirmed",
            Self::OrderPlaced => "order_placed",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "cart_created" => Some(Self::CartCreated),
            "cart_abandoned" => Some(Self::CartAbandoned),
            "payment_pending" => Some(Self::PaymentPending),
            "payment_confirmed" => Some(Self::PaymentConfirmed),
            "order_placed" => Some(Self::OrderPlaced),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Cancelled)
    }

    pub const NON_TERMINAL: [SessionStatus; 6] = [
        Self::Active,
        Self::CartCreated,
        Self::CartAbandoned,
        Self::PaymentPending,
        Self::PaymentConfirmed,
        Self::OrderPlaced,
    ];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    AbandonedCart,
    PaymentReminder,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AbandonedCart => "abandoned_cart",
            Self::PaymentReminder => "payment_reminder",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "abandoned_cart" => Some(Self::AbandonedCart),
            "payment_reminder" => Some(Self::PaymentReminder),
            _ => None,
        }
    }
}

/// Conversation and purchase context for one customer of one business.
///
/// Transitions consume the session and return the next value; callers commit
/// the result through the session repository.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomerSession {
    pub id: SessionId,
    pub business_id: BusinessId,
    pub phone_number: String,
    pub status: SessionStatus,
    pub cart: Vec<LineItem>,
    pub cart_total: Decimal,
    pub payment_reference: Option<String>,
    pub payment_code: Option<String>,
    pub order_id: Option<OrderId>,
    pub notifications_sent: BTreeSet<NotificationType>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CustomerSession {
    pub fn new(business_id: BusinessId, phone_number: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId(uuid::Uuid::new_v4().to_string()),
            business_id,
            phone_number: phone_number.into(),
            status: SessionStatus::Active,
            cart: Vec::new(),
            cart_total: Decimal::ZERO,
            payment_reference: None,
            payment_code: None,
            order_id: None,
            notifications_sent: BTreeSet::new(),
            last_activity_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn was_notification_sent(&self, notification: NotificationType) -> bool {
        self.notifications_sent.contains(&notification)
    }

    /// Returns false if the notification was already recorded.
    pub fn add_notification(&mut self, notification: NotificationType) -> bool {
        self.notifications_sent.insert(notification)
    }

    /// Active with no cart, payment or order: the state a reset leaves behind.
    pub fn is_pristine(&self) -> bool {
        self.status == SessionStatus::Active
            && self.cart.is_empty()
            && self.payment_reference.is_none()
            && self.order_id.is_none()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.last_activity_at > window
    }

    pub fn touch(mut self, now: DateTime<Utc>) -> Self {
        self.last_activity_at = now;
        self.updated_at = now;
        self
    }

    /// Merges items into the cart, summing quantities of the same product.
    /// An emptied cart moves the session back to `active`.
    pub fn update_cart(mut self, items: Vec<LineItem>, now: DateTime<Utc>) -> Result<Self, DomainError> {
        let next = if items.is_empty() && self.cart.is_empty() {
            SessionStatus::Active
        } else {
            SessionStatus::CartCreated
        };
        self.require(
            matches!(
                self.status,
                SessionStatus::Active | SessionStatus::CartCreated | SessionStatus::CartAbandoned
            ),
            next,
        )?;

        for item in items {
            match self.cart.iter_mut().find(|existing| existing.product_id == item.product_id) {
                Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
                None => self.cart.push(item),
            }
        }
        self.cart_total = items_total(&self.cart);
        self.status = next;
        Ok(self.touch(now))
    }

    pub fn clear_cart(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.require(
            matches!(
                self.status,
                SessionStatus::Active | SessionStatus::CartCreated | SessionStatus::CartAbandoned
            ),
            SessionStatus::Active,
        )?;
        self.cart.clear();
        self.cart_total = Decimal::ZERO;
        self.status = SessionStatus::Active;
        Ok(self.touch(now))
    }

    /// Marks an idle cart as abandoned. Does not count as customer activity.
    pub fn mark_abandoned(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.require(self.status == SessionStatus::CartCreated, SessionStatus::CartAbandoned)?;
        self.status = SessionStatus::CartAbandoned;
        self.updated_at = now;
        Ok(self)
    }

    pub fn set_payment_pending(
        mut self,
        order_id: OrderId,
        payment_reference: impl Into<String>,
        payment_code: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        self.require(
            !self.cart.is_empty()
                && matches!(
                    self.status,
                    SessionStatus::CartCreated
                        | SessionStatus::CartAbandoned
                        | SessionStatus::PaymentPending
                ),
            SessionStatus::PaymentPending,
        )?;
        self.order_id = Some(order_id);
        self.payment_reference = Some(payment_reference.into());
        self.payment_code = Some(payment_code.into());
        self.status = SessionStatus::PaymentPending;
        Ok(self.touch(now))
    }

    pub fn confirm_payment(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.require(self.status == SessionStatus::PaymentPending, SessionStatus::PaymentConfirmed)?;
        self.status = SessionStatus::PaymentConfirmed;
        Ok(self.touch(now))
    }

    pub fn place_order(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.require(self.status == SessionStatus::PaymentConfirmed, SessionStatus::OrderPlaced)?;
        self.status = SessionStatus::OrderPlaced;
        Ok(self.touch(now))
    }

    pub fn complete(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.require(self.status == SessionStatus::OrderPlaced, SessionStatus::Completed)?;
        self.status = SessionStatus::Completed;
        Ok(self.touch(now))
    }

    /// Ends an idle session. Does not count as customer activity.
    pub fn expire(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.require(!self.status.is_terminal(), SessionStatus::Expired)?;
        self.status = SessionStatus::Expired;
        self.updated_at = now;
        Ok(self)
    }

    pub fn cancel(mut self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        self.require(!self.status.is_terminal(), SessionStatus::Cancelled)?;
        self.status = SessionStatus::Cancelled;
        Ok(self.touch(now))
    }

    fn require(&self, allowed: bool, to: SessionStatus) -> Result<(), DomainError> {
        if allowed {
            Ok(())
        } else {
            Err(DomainError::InvalidSessionTransition { from: self.status, to })
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use super::{CustomerSession, NotificationType, SessionStatus};
    use crate::domain::account::BusinessId;
    use crate::domain::order::{LineItem, OrderId};
    use crate::domain::product::ProductId;
    use crate::errors::DomainError;

    fn session() -> CustomerSession {
        CustomerSession::new(BusinessId("biz-1".to_string()), "5511988887777", Utc::now())
    }

    fn rondelli(quantity: u32) -> LineItem {
        LineItem {
            product_id: ProductId("p-rondelli".to_string()),
            name: "Rondelli de frango".to_string(),
            quantity,
            unit_price: Decimal::new(3490, 2),
        }
    }

    #[test]
    fn full_purchase_lifecycle() {
        let now = Utc::now();
        let session = session()
            .update_cart(vec![rondelli(2)], now)
            .and_then(|s| s.set_payment_pending(OrderId("o-1".to_string()), "tx1", "000201", now))
            .and_then(|s| s.confirm_payment(now))
            .and_then(|s| s.place_order(now))
            .and_then(|s| s.complete(now))
            .expect("lifecycle should succeed");

        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.cart_total, Decimal::new(6980, 2));
        assert!(session.status.is_terminal());
    }

    #[test]
    fn update_cart_merges_quantities_of_same_product() {
        let now = Utc::now();
        let session = session()
            .update_cart(vec![rondelli(1)], now)
            .and_then(|s| s.update_cart(vec![rondelli(2)], now))
            .expect("cart updates should succeed");

        assert_eq!(session.cart.len(), 1);
        assert_eq!(session.cart[0].quantity, 3);
        assert_eq!(session.status, SessionStatus::CartCreated);
    }

    #[test]
    fn payment_pending_requires_items() {
        let result = session().set_payment_pending(OrderId("o-1".to_string()), "tx", "code", Utc::now());
        assert_eq!(
            result.err(),
            Some(DomainError::InvalidSessionTransition {
                from: SessionStatus::Active,
                to: SessionStatus::PaymentPending,
            })
        );
    }

    #[test]
    fn terminal_sessions_reject_mutation() {
        let now = Utc::now();
        let expired = session().expire(now).expect("expire should succeed");
        assert!(expired.clone().update_cart(vec![rondelli(1)], now).is_err());
        assert!(expired.clone().cancel(now).is_err());
        assert!(expired.expire(now).is_err());
    }

    #[test]
    fn mutators_refresh_last_activity_but_sweeps_do_not() {
        let start = Utc::now() - Duration::days(10);
        let mut session = session();
        session.last_activity_at = start;

        let later = Utc::now();
        let updated = session.clone().update_cart(vec![rondelli(1)], later).expect("update");
        assert_eq!(updated.last_activity_at, later);

        let abandoned = updated.clone().mark_abandoned(later + Duration::hours(2)).expect("abandon");
        assert_eq!(abandoned.last_activity_at, later);
        assert!(session.is_stale(later, Duration::days(7)));
    }

    #[test]
    fn notifications_are_recorded_once() {
        let mut session = session();
        assert!(!session.was_notification_sent(NotificationType::AbandonedCart));
        assert!(session.add_notification(NotificationType::AbandonedCart));
        assert!(!session.add_notification(NotificationType::AbandonedCart));
        assert!(session.was_notification_sent(NotificationType::AbandonedCart));
        assert!(!session.was_notification_sent(NotificationType::PaymentReminder));
    }

    #[test]
    fn statuses_round_trip() {
        for status in SessionStatus::NON_TERMINAL
            .into_iter()
            .chain([SessionStatus::Completed, SessionStatus::Expired, SessionStatus::Cancelled])
        {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
    }
}

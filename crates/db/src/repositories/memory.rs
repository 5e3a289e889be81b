use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use vendabot_core::domain::account::{normalize_phone, BusinessAccount, BusinessId};
use vendabot_core::domain::automation::AutomationLog;
use vendabot_core::domain::message::{Message, MessageId};
use vendabot_core::domain::order::{Order, OrderId};
use vendabot_core::domain::product::{Product, ProductId};
use vendabot_core::domain::session::{CustomerSession, NotificationType, SessionId, SessionStatus};
use vendabot_core::domain::webhook_event::{ProcessingStatus, WebhookEvent, WebhookEventId};

use super::{
    AccountRepository, AutomationLogRepository, LeaseRepository, MessageRepository,
    OrderRepository, ProductRepository, RepositoryError, SessionRepository, TemplateRepository,
    WebhookEventRepository,
};

#[derive(Default)]
pub struct InMemoryAccountRepository {
    accounts: RwLock<HashMap<String, BusinessAccount>>,
}

#[async_trait::async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn find_by_id(&self, id: &BusinessId) -> Result<Option<BusinessAccount>, RepositoryError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(&id.0).cloned())
    }

    async fn find_by_phone_number_id(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<BusinessAccount>, RepositoryError> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|account| account.active && account.phone_number_id == phone_number_id)
            .cloned())
    }

    async fn find_by_display_number(
        &self,
        display_phone_number: &str,
    ) -> Result<Option<BusinessAccount>, RepositoryError> {
        let digits = normalize_phone(display_phone_number);
        if digits.is_empty() {
            return Ok(None);
        }
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|account| {
                account.active && normalize_phone(&account.display_phone_number) == digits
            })
            .cloned())
    }

    async fn find_by_workspace_id(
        &self,
        workspace_id: &str,
    ) -> Result<Option<BusinessAccount>, RepositoryError> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|account| account.active && account.workspace_id.as_deref() == Some(workspace_id))
            .cloned())
    }

    async fn save(&self, account: BusinessAccount) -> Result<(), RepositoryError> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.id.0.clone(), account);
        Ok(())
    }
}

/// Keeps insertion order so listings match catalog order.
#[derive(Default)]
pub struct InMemoryProductRepository {
    products: RwLock<Vec<Product>>,
}

#[async_trait::async_trait]
impl ProductRepository for InMemoryProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products.iter().find(|product| product.id == *id).cloned())
    }

    async fn list_active(&self, business_id: &BusinessId) -> Result<Vec<Product>, RepositoryError> {
        let products = self.products.read().await;
        Ok(products
            .iter()
            .filter(|product| product.active && product.business_id == *business_id)
            .cloned()
            .collect())
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        match products.iter_mut().find(|existing| existing.id == product.id) {
            Some(existing) => *existing = product,
            None => products.push(product),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<String, Order>>,
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: Order) -> Result<Order, RepositoryError> {
        let mut orders = self.orders.write().await;
        if let Some(existing) =
            orders.values().find(|existing| existing.idempotency_key == order.idempotency_key)
        {
            return Ok(existing.clone());
        }
        if orders.values().any(|existing| {
            existing.business_id == order.business_id && existing.order_number == order.order_number
        }) {
            return Err(RepositoryError::Conflict(format!("order number {}", order.order_number)));
        }
        orders.insert(order.id.0.clone(), order.clone());
        Ok(order)
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders.get(&id.0).cloned())
    }

    async fn find_by_number(
        &self,
        business_id: &BusinessId,
        order_number: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|order| order.business_id == *business_id && order.order_number == order_number)
            .max_by_key(|order| order.created_at)
            .cloned())
    }

    async fn latest_for_customer(
        &self,
        business_id: &BusinessId,
        customer_phone: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let orders = self.orders.read().await;
        Ok(orders
            .values()
            .filter(|order| order.business_id == *business_id && order.customer_phone == customer_phone)
            .max_by_key(|order| order.created_at)
            .cloned())
    }

    async fn save(&self, order: Order) -> Result<(), RepositoryError> {
        let mut orders = self.orders.write().await;
        orders.insert(order.id.0.clone(), order);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWebhookEventRepository {
    events: RwLock<HashMap<String, WebhookEvent>>,
}

#[async_trait::async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn insert_if_absent(&self, event: WebhookEvent) -> Result<bool, RepositoryError> {
        let mut events = self.events.write().await;
        if events.values().any(|existing| existing.external_event_id == event.external_event_id) {
            return Ok(false);
        }
        events.insert(event.id.0.clone(), event);
        Ok(true)
    }

    async fn find_by_id(
        &self,
        id: &WebhookEventId,
    ) -> Result<Option<WebhookEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.get(&id.0).cloned())
    }

    async fn find_by_external_id(
        &self,
        external_event_id: &str,
    ) -> Result<Option<WebhookEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.values().find(|event| event.external_event_id == external_event_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        previous: &WebhookEvent,
        next: &WebhookEvent,
    ) -> Result<bool, RepositoryError> {
        let mut events = self.events.write().await;
        match events.get_mut(&previous.id.0) {
            Some(stored)
                if stored.status == previous.status && stored.updated_at == previous.updated_at =>
            {
                *stored = next.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<WebhookEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut due: Vec<WebhookEvent> = events
            .values()
            .filter(|event| event.status == ProcessingStatus::Pending && event.available_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|event| (event.available_at, event.received_at));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn list_by_status(
        &self,
        status: ProcessingStatus,
        limit: u32,
    ) -> Result<Vec<WebhookEvent>, RepositoryError> {
        let events = self.events.read().await;
        let mut matching: Vec<WebhookEvent> =
            events.values().filter(|event| event.status == status).cloned().collect();
        matching.sort_by_key(|event| event.updated_at);
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<HashMap<String, Message>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert_if_absent(&self, message: Message) -> Result<bool, RepositoryError> {
        let mut messages = self.messages.write().await;
        let duplicate = message.provider_message_id.as_ref().is_some_and(|provider_id| {
            messages
                .values()
                .any(|existing| existing.provider_message_id.as_ref() == Some(provider_id))
        });
        if duplicate || messages.contains_key(&message.id.0) {
            return Ok(false);
        }
        messages.insert(message.id.0.clone(), message);
        Ok(true)
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages.get(&id.0).cloned())
    }

    async fn find_by_provider_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .find(|message| message.provider_message_id.as_deref() == Some(provider_message_id))
            .cloned())
    }

    async fn save(&self, message: Message) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        messages.insert(message.id.0.clone(), message);
        Ok(())
    }

    async fn claim_reply(
        &self,
        id: &MessageId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(&id.0) {
            Some(message) if message.reply_claimed_at.is_none() => {
                message.reply_claimed_at = Some(now);
                message.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_reply_claim(&self, id: &MessageId) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        if let Some(message) = messages.get_mut(&id.0) {
            message.reply_claimed_at = None;
        }
        Ok(())
    }

    async fn recent_conversation(
        &self,
        business_id: &BusinessId,
        phone_number: &str,
        limit: u32,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut conversation: Vec<Message> = messages
            .values()
            .filter(|message| {
                message.business_id == *business_id
                    && (message.from_address == phone_number || message.to_address == phone_number)
            })
            .cloned()
            .collect();
        conversation.sort_by_key(|message| message.created_at);
        let skip = conversation.len().saturating_sub(limit as usize);
        Ok(conversation.split_off(skip))
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, CustomerSession>>,
    notifications: RwLock<HashSet<(String, NotificationType)>>,
}

impl InMemorySessionRepository {
    async fn with_ledger(&self, mut session: CustomerSession) -> CustomerSession {
        let ledger = self.notifications.read().await;
        session.notifications_sent = ledger
            .iter()
            .filter(|(session_id, _)| *session_id == session.id.0)
            .map(|(_, notification)| *notification)
            .collect();
        session
    }
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn get_or_create(
        &self,
        business_id: &BusinessId,
        phone_number: &str,
        now: DateTime<Utc>,
    ) -> Result<CustomerSession, RepositoryError> {
        let session = {
            let mut sessions = self.sessions.write().await;
            let open = sessions
                .values()
                .find(|session| {
                    session.business_id == *business_id
                        && session.phone_number == phone_number
                        && !session.status.is_terminal()
                })
                .cloned();
            match open {
                Some(session) => session,
                None => {
                    let fresh = CustomerSession::new(business_id.clone(), phone_number, now);
                    sessions.insert(fresh.id.0.clone(), fresh.clone());
                    fresh
                }
            }
        };
        Ok(self.with_ledger(session).await)
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<CustomerSession>, RepositoryError> {
        let session = self.sessions.read().await.get(&id.0).cloned();
        match session {
            Some(session) => Ok(Some(self.with_ledger(session).await)),
            None => Ok(None),
        }
    }

    async fn find_open(
        &self,
        business_id: &BusinessId,
        phone_number: &str,
    ) -> Result<Option<CustomerSession>, RepositoryError> {
        let session = self
            .sessions
            .read()
            .await
            .values()
            .find(|session| {
                session.business_id == *business_id
                    && session.phone_number == phone_number
                    && !session.status.is_terminal()
            })
            .cloned();
        match session {
            Some(session) => Ok(Some(self.with_ledger(session).await)),
            None => Ok(None),
        }
    }

    async fn save(&self, session: CustomerSession) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.0.clone(), session);
        Ok(())
    }

    async fn list_idle(
        &self,
        statuses: &[SessionStatus],
        idle_since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CustomerSession>, RepositoryError> {
        let mut idle: Vec<CustomerSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|session| {
                statuses.contains(&session.status) && session.last_activity_at <= idle_since
            })
            .cloned()
            .collect();
        idle.sort_by_key(|session| session.last_activity_at);
        idle.truncate(limit as usize);

        let mut result = Vec::with_capacity(idle.len());
        for session in idle {
            result.push(self.with_ledger(session).await);
        }
        Ok(result)
    }

    async fn list_awaiting_notification(
        &self,
        statuses: &[SessionStatus],
        notification: NotificationType,
        idle_since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<CustomerSession>, RepositoryError> {
        let ledger = self.notifications.read().await.clone();
        let mut idle: Vec<CustomerSession> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|session| {
                statuses.contains(&session.status)
                    && session.last_activity_at <= idle_since
                    && !ledger.contains(&(session.id.0.clone(), notification))
            })
            .cloned()
            .collect();
        idle.sort_by_key(|session| session.last_activity_at);
        idle.truncate(limit as usize);

        let mut result = Vec::with_capacity(idle.len());
        for session in idle {
            result.push(self.with_ledger(session).await);
        }
        Ok(result)
    }

    async fn record_notification(
        &self,
        session_id: &SessionId,
        notification: NotificationType,
        _now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut ledger = self.notifications.write().await;
        Ok(ledger.insert((session_id.0.clone(), notification)))
    }
}

#[derive(Default)]
pub struct InMemoryLeaseRepository {
    leases: RwLock<HashMap<String, (String, DateTime<Utc>)>>,
}

#[async_trait::async_trait]
impl LeaseRepository for InMemoryLeaseRepository {
    async fn try_acquire(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Result<bool, RepositoryError> {
        let mut leases = self.leases.write().await;
        match leases.get(key) {
            Some((_, expires_at)) if *expires_at > now => Ok(false),
            _ => {
                leases.insert(key.to_string(), (holder.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, holder: &str) -> Result<(), RepositoryError> {
        let mut leases = self.leases.write().await;
        if leases.get(key).is_some_and(|(current, _)| current == holder) {
            leases.remove(key);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAutomationLogRepository {
    logs: RwLock<Vec<AutomationLog>>,
}

impl InMemoryAutomationLogRepository {
    pub async fn all(&self) -> Vec<AutomationLog> {
        self.logs.read().await.clone()
    }
}

#[async_trait::async_trait]
impl AutomationLogRepository for InMemoryAutomationLogRepository {
    async fn append(&self, log: AutomationLog) -> Result<(), RepositoryError> {
        self.logs.write().await.push(log);
        Ok(())
    }

    async fn list_for_business(
        &self,
        business_id: &BusinessId,
        limit: u32,
    ) -> Result<Vec<AutomationLog>, RepositoryError> {
        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .rev()
            .filter(|log| log.business_id == *business_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryTemplateRepository {
    templates: RwLock<HashMap<(String, String), String>>,
}

#[async_trait::async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn find(
        &self,
        business_id: &BusinessId,
        template_key: &str,
    ) -> Result<Option<String>, RepositoryError> {
        let templates = self.templates.read().await;
        Ok(templates.get(&(business_id.0.clone(), template_key.to_string())).cloned())
    }

    async fn save(
        &self,
        business_id: &BusinessId,
        template_key: &str,
        body: &str,
        _now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut templates = self.templates.write().await;
        templates.insert((business_id.0.clone(), template_key.to_string()), body.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use vendabot_core::domain::account::BusinessId;
    use vendabot_core::domain::session::NotificationType;

    use super::{InMemoryLeaseRepository, InMemorySessionRepository};
    use crate::repositories::{LeaseRepository, SessionRepository};

    #[tokio::test]
    async fn session_ledger_survives_saves() {
        let repo = InMemorySessionRepository::default();
        let business = BusinessId("biz-1".to_string());
        let now = Utc::now();

        let session = repo.get_or_create(&business, "5511", now).await.expect("create");
        assert!(repo
            .record_notification(&session.id, NotificationType::PaymentReminder, now)
            .await
            .expect("record"));
        repo.save(session.clone()).await.expect("save stale copy");

        let stored = repo.find_open(&business, "5511").await.expect("find").expect("present");
        assert!(stored.was_notification_sent(NotificationType::PaymentReminder));
    }

    #[tokio::test]
    async fn lease_release_requires_holder() {
        let repo = InMemoryLeaseRepository::default();
        let now = Utc::now();
        assert!(repo.try_acquire("k", "a", now, Duration::seconds(30)).await.expect("acquire"));
        repo.release("k", "b").await.expect("release");
        assert!(!repo.try_acquire("k", "b", now, Duration::seconds(30)).await.expect("acquire"));
    }
}

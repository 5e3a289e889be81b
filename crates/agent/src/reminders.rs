use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tera::Context;
use tracing::{info, warn};

use vendabot_core::config::AutomationConfig;
use vendabot_core::domain::account::BusinessAccount;
use vendabot_core::domain::order::OrderStatus;
use vendabot_core::domain::session::{CustomerSession, NotificationType, SessionStatus};
use vendabot_db::repositories::{AccountRepository, OrderRepository};
use vendabot_whatsapp::MessageTransport;

use crate::orchestrator::OrchestratorError;
use crate::session::{SessionError, SessionManager};
use crate::templates::{format_brl, CannedTemplates, TemplateKey};

const SWEEP_BATCH: u32 = 100;
/// Free-form messages are only accepted this long after the customer last
/// wrote; later reminders go out as pre-approved templates.
const SERVICE_WINDOW_HOURS: i64 = 24;
const TEMPLATE_LANGUAGE: &str = "pt_BR";

/// A rendered reminder plus the positional parameters of its template form.
struct Reminder {
    body: String,
    parameters: Vec<String>,
}

/// Counts for one sweep. `failed` sessions were examined but not notified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: u32,
    pub sent: u32,
    pub expired: u32,
    pub failed: u32,
}

impl SweepReport {
    fn merge(self, other: Self) -> Self {
        Self {
            examined: self.examined + other.examined,
            sent: self.sent + other.sent,
            expired: self.expired + other.expired,
            failed: self.failed + other.failed,
        }
    }
}

/// Proactive follow-ups for idle carts and unpaid orders. Each notification
/// type goes out at most once per session, recorded in the ledger before
/// the send.
pub struct ReminderService {
    sessions: SessionManager,
    accounts: Arc<dyn AccountRepository>,
    orders: Arc<dyn OrderRepository>,
    transport: Arc<dyn MessageTransport>,
    templates: CannedTemplates,
    config: AutomationConfig,
}

impl ReminderService {
    pub fn new(
        sessions: SessionManager,
        accounts: Arc<dyn AccountRepository>,
        orders: Arc<dyn OrderRepository>,
        transport: Arc<dyn MessageTransport>,
        templates: CannedTemplates,
        config: AutomationConfig,
    ) -> Self {
        Self { sessions, accounts, orders, transport, templates, config }
    }

    /// Expiry first, so a stale session never gets a reminder.
    pub async fn run_all(&self, now: DateTime<Utc>) -> Result<SweepReport, OrchestratorError> {
        let expired = self.expire_stale(now).await?;
        let carts = self.sweep_abandoned_carts(now).await?;
        let payments = self.sweep_payment_reminders(now).await?;
        Ok(expired.merge(carts).merge(payments))
    }

    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<SweepReport, OrchestratorError> {
        let expired = self.sessions.expire_stale(now).await?;
        Ok(SweepReport { expired, ..SweepReport::default() })
    }

    pub async fn sweep_abandoned_carts(&self, now: DateTime<Utc>) -> Result<SweepReport, OrchestratorError> {
        let idle_since = now - Duration::minutes(i64::from(self.config.abandoned_cart_minutes));
        let candidates = self
            .sessions
            .awaiting_notification(
                &[SessionStatus::CartCreated, SessionStatus::CartAbandoned],
                NotificationType::AbandonedCart,
                idle_since,
                SWEEP_BATCH,
            )
            .await?;

        let mut report = SweepReport::default();
        for session in candidates {
            report.examined += 1;
            let last_seen = session.last_activity_at;
            let session = if session.status == SessionStatus::CartCreated {
                self.sessions.save(session.mark_abandoned(now).map_err(SessionError::from)?).await?
            } else {
                session
            };
            match self.notify(session, NotificationType::AbandonedCart, last_seen, now).await {
                Ok(true) => report.sent += 1,
                Ok(false) => {}
                Err(error) => {
                    report.failed += 1;
                    warn!(event_name = "automation.reminder.failed", kind = "abandoned_cart", error = %error, "reminder failed");
                }
            }
        }
        log_report("abandoned_cart", report);
        Ok(report)
    }

    pub async fn sweep_payment_reminders(&self, now: DateTime<Utc>) -> Result<SweepReport, OrchestratorError> {
        let idle_since = now - Duration::minutes(i64::from(self.config.payment_reminder_minutes));
        let candidates = self
            .sessions
            .awaiting_notification(
                &[SessionStatus::PaymentPending],
                NotificationType::PaymentReminder,
                idle_since,
                SWEEP_BATCH,
            )
            .await?;

        let mut report = SweepReport::default();
        for session in candidates {
            report.examined += 1;
            let last_seen = session.last_activity_at;
            match self.notify(session, NotificationType::PaymentReminder, last_seen, now).await {
                Ok(true) => report.sent += 1,
                Ok(false) => {}
                Err(error) => {
                    report.failed += 1;
                    warn!(event_name = "automation.reminder.failed", kind = "payment_reminder", error = %error, "reminder failed");
                }
            }
        }
        log_report("payment_reminder", report);
        Ok(report)
    }

    /// Returns false when there is nothing to send or the ledger already has
    /// this notification. `last_seen` is the session activity before this
    /// sweep touched it.
    async fn notify(
        &self,
        mut session: CustomerSession,
        notification: NotificationType,
        last_seen: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, OrchestratorError> {
        let Some(account) = self.accounts.find_by_id(&session.business_id).await?.filter(|account| account.active)
        else {
            return Ok(false);
        };
        let Some(reminder) = self.render(&account, &session, notification).await? else {
            return Ok(false);
        };
        if !self.sessions.notify_once(&mut session, notification, now).await? {
            return Ok(false);
        }

        let templated = now - last_seen >= Duration::hours(SERVICE_WINDOW_HOURS);
        if templated {
            self.transport
                .send_template(
                    &account.phone_number_id,
                    &session.phone_number,
                    &template_name(notification),
                    TEMPLATE_LANGUAGE,
                    &reminder.parameters,
                )
                .await?;
        } else {
            self.transport.send_text(&account.phone_number_id, &session.phone_number, &reminder.body).await?;
        }
        info!(
            event_name = "automation.reminder.sent",
            business_id = %account.id.0,
            session_id = %session.id.0,
            kind = notification.as_str(),
            templated,
            "reminder sent"
        );
        Ok(true)
    }

    async fn render(
        &self,
        account: &BusinessAccount,
        session: &CustomerSession,
        notification: NotificationType,
    ) -> Result<Option<Reminder>, OrchestratorError> {
        let mut context = Context::new();
        let (key, parameters) = match notification {
            NotificationType::AbandonedCart => {
                if session.cart.is_empty() {
                    return Ok(None);
                }
                let summary = cart_summary(session);
                context.insert("cart_summary", &summary);
                context.insert("cart_total", &session.cart_total);
                (TemplateKey::AbandonedCart, vec![summary, format_brl(session.cart_total)])
            }
            NotificationType::PaymentReminder => {
                let order = match session.order_id.as_ref() {
                    Some(order_id) => self.orders.find_by_id(order_id).await?,
                    None => None,
                };
                let Some(order) = order.filter(|order| order.status == OrderStatus::PendingPayment) else {
                    return Ok(None);
                };
                let Some(code) = order.payment_code.clone().or_else(|| session.payment_code.clone()) else {
                    return Ok(None);
                };
                context.insert("order_number", &order.order_number);
                context.insert("total", &order.total);
                context.insert("payment_code", &code);
                (
                    TemplateKey::PaymentReminder,
                    vec![order.order_number.clone(), format_brl(order.total), code],
                )
            }
        };
        let body = self.templates.render(account, key, context).await?;
        Ok(Some(Reminder { body, parameters }))
    }
}

fn template_name(notification: NotificationType) -> String {
    format!("vendabot_{}", notification.as_str())
}

fn cart_summary(session: &CustomerSession) -> String {
    session
        .cart
        .iter()
        .map(|item| format!("{}x {}", item.quantity, item.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn log_report(kind: &'static str, report: SweepReport) {
    if report.examined > 0 {
        info!(
            event_name = "automation.reminder.sweep_completed",
            kind,
            examined = report.examined,
            sent = report.sent,
            failed = report.failed,
            "reminder sweep completed"
        );
    }
}

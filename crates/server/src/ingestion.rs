use std::sync::Arc;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vendabot_core::domain::account::BusinessAccount;
use vendabot_core::domain::webhook_event::{WebhookEvent, WebhookEventId};
use vendabot_db::repositories::{AccountRepository, RepositoryError, WebhookEventRepository};
use vendabot_whatsapp::payload;
use vendabot_whatsapp::signature;
use vendabot_whatsapp::{PayloadError, SignatureError, SubEvent};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Per-delivery counts. Persistence failures are logged, not returned, so the
/// provider still gets its acknowledgement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub accepted: Vec<WebhookEventId>,
    pub duplicates: u32,
    pub failed: u32,
}

pub struct IngestionService {
    accounts: Arc<dyn AccountRepository>,
    events: Arc<dyn WebhookEventRepository>,
    app_secret: SecretString,
    queue: mpsc::Sender<WebhookEventId>,
}

impl IngestionService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        events: Arc<dyn WebhookEventRepository>,
        app_secret: SecretString,
        queue: mpsc::Sender<WebhookEventId>,
    ) -> Self {
        Self { accounts, events, app_secret, queue }
    }

    /// Verifies, splits and stores one delivery. A bad signature is rejected
    /// before anything is parsed or written.
    pub async fn ingest(
        &self,
        body: &[u8],
        signature_header: Option<&str>,
    ) -> Result<IngestReport, IngestError> {
        signature::verify(self.app_secret.expose_secret().as_bytes(), signature_header, body)?;
        let delivery = payload::parse(body)?;

        let mut report = IngestReport::default();
        for sub_event in delivery.split() {
            let external_event_id = sub_event.external_event_id();
            match self.store(&sub_event, &external_event_id).await {
                Ok(Some(id)) => {
                    self.enqueue(&id);
                    report.accepted.push(id);
                }
                Ok(None) => {
                    report.duplicates += 1;
                    info!(
                        event_name = "ingress.webhook.duplicate",
                        external_event_id = %external_event_id,
                        kind = sub_event.kind.as_str(),
                        "duplicate sub-event skipped"
                    );
                }
                Err(error) => {
                    report.failed += 1;
                    warn!(
                        event_name = "ingress.webhook.persist_failed",
                        external_event_id = %external_event_id,
                        kind = sub_event.kind.as_str(),
                        error = %error,
                        "sub-event could not be stored"
                    );
                }
            }
        }
        Ok(report)
    }

    async fn store(
        &self,
        sub_event: &SubEvent,
        external_event_id: &str,
    ) -> Result<Option<WebhookEventId>, RepositoryError> {
        if self.events.find_by_external_id(external_event_id).await?.is_some() {
            return Ok(None);
        }
        let account = self.resolve_account(sub_event).await?;
        let event = WebhookEvent::new(
            external_event_id,
            sub_event.kind,
            account.map(|account| account.id),
            sub_event.phone_number_id.clone(),
            sub_event.provider_message_id.clone(),
            sub_event.payload.clone(),
            Utc::now(),
        );
        let id = event.id.clone();
        if !self.events.insert_if_absent(event).await? {
            return Ok(None);
        }
        info!(
            event_name = "ingress.webhook.accepted",
            event_id = %id.0,
            external_event_id = %external_event_id,
            kind = sub_event.kind.as_str(),
            "sub-event stored"
        );
        Ok(Some(id))
    }

    /// Looks the business up by phone number id, then display number, then
    /// workspace id. A fallback hit means the provider ids changed, so the
    /// stored account is updated to match.
    async fn resolve_account(
        &self,
        sub_event: &SubEvent,
    ) -> Result<Option<BusinessAccount>, RepositoryError> {
        if !sub_event.phone_number_id.is_empty() {
            if let Some(account) =
                self.accounts.find_by_phone_number_id(&sub_event.phone_number_id).await?
            {
                return Ok(Some(account));
            }
        }

        let mut fallback = None;
        if let Some(display) = sub_event.display_phone_number.as_deref().filter(|value| !value.is_empty()) {
            fallback = self.accounts.find_by_display_number(display).await?;
        }
        if fallback.is_none() && !sub_event.workspace_id.is_empty() {
            fallback = self.accounts.find_by_workspace_id(&sub_event.workspace_id).await?;
        }
        let Some(mut account) = fallback else {
            warn!(
                event_name = "ingress.webhook.account_unresolved",
                phone_number_id = %sub_event.phone_number_id,
                "no business account for sub-event"
            );
            return Ok(None);
        };

        let mut healed = false;
        if !sub_event.phone_number_id.is_empty() && account.phone_number_id != sub_event.phone_number_id {
            account.phone_number_id = sub_event.phone_number_id.clone();
            healed = true;
        }
        if !sub_event.workspace_id.is_empty()
            && account.workspace_id.as_deref() != Some(sub_event.workspace_id.as_str())
        {
            account.workspace_id = Some(sub_event.workspace_id.clone());
            healed = true;
        }
        if healed {
            account.updated_at = Utc::now();
            self.accounts.save(account.clone()).await?;
            info!(
                event_name = "ingress.account.healed",
                business_id = %account.id.0,
                phone_number_id = %account.phone_number_id,
                "business account identifiers updated"
            );
        }
        Ok(Some(account))
    }

    /// The worker poller picks up anything that does not fit in the queue.
    fn enqueue(&self, id: &WebhookEventId) {
        if let Err(error) = self.queue.try_send(id.clone()) {
            warn!(
                event_name = "ingress.webhook.enqueue_deferred",
                event_id = %id.0,
                error = %error,
                "queue unavailable, event left for polling"
            );
        }
    }
}

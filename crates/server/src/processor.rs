use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use vendabot_agent::{AutomationOrchestrator, InboundContext, OrchestratorError};
use vendabot_core::dispatch::{EventProcessingEngine, RetryPolicy};
use vendabot_core::domain::account::BusinessAccount;
use vendabot_core::domain::message::{Message, MessageId, StatusUpdate};
use vendabot_core::domain::webhook_event::{EventKind, ProcessingStatus, WebhookEvent, WebhookEventId};
use vendabot_core::errors::DomainError;
use vendabot_db::repositories::{
    AccountRepository, MessageRepository, RepositoryError, WebhookEventRepository,
};
use vendabot_whatsapp::payload::describe_error;
use vendabot_whatsapp::{InboundMessage, StatusReport};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    Transient,
    Permanent,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("could not decode {kind} payload")]
    Decode { kind: &'static str },
    #[error("no business account for phone number id `{0}`")]
    AccountNotFound(String),
}

impl ProcessError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Repository(_) => FailureClass::Transient,
            Self::Orchestrator(error) if error.is_retryable() => FailureClass::Transient,
            Self::Orchestrator(_) | Self::Domain(_) | Self::Decode { .. } | Self::AccountNotFound(_) => {
                FailureClass::Permanent
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed,
    Duplicate,
    /// Already settled, not yet due, or owned by another worker.
    Skipped,
    RetryScheduled,
    Failed,
}

enum Handled {
    Done(Option<MessageId>),
    Duplicate,
}

pub struct EventProcessor {
    events: Arc<dyn WebhookEventRepository>,
    accounts: Arc<dyn AccountRepository>,
    messages: Arc<dyn MessageRepository>,
    orchestrator: Arc<AutomationOrchestrator>,
    engine: EventProcessingEngine,
}

impl EventProcessor {
    pub fn new(
        events: Arc<dyn WebhookEventRepository>,
        accounts: Arc<dyn AccountRepository>,
        messages: Arc<dyn MessageRepository>,
        orchestrator: Arc<AutomationOrchestrator>,
        engine: EventProcessingEngine,
    ) -> Self {
        Self { events, accounts, messages, orchestrator, engine }
    }

    pub fn engine(&self) -> &EventProcessingEngine {
        &self.engine
    }

    /// Claims and settles one event. Only failures to record the settlement
    /// are returned; processing failures become retry or failed states.
    pub async fn process(
        &self,
        id: &WebhookEventId,
        worker_id: &str,
    ) -> Result<ProcessOutcome, RepositoryError> {
        let Some(stored) = self.events.find_by_id(id).await? else {
            warn!(event_name = "worker.event.missing", event_id = %id.0, "queued event not found");
            return Ok(ProcessOutcome::Skipped);
        };
        if stored.status.is_settled() {
            return Ok(ProcessOutcome::Skipped);
        }

        let now = Utc::now();
        let claimed = match self.engine.claim(stored.clone(), worker_id, now) {
            Ok(result) => result.event,
            Err(error) => {
                debug!(event_name = "worker.event.not_claimable", event_id = %id.0, reason = %error, "event skipped");
                return Ok(ProcessOutcome::Skipped);
            }
        };
        if !self.events.compare_and_swap(&stored, &claimed).await? {
            return Ok(ProcessOutcome::Skipped);
        }

        let mut current = claimed;
        let result = self.handle(&mut current, now).await;
        let finished_at = Utc::now();

        let (next, outcome) = match result {
            Ok(Handled::Done(message_id)) => match self.engine.complete(current.clone(), message_id, finished_at) {
                Ok(done) => (done.event, ProcessOutcome::Completed),
                Err(_) => return Ok(ProcessOutcome::Skipped),
            },
            Ok(Handled::Duplicate) => match self.engine.mark_duplicate(current.clone(), finished_at) {
                Ok(done) => (done.event, ProcessOutcome::Duplicate),
                Err(_) => return Ok(ProcessOutcome::Skipped),
            },
            Err(error) => {
                let policy = match error.class() {
                    FailureClass::Transient => RetryPolicy::Retry,
                    FailureClass::Permanent => RetryPolicy::FailTerminal,
                };
                match self.engine.fail(current.clone(), error.to_string(), policy, finished_at) {
                    Ok(failed) => {
                        let outcome = if failed.event.status == ProcessingStatus::Failed {
                            ProcessOutcome::Failed
                        } else {
                            ProcessOutcome::RetryScheduled
                        };
                        warn!(
                            event_name = "worker.event.failed_attempt",
                            event_id = %id.0,
                            retry_count = failed.event.retry_count,
                            terminal = outcome == ProcessOutcome::Failed,
                            error = %error,
                            "event processing failed"
                        );
                        (failed.event, outcome)
                    }
                    Err(_) => return Ok(ProcessOutcome::Skipped),
                }
            }
        };

        if !self.events.compare_and_swap(&current, &next).await? {
            warn!(event_name = "worker.event.settle_lost", event_id = %id.0, "event changed while processing");
            return Ok(ProcessOutcome::Skipped);
        }
        info!(
            event_name = "worker.event.settled",
            event_id = %id.0,
            kind = next.kind.as_str(),
            status = next.status.as_str(),
            "event settled"
        );
        Ok(outcome)
    }

    async fn handle(&self, event: &mut WebhookEvent, now: DateTime<Utc>) -> Result<Handled, ProcessError> {
        match event.kind {
            EventKind::Message => self.handle_message(event, now).await,
            EventKind::Status => self.handle_status(event, now).await,
            EventKind::Error => {
                let detail = event.payload.get("error").map(describe_error).unwrap_or_default();
                warn!(
                    event_name = "worker.provider.error",
                    event_id = %event.id.0,
                    phone_number_id = %event.phone_number_id,
                    error = %detail,
                    "provider reported an error"
                );
                Ok(Handled::Done(None))
            }
        }
    }

    async fn handle_message(&self, event: &mut WebhookEvent, now: DateTime<Utc>) -> Result<Handled, ProcessError> {
        let inbound =
            InboundMessage::from_event_payload(&event.payload).ok_or(ProcessError::Decode { kind: "message" })?;
        let account = self.account_for(event).await?;

        let message = match event.message_id.clone() {
            // A retry of this event: the message row is already ours.
            Some(message_id) => self.messages.find_by_id(&message_id).await?,
            None => None,
        };
        let message = match message {
            Some(message) => message,
            None => {
                let message = Message::inbound(
                    account.id.clone(),
                    inbound.provider_message_id.clone(),
                    inbound.message_type,
                    inbound.from.clone(),
                    if inbound.to.is_empty() { account.display_phone_number.clone() } else { inbound.to.clone() },
                    inbound.text.clone(),
                    Some(inbound.content.clone()),
                    now,
                );
                if !self.messages.insert_if_absent(message.clone()).await? {
                    return Ok(Handled::Duplicate);
                }
                let mut linked = event.clone();
                linked.message_id = Some(message.id.clone());
                if self.events.compare_and_swap(event, &linked).await? {
                    *event = linked;
                }
                message
            }
        };

        if !account.active {
            info!(
                event_name = "worker.message.account_inactive",
                business_id = %account.id.0,
                message_id = %message.id.0,
                "account inactive, no reply"
            );
            return Ok(Handled::Done(Some(message.id)));
        }

        let message_id = message.id.clone();
        self.orchestrator
            .handle(InboundContext { account, message, reply_id: inbound.reply_id })
            .await?;
        Ok(Handled::Done(Some(message_id)))
    }

    async fn handle_status(&self, event: &WebhookEvent, now: DateTime<Utc>) -> Result<Handled, ProcessError> {
        let report =
            StatusReport::from_event_payload(&event.payload).ok_or(ProcessError::Decode { kind: "status" })?;
        let Some(mut message) = self.messages.find_by_provider_id(&report.provider_message_id).await? else {
            debug!(
                event_name = "worker.status.unknown_message",
                provider_message_id = %report.provider_message_id,
                "status for a message we did not send"
            );
            return Ok(Handled::Done(None));
        };

        if message.apply_status(report.status, report.at.unwrap_or(now), report.error)? == StatusUpdate::Applied {
            self.messages.save(message.clone()).await?;
        }
        Ok(Handled::Done(Some(message.id)))
    }

    async fn account_for(&self, event: &WebhookEvent) -> Result<BusinessAccount, ProcessError> {
        let account = match event.business_id.as_ref() {
            Some(business_id) => self.accounts.find_by_id(business_id).await?,
            None => self.accounts.find_by_phone_number_id(&event.phone_number_id).await?,
        };
        account.ok_or_else(|| ProcessError::AccountNotFound(event.phone_number_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use vendabot_agent::OrchestratorError;
    use vendabot_db::repositories::RepositoryError;
    use vendabot_whatsapp::TransportError;

    use super::{FailureClass, ProcessError};

    #[test]
    fn failures_are_classified_for_retry() {
        let busy = ProcessError::Orchestrator(OrchestratorError::Transport(TransportError::Timeout("10s".into())));
        assert_eq!(busy.class(), FailureClass::Transient);

        let bad_recipient = ProcessError::Orchestrator(OrchestratorError::Transport(TransportError::NonRetryable {
            status: Some(400),
            code: Some(131026),
            message: "undeliverable".into(),
        }));
        assert_eq!(bad_recipient.class(), FailureClass::Permanent);

        assert_eq!(ProcessError::Repository(RepositoryError::Decode("x".into())).class(), FailureClass::Transient);
        assert_eq!(ProcessError::AccountNotFound("1111".into()).class(), FailureClass::Permanent);
        assert_eq!(ProcessError::Decode { kind: "message" }.class(), FailureClass::Permanent);
    }
}

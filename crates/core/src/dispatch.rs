//! Deterministic webhook event processing engine
//!
//! Pure state-machine logic for claiming, settling, retrying and recovering
//! webhook events. Persistence applies the returned values; nothing here
//! performs I/O.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::config::WorkerConfig;
use crate::domain::message::MessageId;
use crate::domain::webhook_event::{ProcessingStatus, WebhookEvent, WebhookEventId};

/// Configuration for the processing engine
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Total processing attempts before an event is marked failed
    pub max_attempts: u32,
    /// Base delay in seconds before the first retry
    pub retry_base_delay_seconds: i64,
    /// Backoff multiplier between consecutive retries
    pub retry_backoff_multiplier: u32,
    /// How long before a processing claim is considered stale
    pub claim_timeout_seconds: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay_seconds: 5,
            retry_backoff_multiplier: 2,
            claim_timeout_seconds: 300,
        }
    }
}

impl From<&WorkerConfig> for DispatchConfig {
    fn from(worker: &WorkerConfig) -> Self {
        Self {
            max_attempts: worker.max_attempts.max(1),
            retry_base_delay_seconds: i64::try_from(worker.retry_base_delay_secs).unwrap_or(i64::MAX),
            retry_backoff_multiplier: worker.retry_backoff_multiplier.max(1),
            claim_timeout_seconds: i64::try_from(worker.claim_timeout_secs).unwrap_or(i64::MAX),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid event transition from {from:?} to {to:?}: {reason}")]
    InvalidTransition { from: ProcessingStatus, to: ProcessingStatus, reason: String },
    #[error("event {0:?} already settled")]
    AlreadySettled(WebhookEventId),
    #[error("event {0:?} already claimed by {1}")]
    ClaimConflict(WebhookEventId, String),
    #[error("event {0:?} not yet available")]
    NotYetAvailable(WebhookEventId),
}

/// Policy for handling failures
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry with exponential backoff until attempts run out
    Retry,
    /// Mark failed immediately
    FailTerminal,
}

/// Audit record of one status change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventTransition {
    pub event_id: WebhookEventId,
    pub from: ProcessingStatus,
    pub to: ProcessingStatus,
    pub reason: &'static str,
    pub retry_count: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransitionResult {
    pub event: WebhookEvent,
    pub transition: EventTransition,
}

#[derive(Clone, Debug, Default)]
pub struct EventProcessingEngine {
    config: DispatchConfig,
}

impl EventProcessingEngine {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Claim an event for processing
    ///
    /// Pending events are claimable once their backoff has elapsed; a
    /// processing claim older than the claim timeout may be stolen.
    pub fn claim(
        &self,
        mut event: WebhookEvent,
        worker_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, DispatchError> {
        match event.status {
            ProcessingStatus::Pending => {
                if now < event.available_at {
                    return Err(DispatchError::NotYetAvailable(event.id));
                }
            }
            ProcessingStatus::Processing => {
                if !self.is_stale(&event, now) {
                    return Err(DispatchError::ClaimConflict(
                        event.id.clone(),
                        event.claimed_by.clone().unwrap_or_default(),
                    ));
                }
            }
            ProcessingStatus::Completed | ProcessingStatus::Duplicate => {
                return Err(DispatchError::AlreadySettled(event.id));
            }
            ProcessingStatus::Failed => {
                return Err(DispatchError::InvalidTransition {
                    from: ProcessingStatus::Failed,
                    to: ProcessingStatus::Processing,
                    reason: "failed events must be requeued first".to_string(),
                });
            }
        }

        let from = event.status;
        event.status = ProcessingStatus::Processing;
        event.claimed_by = Some(worker_id.into());
        event.claimed_at = Some(now);
        event.updated_at = now;
        Ok(self.result(event, from, "event_claimed", now))
    }

    /// Processing -> Completed, linking the message the event produced.
    pub fn complete(
        &self,
        mut event: WebhookEvent,
        message_id: Option<MessageId>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, DispatchError> {
        self.validate(&event, ProcessingStatus::Completed)?;
        let from = event.status;
        event.status = ProcessingStatus::Completed;
        if message_id.is_some() {
            event.message_id = message_id;
        }
        event.last_error = None;
        release(&mut event, now);
        Ok(self.result(event, from, "event_completed", now))
    }

    /// Processing -> Duplicate, for events whose content was already handled.
    pub fn mark_duplicate(
        &self,
        mut event: WebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, DispatchError> {
        self.validate(&event, ProcessingStatus::Duplicate)?;
        let from = event.status;
        event.status = ProcessingStatus::Duplicate;
        release(&mut event, now);
        Ok(self.result(event, from, "event_duplicate", now))
    }

    /// Record a failed attempt
    ///
    /// Retryable failures go back to pending with exponential backoff until
    /// `max_attempts` is reached; the event then fails with its last error.
    pub fn fail(
        &self,
        mut event: WebhookEvent,
        error: impl Into<String>,
        policy: RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, DispatchError> {
        self.validate(&event, ProcessingStatus::Failed)?;
        let from = event.status;
        event.retry_count += 1;
        event.last_error = Some(error.into());
        release(&mut event, now);

        let retry = policy == RetryPolicy::Retry && event.retry_count < self.config.max_attempts;
        if retry {
            event.status = ProcessingStatus::Pending;
            event.available_at = now + self.backoff(event.retry_count);
            Ok(self.result(event, from, "event_retry_scheduled", now))
        } else {
            event.status = ProcessingStatus::Failed;
            Ok(self.result(event, from, "event_failed", now))
        }
    }

    /// Failed -> Pending with a fresh attempt budget.
    pub fn requeue(
        &self,
        mut event: WebhookEvent,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult, DispatchError> {
        self.validate(&event, ProcessingStatus::Pending)?;
        if event.status != ProcessingStatus::Failed {
            return Err(DispatchError::InvalidTransition {
                from: event.status,
                to: ProcessingStatus::Pending,
                reason: "only failed events can be requeued".to_string(),
            });
        }
        let from = event.status;
        event.status = ProcessingStatus::Pending;
        event.retry_count = 0;
        event.available_at = now;
        event.updated_at = now;
        Ok(self.result(event, from, "event_requeued", now))
    }

    /// Return stale processing claims to pending without spending an attempt.
    pub fn recover_stale(
        &self,
        events: Vec<WebhookEvent>,
        now: DateTime<Utc>,
    ) -> Vec<TransitionResult> {
        events
            .into_iter()
            .filter(|event| event.status == ProcessingStatus::Processing && self.is_stale(event, now))
            .map(|mut event| {
                let from = event.status;
                event.status = ProcessingStatus::Pending;
                event.available_at = now;
                release(&mut event, now);
                self.result(event, from, "event_claim_recovered", now)
            })
            .collect()
    }

    /// Delay before attempt `retry_count + 1`: base * multiplier^(retry_count - 1).
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1);
        let factor = i64::from(self.config.retry_backoff_multiplier.saturating_pow(exponent));
        Duration::seconds(self.config.retry_base_delay_seconds.saturating_mul(factor))
    }

    pub fn is_stale(&self, event: &WebhookEvent, now: DateTime<Utc>) -> bool {
        event.claimed_at.map_or(true, |claimed_at| {
            claimed_at + Duration::seconds(self.config.claim_timeout_seconds) <= now
        })
    }

    fn validate(&self, event: &WebhookEvent, to: ProcessingStatus) -> Result<(), DispatchError> {
        if event.status.can_transition_to(to) {
            return Ok(());
        }
        if event.status.is_settled() {
            return Err(DispatchError::AlreadySettled(event.id.clone()));
        }
        Err(DispatchError::InvalidTransition {
            from: event.status,
            to,
            reason: format!("cannot transition from {:?} to {:?}", event.status, to),
        })
    }

    fn result(
        &self,
        event: WebhookEvent,
        from: ProcessingStatus,
        reason: &'static str,
        now: DateTime<Utc>,
    ) -> TransitionResult {
        let transition = EventTransition {
            event_id: event.id.clone(),
            from,
            to: event.status,
            reason,
            retry_count: event.retry_count,
            occurred_at: now,
        };
        TransitionResult { event, transition }
    }
}

fn release(event: &mut WebhookEvent, now: DateTime<Utc>) {
    event.claimed_by = None;
    event.claimed_at = None;
    event.updated_at = now;
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{DispatchError, EventProcessingEngine, RetryPolicy};
    use crate::domain::message::MessageId;
    use crate::domain::webhook_event::{EventKind, ProcessingStatus, WebhookEvent};

    fn event() -> WebhookEvent {
        WebhookEvent::new(
            "evt_1",
            EventKind::Message,
            None,
            "1111",
            Some("wamid.1".to_string()),
            serde_json::json!({}),
            Utc::now() - Duration::seconds(1),
        )
    }

    #[test]
    fn claim_then_complete_links_message() {
        let engine = EventProcessingEngine::new();
        let now = Utc::now();
        let claimed = engine.claim(event(), "worker-1", now).expect("claim");
        assert_eq!(claimed.event.status, ProcessingStatus::Processing);
        assert_eq!(claimed.event.claimed_by.as_deref(), Some("worker-1"));

        let done = engine
            .complete(claimed.event, Some(MessageId("m-1".to_string())), now)
            .expect("complete");
        assert_eq!(done.event.status, ProcessingStatus::Completed);
        assert_eq!(done.event.message_id, Some(MessageId("m-1".to_string())));
        assert!(done.event.claimed_by.is_none());
        assert_eq!(done.transition.reason, "event_completed");
    }

    #[test]
    fn retryable_failures_back_off_then_fail_after_max_attempts() {
        let engine = EventProcessingEngine::new();
        let mut now = Utc::now();
        let mut current = event();
        let mut delays = Vec::new();

        for _ in 0..2 {
            let claimed = engine.claim(current, "worker-1", now).expect("claim");
            let failed =
                engine.fail(claimed.event, "timeout", RetryPolicy::Retry, now).expect("fail");
            assert_eq!(failed.event.status, ProcessingStatus::Pending);
            delays.push(failed.event.available_at - now);
            now = failed.event.available_at;
            current = failed.event;
        }
        assert_eq!(delays, vec![Duration::seconds(5), Duration::seconds(10)]);

        let claimed = engine.claim(current, "worker-1", now).expect("claim");
        let failed = engine.fail(claimed.event, "timeout", RetryPolicy::Retry, now).expect("fail");
        assert_eq!(failed.event.status, ProcessingStatus::Failed);
        assert_eq!(failed.event.retry_count, 3);
        assert_eq!(failed.event.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn backoff_blocks_early_claims() {
        let engine = EventProcessingEngine::new();
        let now = Utc::now();
        let claimed = engine.claim(event(), "worker-1", now).expect("claim");
        let retried = engine.fail(claimed.event, "5xx", RetryPolicy::Retry, now).expect("fail");

        assert!(matches!(
            engine.claim(retried.event, "worker-2", now),
            Err(DispatchError::NotYetAvailable(_))
        ));
    }

    #[test]
    fn terminal_policy_fails_immediately() {
        let engine = EventProcessingEngine::new();
        let now = Utc::now();
        let claimed = engine.claim(event(), "worker-1", now).expect("claim");
        let failed = engine
            .fail(claimed.event, "invalid recipient", RetryPolicy::FailTerminal, now)
            .expect("fail");
        assert_eq!(failed.event.status, ProcessingStatus::Failed);
        assert_eq!(failed.event.retry_count, 1);
    }

    #[test]
    fn settled_events_cannot_be_claimed_again() {
        let engine = EventProcessingEngine::new();
        let now = Utc::now();
        let claimed = engine.claim(event(), "worker-1", now).expect("claim");
        let duplicate = engine.mark_duplicate(claimed.event, now).expect("duplicate");

        assert!(matches!(
            engine.claim(duplicate.event, "worker-2", now),
            Err(DispatchError::AlreadySettled(_))
        ));
    }

    #[test]
    fn live_claims_conflict_but_stale_claims_are_recovered() {
        let engine = EventProcessingEngine::new();
        let now = Utc::now();
        let claimed = engine.claim(event(), "worker-1", now).expect("claim").event;

        assert!(matches!(
            engine.claim(claimed.clone(), "worker-2", now),
            Err(DispatchError::ClaimConflict(_, ref owner)) if owner == "worker-1"
        ));

        let later = now + Duration::seconds(301);
        let recovered = engine.recover_stale(vec![claimed.clone()], later);
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].event.status, ProcessingStatus::Pending);
        assert_eq!(recovered[0].event.retry_count, 0);
        assert!(engine.recover_stale(vec![claimed], now).is_empty());
    }

    #[test]
    fn requeue_resets_failed_events_only() {
        let engine = EventProcessingEngine::new();
        let now = Utc::now();
        let claimed = engine.claim(event(), "worker-1", now).expect("claim");
        let failed = engine
            .fail(claimed.event, "bad template", RetryPolicy::FailTerminal, now)
            .expect("fail");

        let requeued = engine.requeue(failed.event, now).expect("requeue");
        assert_eq!(requeued.event.status, ProcessingStatus::Pending);
        assert_eq!(requeued.event.retry_count, 0);
        assert!(engine.requeue(requeued.event, now).is_err());
    }
}

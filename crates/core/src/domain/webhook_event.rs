use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::account::BusinessId;
use crate::domain::message::MessageId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookEventId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Status,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Status => "status",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "message" => Some(Self::Message),
            "status" => Some(Self::Status),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Duplicate,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "duplicate" => Some(Self::Duplicate),
            _ => None,
        }
    }

    /// Completed and duplicate events are never processed again.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Duplicate)
    }

    /// Forward-only transitions, plus `failed -> pending` for retries and
    /// `processing -> pending` for backoff and stale-claim recovery.
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Pending)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Duplicate)
                | (Self::Failed, Self::Pending)
        )
    }
}

/// Durable record of one logical sub-event from a webhook delivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: WebhookEventId,
    /// Deterministic idempotency key, globally unique.
    pub external_event_id: String,
    pub kind: EventKind,
    pub business_id: Option<BusinessId>,
    pub phone_number_id: String,
    pub provider_message_id: Option<String>,
    pub payload: serde_json::Value,
    pub status: ProcessingStatus,
    pub retry_count: u32,
    pub available_at: DateTime<Utc>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub message_id: Option<MessageId>,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(
        external_event_id: impl Into<String>,
        kind: EventKind,
        business_id: Option<BusinessId>,
        phone_number_id: impl Into<String>,
        provider_message_id: Option<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WebhookEventId(uuid::Uuid::new_v4().to_string()),
            external_event_id: external_event_id.into(),
            kind,
            business_id,
            phone_number_id: phone_number_id.into(),
            provider_message_id,
            payload,
            status: ProcessingStatus::Pending,
            retry_count: 0,
            available_at: now,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            message_id: None,
            received_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EventKind, ProcessingStatus};

    #[test]
    fn kinds_and_statuses_round_trip() {
        for kind in [EventKind::Message, EventKind::Status, EventKind::Error] {
            assert_eq!(EventKind::parse(kind.as_str()), Some(kind));
        }
        for status in [
            ProcessingStatus::Pending,
            ProcessingStatus::Processing,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
            ProcessingStatus::Duplicate,
        ] {
            assert_eq!(ProcessingStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn settled_states_never_reopen() {
        for next in [
            ProcessingStatus::Pending,
            ProcessingStatus::Processing,
            ProcessingStatus::Failed,
        ] {
            assert!(!ProcessingStatus::Completed.can_transition_to(next));
            assert!(!ProcessingStatus::Duplicate.can_transition_to(next));
        }
    }

    #[test]
    fn failed_may_only_return_to_pending() {
        assert!(ProcessingStatus::Failed.can_transition_to(ProcessingStatus::Pending));
        assert!(!ProcessingStatus::Failed.can_transition_to(ProcessingStatus::Completed));
        assert!(!ProcessingStatus::Failed.can_transition_to(ProcessingStatus::Processing));
    }
}

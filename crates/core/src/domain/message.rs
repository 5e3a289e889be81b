use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::account::BusinessId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Interactive,
    Template,
    Image,
    Document,
    Audio,
    Other,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Interactive => "interactive",
            Self::Template => "template",
            Self::Image => "image",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "interactive" | "button" => Some(Self::Interactive),
            "template" => Some(Self::Template),
            "image" => Some(Self::Image),
            "document" => Some(Self::Document),
            "audio" | "voice" => Some(Self::Audio),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Self::Image | Self::Document | Self::Audio)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Inbound messages are stored as received and never move.
    Received,
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "received" => Some(Self::Received),
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Received | Self::Pending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Failed => 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusUpdate {
    Applied,
    Ignored,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub business_id: BusinessId,
    pub provider_message_id: Option<String>,
    pub direction: Direction,
    pub message_type: MessageType,
    pub status: DeliveryStatus,
    pub from_address: String,
    pub to_address: String,
    pub body: Option<String>,
    pub content: Option<serde_json::Value>,
    pub error: Option<String>,
    pub reply_claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    #[allow(clippy::too_many_arguments)]
    pub fn inbound(
        business_id: BusinessId,
        provider_message_id: impl Into<String>,
        message_type: MessageType,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        body: Option<String>,
        content: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId(uuid::Uuid::new_v4().to_string()),
            business_id,
            provider_message_id: Some(provider_message_id.into()),
            direction: Direction::Inbound,
            message_type,
            status: DeliveryStatus::Received,
            from_address: from_address.into(),
            to_address: to_address.into(),
            body,
            content,
            error: None,
            reply_claimed_at: None,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn outbound(
        business_id: BusinessId,
        message_type: MessageType,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        body: Option<String>,
        content: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId(uuid::Uuid::new_v4().to_string()),
            business_id,
            provider_message_id: None,
            direction: Direction::Outbound,
            message_type,
            status: DeliveryStatus::Pending,
            from_address: from_address.into(),
            to_address: to_address.into(),
            body,
            content,
            error: None,
            reply_claimed_at: None,
            sent_at: None,
            delivered_at: None,
            read_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a provider status report without ever moving backwards.
    ///
    /// A later milestone fills any skipped earlier milestone timestamps, so a
    /// `read` that arrives before `delivered` still records both. `failed` is
    /// accepted from any non-failed state.
    pub fn apply_status(
        &mut self,
        next: DeliveryStatus,
        at: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<StatusUpdate, DomainError> {
        if self.direction == Direction::Inbound {
            return Err(DomainError::InvalidDeliveryStatus { status: next, direction: "inbound" });
        }
        if matches!(next, DeliveryStatus::Received) {
            return Err(DomainError::InvalidDeliveryStatus { status: next, direction: "outbound" });
        }
        if self.status == DeliveryStatus::Failed {
            return Ok(StatusUpdate::Ignored);
        }

        if next == DeliveryStatus::Failed {
            self.status = DeliveryStatus::Failed;
            self.failed_at = Some(at);
            self.error = error;
            self.updated_at = at;
            return Ok(StatusUpdate::Applied);
        }

        if next.rank() <= self.status.rank() {
            return Ok(StatusUpdate::Ignored);
        }

        if next.rank() >= DeliveryStatus::Sent.rank() && self.sent_at.is_none() {
            self.sent_at = Some(at);
        }
        if next.rank() >= DeliveryStatus::Delivered.rank() && self.delivered_at.is_none() {
            self.delivered_at = Some(at);
        }
        if next == DeliveryStatus::Read {
            self.read_at = Some(at);
        }
        self.status = next;
        self.updated_at = at;
        Ok(StatusUpdate::Applied)
    }
}

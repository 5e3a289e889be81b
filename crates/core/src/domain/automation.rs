use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::account::BusinessId;
use crate::domain::intent::Intent;
use crate::domain::message::MessageId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AutomationLogId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Text,
    Interactive,
    Delegated,
    None,
    Error,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Interactive => "interactive",
            Self::Delegated => "delegated",
            Self::None => "none",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "interactive" => Some(Self::Interactive),
            "delegated" => Some(Self::Delegated),
            "none" => Some(Self::None),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Append-only record of one orchestrator decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutomationLog {
    pub id: AutomationLogId,
    pub business_id: BusinessId,
    pub message_id: Option<MessageId>,
    pub phone_number: String,
    pub intent: Option<Intent>,
    pub handler: Option<String>,
    pub response_kind: ResponseKind,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

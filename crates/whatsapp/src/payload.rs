use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use vendabot_core::domain::message::{DeliveryStatus, MessageType};
use vendabot_core::domain::webhook_event::EventKind;
use vendabot_core::idempotency::event_key;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("webhook body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unsupported webhook object `{0}`")]
    UnsupportedObject(String),
}

#[derive(Clone, Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

/// One workspace (WABA) block of a delivery.
#[derive(Clone, Debug, Deserialize)]
pub struct Entry {
    pub id: String,
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub field: String,
    pub value: ChangeValue,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChangeValue {
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub contacts: Vec<Value>,
    #[serde(default)]
    pub messages: Vec<Value>,
    #[serde(default)]
    pub statuses: Vec<Value>,
    #[serde(default)]
    pub errors: Vec<Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub display_phone_number: Option<String>,
    #[serde(default)]
    pub phone_number_id: String,
}

/// One logical unit of work extracted from a delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct SubEvent {
    pub kind: EventKind,
    pub workspace_id: String,
    pub phone_number_id: String,
    pub display_phone_number: Option<String>,
    pub provider_message_id: Option<String>,
    pub status: Option<String>,
    pub timestamp: Option<String>,
    /// Self-contained JSON that the worker later decodes.
    pub payload: Value,
}

impl SubEvent {
    /// Errors carry no message id, so the phone number id and error code key them.
    pub fn external_event_id(&self) -> String {
        match self.kind {
            EventKind::Error => event_key(
                self.kind,
                Some(&self.phone_number_id),
                self.status.as_deref(),
                self.timestamp.as_deref(),
            ),
            _ => event_key(
                self.kind,
                self.provider_message_id.as_deref(),
                self.status.as_deref(),
                self.timestamp.as_deref(),
            ),
        }
    }
}

pub fn parse(body: &[u8]) -> Result<WebhookPayload, PayloadError> {
    let payload: WebhookPayload = serde_json::from_slice(body)?;
    if payload.object != "whatsapp_business_account" {
        return Err(PayloadError::UnsupportedObject(payload.object));
    }
    Ok(payload)
}

impl WebhookPayload {
    /// Flattens every entry and change into message, status and error
    /// sub-events, in delivery order.
    pub fn split(&self) -> Vec<SubEvent> {
        let mut events = Vec::new();
        for entry in &self.entry {
            for change in &entry.changes {
                if !change.field.is_empty() && change.field != "messages" {
                    continue;
                }
                let value = &change.value;
                let (phone_number_id, display) = match &value.metadata {
                    Some(metadata) => {
                        (metadata.phone_number_id.clone(), metadata.display_phone_number.clone())
                    }
                    None => (String::new(), None),
                };
                let metadata = json!({
                    "phone_number_id": phone_number_id,
                    "display_phone_number": display,
                    "workspace_id": entry.id,
                });
                let base = |kind, payload| SubEvent {
                    kind,
                    workspace_id: entry.id.clone(),
                    phone_number_id: phone_number_id.clone(),
                    display_phone_number: display.clone(),
                    provider_message_id: None,
                    status: None,
                    timestamp: None,
                    payload,
                };

                for message in &value.messages {
                    let contact = matching_contact(&value.contacts, message);
                    let mut event = base(
                        EventKind::Message,
                        json!({ "message": message, "contact": contact, "metadata": metadata }),
                    );
                    event.provider_message_id = string_field(message, "id");
                    event.timestamp = string_field(message, "timestamp");
                    events.push(event);
                }

                for status in &value.statuses {
                    let mut event =
                        base(EventKind::Status, json!({ "status": status, "metadata": metadata }));
                    event.provider_message_id = string_field(status, "id");
                    event.status = string_field(status, "status");
                    event.timestamp = string_field(status, "timestamp");
                    events.push(event);
                }

                for error in &value.errors {
                    let mut event =
                        base(EventKind::Error, json!({ "error": error, "metadata": metadata }));
                    event.status = error.get("code").map(|code| code.to_string());
                    event.timestamp = string_field(error, "title");
                    events.push(event);
                }
            }
        }
        events
    }
}

fn matching_contact(contacts: &[Value], message: &Value) -> Value {
    let from = message.get("from").and_then(Value::as_str);
    contacts
        .iter()
        .find(|contact| contact.get("wa_id").and_then(Value::as_str) == from)
        .or_else(|| contacts.first())
        .cloned()
        .unwrap_or(Value::Null)
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn unix_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
    let seconds = value?.parse::<i64>().ok()?;
    Utc.timestamp_opt(seconds, 0).single()
}

/// Decoded view of a stored message sub-event.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub provider_message_id: String,
    pub from: String,
    pub to: String,
    pub contact_name: Option<String>,
    pub message_type: MessageType,
    /// Text body, caption, or the title of a tapped button/list row.
    pub text: Option<String>,
    /// Id of a tapped interactive option.
    pub reply_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub content: Value,
}

impl InboundMessage {
    pub fn from_event_payload(payload: &Value) -> Option<Self> {
        let message = payload.get("message")?;
        let provider_message_id = string_field(message, "id")?;
        let from = string_field(message, "from")?;
        let raw_type = string_field(message, "type").unwrap_or_else(|| "text".to_string());
        let message_type = MessageType::parse(&raw_type).unwrap_or(MessageType::Other);
        let to = payload
            .get("metadata")
            .and_then(|metadata| string_field(metadata, "display_phone_number"))
            .unwrap_or_default();

        let (text, reply_id) = match raw_type.as_str() {
            "text" => (message.get("text").and_then(|text| string_field(text, "body")), None),
            "button" => (
                message.get("button").and_then(|button| string_field(button, "text")),
                message.get("button").and_then(|button| string_field(button, "payload")),
            ),
            "interactive" => {
                let reply = message.get("interactive").and_then(|interactive| {
                    interactive.get("button_reply").or_else(|| interactive.get("list_reply"))
                });
                (
                    reply.and_then(|reply| string_field(reply, "title")),
                    reply.and_then(|reply| string_field(reply, "id")),
                )
            }
            other => (message.get(other).and_then(|media| string_field(media, "caption")), None),
        };

        Some(Self {
            provider_message_id,
            from,
            to,
            contact_name: payload
                .get("contact")
                .and_then(|contact| contact.get("profile"))
                .and_then(|profile| string_field(profile, "name")),
            message_type,
            text,
            reply_id,
            sent_at: unix_timestamp(string_field(message, "timestamp")),
            content: message.clone(),
        })
    }
}

/// Decoded view of a stored status sub-event.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusReport {
    pub provider_message_id: String,
    pub status: DeliveryStatus,
    pub at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StatusReport {
    pub fn from_event_payload(payload: &Value) -> Option<Self> {
        let status = payload.get("status")?;
        let delivery = DeliveryStatus::parse(&string_field(status, "status")?)?;
        let error = status
            .get("errors")
            .and_then(Value::as_array)
            .and_then(|errors| errors.first())
            .map(describe_error);
        Some(Self {
            provider_message_id: string_field(status, "id")?,
            status: delivery,
            at: unix_timestamp(string_field(status, "timestamp")),
            error,
        })
    }
}

/// `"<code>: <title>"` for a provider error object.
pub fn describe_error(error: &Value) -> String {
    let code = error.get("code").map(|code| code.to_string()).unwrap_or_else(|| "?".to_string());
    let title = string_field(error, "title")
        .or_else(|| string_field(error, "message"))
        .unwrap_or_else(|| "unknown error".to_string());
    format!("{code}: {title}")
}

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use vendabot_core::config::WhatsAppConfig;
use vendabot_core::domain::reply::InteractiveReply;

use crate::interactive;

/// Graph API error codes that are worth retrying even though they arrive as 4xx.
const RETRYABLE_PROVIDER_CODES: &[i64] = &[4, 80007, 130429, 131000, 131016, 131056];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport timed out: {0}")]
    Timeout(String),
    #[error("transient provider failure (status {status:?}): {message}")]
    Retryable { status: Option<u16>, message: String },
    #[error("provider rejected message (status {status:?}, code {code:?}): {message}")]
    NonRetryable { status: Option<u16>, code: Option<i64>, message: String },
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Retryable { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Document,
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMedia {
    pub kind: MediaKind,
    pub link: String,
    pub caption: Option<String>,
    pub filename: Option<String>,
}

/// Outbound channel. Every send returns the provider message id.
///
/// `phone_number_id` selects the sending business number.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    async fn send_text(
        &self,
        phone_number_id: &str,
        to: &str,
        body: &str,
    ) -> Result<String, TransportError>;

    async fn send_template(
        &self,
        phone_number_id: &str,
        to: &str,
        name: &str,
        language: &str,
        parameters: &[String],
    ) -> Result<String, TransportError>;

    /// Buttons or list; the reply is clamped to provider limits before sending.
    async fn send_interactive(
        &self,
        phone_number_id: &str,
        to: &str,
        reply: &InteractiveReply,
    ) -> Result<String, TransportError>;

    async fn send_media(
        &self,
        phone_number_id: &str,
        to: &str,
        media: &OutboundMedia,
    ) -> Result<String, TransportError>;
}

pub struct CloudApiTransport {
    client: reqwest::Client,
    base_url: String,
    api_version: String,
    access_token: SecretString,
}

impl CloudApiTransport {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.send_timeout_secs.max(1)))
            .build()
            .map_err(|error| TransportError::NonRetryable {
                status: None,
                code: None,
                message: format!("could not build http client: {error}"),
            })?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            access_token: config.access_token.clone(),
        })
    }

    async fn post(&self, phone_number_id: &str, body: Value) -> Result<String, TransportError> {
        let url = format!("{}/{}/{}/messages", self.base_url, self.api_version, phone_number_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            let id = payload["messages"][0]["id"].as_str().map(str::to_string);
            return id.ok_or_else(|| TransportError::Retryable {
                status: Some(status.as_u16()),
                message: "provider response carried no message id".to_string(),
            });
        }

        let error = classify_response(status.as_u16(), &payload);
        warn!(
            event_name = "transport.whatsapp.send_failed",
            status = status.as_u16(),
            retryable = error.is_retryable(),
            error = %error,
            "whatsapp send failed"
        );
        Err(error)
    }
}

fn classify_request_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() || error.is_request() {
        TransportError::Retryable { status: None, message: error.to_string() }
    } else {
        TransportError::NonRetryable { status: None, code: None, message: error.to_string() }
    }
}

fn classify_response(status: u16, payload: &Value) -> TransportError {
    let code = payload["error"]["code"].as_i64();
    let message = payload["error"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("http status {status}"));

    let retryable = status == 429
        || status >= 500
        || code.is_some_and(|code| RETRYABLE_PROVIDER_CODES.contains(&code));
    if retryable {
        TransportError::Retryable { status: Some(status), message }
    } else {
        TransportError::NonRetryable { status: Some(status), code, message }
    }
}

#[async_trait]
impl MessageTransport for CloudApiTransport {
    async fn send_text(
        &self,
        phone_number_id: &str,
        to: &str,
        body: &str,
    ) -> Result<String, TransportError> {
        debug!(event_name = "transport.whatsapp.send", kind = "text", "sending whatsapp message");
        self.post(phone_number_id, interactive::text(to, body)).await
    }

    async fn send_template(
        &self,
        phone_number_id: &str,
        to: &str,
        name: &str,
        language: &str,
        parameters: &[String],
    ) -> Result<String, TransportError> {
        debug!(
            event_name = "transport.whatsapp.send",
            kind = "template",
            template = name,
            "sending whatsapp message"
        );
        self.post(phone_number_id, interactive::template(to, name, language, parameters)).await
    }

    async fn send_interactive(
        &self,
        phone_number_id: &str,
        to: &str,
        reply: &InteractiveReply,
    ) -> Result<String, TransportError> {
        debug!(event_name = "transport.whatsapp.send", kind = reply.kind(), "sending whatsapp message");
        self.post(phone_number_id, interactive::interactive(to, reply)).await
    }

    async fn send_media(
        &self,
        phone_number_id: &str,
        to: &str,
        media: &OutboundMedia,
    ) -> Result<String, TransportError> {
        debug!(
            event_name = "transport.whatsapp.send",
            kind = media.kind.as_str(),
            "sending whatsapp message"
        );
        self.post(phone_number_id, interactive::media(to, media)).await
    }
}

/// One message captured by [`RecordingTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct SentMessage {
    pub phone_number_id: String,
    pub to: String,
    pub body: Value,
}

/// In-process transport that records request bodies and can be scripted to
/// fail.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    failures: Mutex<VecDeque<TransportError>>,
    interactive_failures: Mutex<VecDeque<TransportError>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next send of any kind fails with `error`.
    pub async fn fail_next(&self, error: TransportError) {
        self.failures.lock().await.push_back(error);
    }

    /// The next interactive send fails with `error`; text sends are unaffected.
    pub async fn fail_next_interactive(&self, error: TransportError) {
        self.interactive_failures.lock().await.push_back(error);
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    async fn record(
        &self,
        phone_number_id: &str,
        to: &str,
        body: Value,
        interactive_send: bool,
    ) -> Result<String, TransportError> {
        if interactive_send {
            if let Some(error) = self.interactive_failures.lock().await.pop_front() {
                return Err(error);
            }
        }
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }
        let mut sent = self.sent.lock().await;
        sent.push(SentMessage { phone_number_id: phone_number_id.to_string(), to: to.to_string(), body });
        Ok(format!("wamid.sent.{}", sent.len()))
    }
}

#[async_trait]
impl MessageTransport for RecordingTransport {
    async fn send_text(
        &self,
        phone_number_id: &str,
        to: &str,
        body: &str,
    ) -> Result<String, TransportError> {
        self.record(phone_number_id, to, interactive::text(to, body), false).await
    }

    async fn send_template(
        &self,
        phone_number_id: &str,
        to: &str,
        name: &str,
        language: &str,
        parameters: &[String],
    ) -> Result<String, TransportError> {
        self.record(phone_number_id, to, interactive::template(to, name, language, parameters), false)
            .await
    }

    async fn send_interactive(
        &self,
        phone_number_id: &str,
        to: &str,
        reply: &InteractiveReply,
    ) -> Result<String, TransportError> {
        self.record(phone_number_id, to, interactive::interactive(to, reply), true).await
    }

    async fn send_media(
        &self,
        phone_number_id: &str,
        to: &str,
        media: &OutboundMedia,
    ) -> Result<String, TransportError> {
        self.record(phone_number_id, to, interactive::media(to, media), false).await
    }
}

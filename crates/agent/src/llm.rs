use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use vendabot_core::config::{LlmConfig, LlmProvider};
use vendabot_core::domain::reply::truncate;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const MAX_TURN_CHARS: usize = 1_500;
const MAX_TURNS: usize = 12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("model request timed out after {0}s")]
    Timeout(u64),
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model response had no content")]
    EmptyResponse,
    #[error("model client is misconfigured: {0}")]
    Configuration(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// A bounded prompt: each turn is truncated and only the most recent turns
/// are kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LlmRequest {
    pub system: String,
    pub turns: Vec<ChatTurn>,
}

impl LlmRequest {
    pub fn new(system: impl Into<String>) -> Self {
        Self { system: system.into(), turns: Vec::new() }
    }

    pub fn push(mut self, role: Role, content: &str) -> Self {
        let content = content.trim();
        if content.is_empty() {
            return self;
        }
        self.turns.push(ChatTurn { role, content: truncate(content, MAX_TURN_CHARS) });
        if self.turns.len() > MAX_TURNS {
            let overflow = self.turns.len() - MAX_TURNS;
            self.turns.drain(..overflow);
        }
        self
    }

    fn to_messages(&self) -> Vec<Value> {
        let mut messages = vec![json!({ "role": "system", "content": self.system })];
        messages.extend(
            self.turns.iter().map(|turn| json!({ "role": turn.role.as_str(), "content": turn.content })),
        );
        messages
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError>;
}

/// Chat-completions client for OpenAI and Ollama's OpenAI-compatible API.
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    timeout_secs: u64,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        if config.provider == LlmProvider::OpenAi && config.api_key.is_none() {
            return Err(LlmError::Configuration("openai provider requires llm.api_key".to_string()));
        }
        let base_url = config.base_url.clone().unwrap_or_else(|| {
            match config.provider {
                LlmProvider::OpenAi => OPENAI_BASE_URL,
                LlmProvider::Ollama => OLLAMA_BASE_URL,
            }
            .to_string()
        });
        let timeout_secs = config.timeout_secs.max(1);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|error| LlmError::Configuration(error.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout_secs,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        debug!(
            event_name = "automation.llm.request",
            model = %self.model,
            turns = request.turns.len(),
            "sending model request"
        );
        let mut builder = self.client.post(&self.endpoint).json(&json!({
            "model": self.model,
            "messages": request.to_messages(),
            "temperature": 0.3,
        }));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout(self.timeout_secs)
            } else {
                LlmError::Request(error.to_string())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body: truncate(&body, 200) });
        }

        let payload: Value =
            response.json().await.map_err(|error| LlmError::Request(error.to_string()))?;
        extract_content(&payload)
    }
}

fn extract_content(payload: &Value) -> Result<String, LlmError> {
    payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|content| !content.is_empty())
        .map(str::to_string)
        .ok_or(LlmError::EmptyResponse)
}

/// Model double that replays queued answers and records every request.
#[derive(Default)]
pub struct ScriptedLlm {
    answers: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<LlmRequest>>,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every answer is delayed by `delay`, which lets callers exercise timeouts.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub async fn answer(&self, text: impl Into<String>) {
        self.answers.lock().await.push_back(Ok(text.into()));
    }

    pub async fn fail(&self, error: LlmError) {
        self.answers.lock().await.push_back(Err(error));
    }

    pub async fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<String, LlmError> {
        self.requests.lock().await.push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answers.lock().await.pop_front().unwrap_or(Err(LlmError::EmptyResponse))
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;

    use vendabot_core::config::{LlmConfig, LlmProvider};

    use super::{extract_content, LlmError, LlmRequest, OpenAiCompatibleClient, Role, MAX_TURNS};

    fn config(provider: LlmProvider, api_key: Option<&str>) -> LlmConfig {
        LlmConfig {
            enabled: true,
            provider,
            api_key: api_key.map(|key| SecretString::from(key.to_string())),
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 8,
        }
    }

    #[test]
    fn request_keeps_only_recent_turns() {
        let request = (0..20).fold(LlmRequest::new("system"), |request, n| {
            request.push(Role::User, &format!("mensagem {n}"))
        });
        assert_eq!(request.turns.len(), MAX_TURNS);
        assert_eq!(request.turns[0].content, "mensagem 8");

        let messages = request.to_messages();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages.len(), MAX_TURNS + 1);
    }

    #[test]
    fn blank_turns_are_skipped() {
        let request = LlmRequest::new("system").push(Role::User, "   ");
        assert!(request.turns.is_empty());
    }

    #[test]
    fn content_is_extracted_from_first_choice() {
        let payload = json!({"choices": [{"message": {"role": "assistant", "content": "  Olá!  "}}]});
        assert_eq!(extract_content(&payload), Ok("Olá!".to_string()));
        assert_eq!(extract_content(&json!({"choices": []})), Err(LlmError::EmptyResponse));
    }

    #[test]
    fn openai_requires_api_key_but_ollama_does_not() {
        assert!(matches!(
            OpenAiCompatibleClient::from_config(&config(LlmProvider::OpenAi, None)),
            Err(LlmError::Configuration(_))
        ));
        let ollama = OpenAiCompatibleClient::from_config(&config(LlmProvider::Ollama, None))
            .expect("ollama client");
        assert_eq!(ollama.endpoint, "http://localhost:11434/v1/chat/completions");
    }
}

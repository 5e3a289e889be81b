use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use toml::Value;
use vendabot_core::config::{AppConfig, LoadOptions};

/// One rendered key: dotted path, env override name, display value.
struct Field {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: &'static str, value: impl ToString) -> Self {
        Self { key, env_key, value: value.to_string() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key, field.value));
    }
    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", "VENDABOT_DATABASE_URL", &config.database.url),
        Field::new(
            "database.max_connections",
            "VENDABOT_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections,
        ),
        Field::new("database.timeout_secs", "VENDABOT_DATABASE_TIMEOUT_SECS", config.database.timeout_secs),
        Field::new(
            "whatsapp.app_secret",
            "VENDABOT_WHATSAPP_APP_SECRET",
            redact_secret(&config.whatsapp.app_secret),
        ),
        Field::new(
            "whatsapp.verify_token",
            "VENDABOT_WHATSAPP_VERIFY_TOKEN",
            redact_secret(&config.whatsapp.verify_token),
        ),
        Field::new(
            "whatsapp.access_token",
            "VENDABOT_WHATSAPP_ACCESS_TOKEN",
            redact_secret(&config.whatsapp.access_token),
        ),
        Field::new("whatsapp.api_base_url", "VENDABOT_WHATSAPP_API_BASE_URL", &config.whatsapp.api_base_url),
        Field::new("whatsapp.api_version", "VENDABOT_WHATSAPP_API_VERSION", &config.whatsapp.api_version),
        Field::new("llm.enabled", "VENDABOT_LLM_ENABLED", config.llm.enabled),
        Field::new("llm.provider", "VENDABOT_LLM_PROVIDER", format!("{:?}", config.llm.provider)),
        Field::new("llm.model", "VENDABOT_LLM_MODEL", &config.llm.model),
        Field::new(
            "llm.base_url",
            "VENDABOT_LLM_BASE_URL",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "llm.api_key",
            "VENDABOT_LLM_API_KEY",
            config.llm.api_key.as_ref().map(redact_secret).unwrap_or_else(|| "<unset>".to_string()),
        ),
        Field::new(
            "automation.abandoned_cart_minutes",
            "VENDABOT_AUTOMATION_ABANDONED_CART_MINUTES",
            config.automation.abandoned_cart_minutes,
        ),
        Field::new(
            "automation.payment_reminder_minutes",
            "VENDABOT_AUTOMATION_PAYMENT_REMINDER_MINUTES",
            config.automation.payment_reminder_minutes,
        ),
        Field::new("worker.concurrency", "VENDABOT_WORKER_CONCURRENCY", config.worker.concurrency),
        Field::new("worker.max_attempts", "VENDABOT_WORKER_MAX_ATTEMPTS", config.worker.max_attempts),
        Field::new("server.bind_address", "VENDABOT_SERVER_BIND_ADDRESS", &config.server.bind_address),
        Field::new("server.port", "VENDABOT_SERVER_PORT", config.server.port),
        Field::new("logging.level", "VENDABOT_LOGGING_LEVEL", &config.logging.level),
        Field::new("logging.format", "VENDABOT_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("vendabot.toml"), PathBuf::from("config/vendabot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keeps the last four characters so operators can tell credentials apart.
fn redact_secret(secret: &SecretString) -> String {
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= 8 {
        return "<redacted>".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{tail}")
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_render_in_full() {
        assert_eq!(redact_secret(&SecretString::from(String::new())), "<empty>");
        assert_eq!(redact_secret(&SecretString::from("short".to_string())), "<redacted>");
        assert_eq!(redact_secret(&SecretString::from("EAAGm0PX4ZCpsBA1234".to_string())), "***1234");
    }

    #[test]
    fn nested_keys_are_found_in_file_documents() {
        let doc: toml::Value = "[whatsapp]\napi_version = \"v21.0\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "whatsapp.api_version"));
        assert!(!contains_path(&doc, "whatsapp.app_secret"));
    }
}

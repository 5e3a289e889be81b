use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub whatsapp: WhatsAppConfig,
    pub llm: LlmConfig,
    pub automation: AutomationConfig,
    pub worker: WorkerConfig,
    pub scheduler: SchedulerConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WhatsAppConfig {
    pub app_secret: SecretString,
    pub verify_token: SecretString,
    pub access_token: SecretString,
    pub api_base_url: String,
    pub api_version: String,
    pub send_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AutomationConfig {
    pub session_staleness_days: u32,
    pub abandoned_cart_minutes: u32,
    pub payment_reminder_minutes: u32,
    pub lease_secs: u64,
    pub model_assisted_classification: bool,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub concurrency: u32,
    pub max_attempts: u32,
    pub retry_base_delay_secs: u64,
    pub retry_backoff_multiplier: u32,
    pub claim_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub queue_capacity: u32,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_enabled: Option<bool>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub whatsapp_app_secret: Option<String>,
    pub whatsapp_verify_token: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://vendabot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            whatsapp: WhatsAppConfig {
                app_secret: String::new().into(),
                verify_token: String::new().into(),
                access_token: String::new().into(),
                api_base_url: "https://graph.facebook.com".to_string(),
                api_version: "v21.0".to_string(),
                send_timeout_secs: 10,
            },
            llm: LlmConfig {
                enabled: false,
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 8,
            },
            automation: AutomationConfig {
                session_staleness_days: 7,
                abandoned_cart_minutes: 60,
                payment_reminder_minutes: 30,
                lease_secs: 120,
                model_assisted_classification: false,
            },
            worker: WorkerConfig {
                concurrency: 4,
                max_attempts: 3,
                retry_base_delay_secs: 5,
                retry_backoff_multiplier: 2,
                claim_timeout_secs: 300,
                poll_interval_secs: 5,
                queue_capacity: 1024,
            },
            scheduler: SchedulerConfig { sweep_interval_secs: 300 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("vendabot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            set(&mut self.database.url, database.url);
            set(&mut self.database.max_connections, database.max_connections);
            set(&mut self.database.timeout_secs, database.timeout_secs);
        }

        if let Some(whatsapp) = patch.whatsapp {
            if let Some(value) = whatsapp.app_secret {
                self.whatsapp.app_secret = secret_value(value); // ubs:ignore
            }
            if let Some(value) = whatsapp.verify_token {
                self.whatsapp.verify_token = secret_value(value); // ubs:ignore
            }
            if let Some(value) = whatsapp.access_token {
                self.whatsapp.access_token = secret_value(value); // ubs:ignore
            }
            set(&mut self.whatsapp.api_base_url, whatsapp.api_base_url);
            set(&mut self.whatsapp.api_version, whatsapp.api_version);
            set(&mut self.whatsapp.send_timeout_secs, whatsapp.send_timeout_secs);
        }

        if let Some(llm) = patch.llm {
            set(&mut self.llm.enabled, llm.enabled);
            set(&mut self.llm.provider, llm.provider);
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value)); // ubs:ignore
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            set(&mut self.llm.model, llm.model);
            set(&mut self.llm.timeout_secs, llm.timeout_secs);
        }

        if let Some(automation) = patch.automation {
            set(&mut self.automation.session_staleness_days, automation.session_staleness_days);
            set(&mut self.automation.abandoned_cart_minutes, automation.abandoned_cart_minutes);
            set(&mut self.automation.payment_reminder_minutes, automation.payment_reminder_minutes);
            set(&mut self.automation.lease_secs, automation.lease_secs);
            set(
                &mut self.automation.model_assisted_classification,
                automation.model_assisted_classification,
            );
        }

        if let Some(worker) = patch.worker {
            set(&mut self.worker.concurrency, worker.concurrency);
            set(&mut self.worker.max_attempts, worker.max_attempts);
            set(&mut self.worker.retry_base_delay_secs, worker.retry_base_delay_secs);
            set(&mut self.worker.retry_backoff_multiplier, worker.retry_backoff_multiplier);
            set(&mut self.worker.claim_timeout_secs, worker.claim_timeout_secs);
            set(&mut self.worker.poll_interval_secs, worker.poll_interval_secs);
            set(&mut self.worker.queue_capacity, worker.queue_capacity);
        }

        if let Some(scheduler) = patch.scheduler {
            set(&mut self.scheduler.sweep_interval_secs, scheduler.sweep_interval_secs);
        }

        if let Some(server) = patch.server {
            set(&mut self.server.bind_address, server.bind_address);
            set(&mut self.server.port, server.port);
            set(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }

        if let Some(logging) = patch.logging {
            set(&mut self.logging.level, logging.level);
            set(&mut self.logging.format, logging.format);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("VENDABOT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("VENDABOT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("VENDABOT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("VENDABOT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("VENDABOT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("VENDABOT_WHATSAPP_APP_SECRET") {
            self.whatsapp.app_secret = secret_value(value); // ubs:ignore
        }
        if let Some(value) = read_env("VENDABOT_WHATSAPP_VERIFY_TOKEN") {
            self.whatsapp.verify_token = secret_value(value); // ubs:ignore
        }
        if let Some(value) = read_env("VENDABOT_WHATSAPP_ACCESS_TOKEN") {
            self.whatsapp.access_token = secret_value(value); // ubs:ignore
        }
        if let Some(value) = read_env("VENDABOT_WHATSAPP_API_BASE_URL") {
            self.whatsapp.api_base_url = value;
        }
        if let Some(value) = read_env("VENDABOT_WHATSAPP_API_VERSION") {
            self.whatsapp.api_version = value;
        }
        if let Some(value) = read_env("VENDABOT_WHATSAPP_SEND_TIMEOUT_SECS") {
            self.whatsapp.send_timeout_secs =
                parse_u64("VENDABOT_WHATSAPP_SEND_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("VENDABOT_LLM_ENABLED") {
            self.llm.enabled = parse_bool("VENDABOT_LLM_ENABLED", &value)?;
        }
        if let Some(value) = read_env("VENDABOT_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("VENDABOT_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value)); // ubs:ignore
        }
        if let Some(value) = read_env("VENDABOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("VENDABOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("VENDABOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("VENDABOT_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("VENDABOT_AUTOMATION_SESSION_STALENESS_DAYS") {
            self.automation.session_staleness_days =
                parse_u32("VENDABOT_AUTOMATION_SESSION_STALENESS_DAYS", &value)?;
        }
        if let Some(value) = read_env("VENDABOT_AUTOMATION_ABANDONED_CART_MINUTES") {
            self.automation.abandoned_cart_minutes =
                parse_u32("VENDABOT_AUTOMATION_ABANDONED_CART_MINUTES", &value)?;
        }
        if let Some(value) = read_env("VENDABOT_AUTOMATION_PAYMENT_REMINDER_MINUTES") {
            self.automation.payment_reminder_minutes =
                parse_u32("VENDABOT_AUTOMATION_PAYMENT_REMINDER_MINUTES", &value)?;
        }
        if let Some(value) = read_env("VENDABOT_AUTOMATION_LEASE_SECS") {
            self.automation.lease_secs = parse_u64("VENDABOT_AUTOMATION_LEASE_SECS", &value)?;
        }
        if let Some(value) = read_env("VENDABOT_AUTOMATION_MODEL_ASSISTED_CLASSIFICATION") {
            self.automation.model_assisted_classification =
                parse_bool("VENDABOT_AUTOMATION_MODEL_ASSISTED_CLASSIFICATION", &value)?;
        }

        if let Some(value) = read_env("VENDABOT_WORKER_CONCURRENCY") {
            self.worker.concurrency = parse_u32("VENDABOT_WORKER_CONCURRENCY", &value)?;
        }
        if let Some(value) = read_env("VENDABOT_WORKER_MAX_ATTEMPTS") {
            self.worker.max_attempts = parse_u32("VENDABOT_WORKER_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("VENDABOT_WORKER_POLL_INTERVAL_SECS") {
            self.worker.poll_interval_secs =
                parse_u64("VENDABOT_WORKER_POLL_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("VENDABOT_SCHEDULER_SWEEP_INTERVAL_SECS") {
            self.scheduler.sweep_interval_secs =
                parse_u64("VENDABOT_SCHEDULER_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("VENDABOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        let port = read_env("VENDABOT_SERVER_PORT").or_else(|| read_env("PORT"));
        if let Some(value) = port {
            self.server.port = parse_u16("VENDABOT_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("VENDABOT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("VENDABOT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("VENDABOT_LOGGING_LEVEL").or_else(|| read_env("VENDABOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("VENDABOT_LOGGING_FORMAT").or_else(|| read_env("VENDABOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        set(&mut self.database.url, overrides.database_url);
        set(&mut self.logging.level, overrides.log_level);
        set(&mut self.llm.enabled, overrides.llm_enabled);
        set(&mut self.llm.provider, overrides.llm_provider);
        set(&mut self.llm.model, overrides.llm_model);
        set(&mut self.server.port, overrides.server_port);
        if let Some(value) = overrides.whatsapp_app_secret {
            self.whatsapp.app_secret = secret_value(value); // ubs:ignore
        }
        if let Some(value) = overrides.whatsapp_verify_token {
            self.whatsapp.verify_token = secret_value(value); // ubs:ignore
        }
        if let Some(value) = overrides.whatsapp_access_token {
            self.whatsapp.access_token = secret_value(value); // ubs:ignore
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_whatsapp(&self.whatsapp)?;
        validate_llm(&self.llm)?;
        validate_automation(&self.automation)?;
        validate_worker(&self.worker, &self.scheduler)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("vendabot.toml"), PathBuf::from("config/vendabot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_whatsapp(whatsapp: &WhatsAppConfig) -> Result<(), ConfigError> {
    if whatsapp.app_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "whatsapp.app_secret is required to verify X-Hub-Signature-256. Find it under Meta for Developers > Your App > App settings > Basic".to_string(),
        ));
    }

    if whatsapp.verify_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "whatsapp.verify_token is required; use the same value configured in the webhook subscription".to_string(),
        ));
    }

    let base_url = whatsapp.api_base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "whatsapp.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if !whatsapp.api_version.starts_with('v') {
        return Err(ConfigError::Validation(
            "whatsapp.api_version must look like `v21.0`".to_string(),
        ));
    }

    if whatsapp.send_timeout_secs == 0 || whatsapp.send_timeout_secs > 60 {
        return Err(ConfigError::Validation(
            "whatsapp.send_timeout_secs must be in range 1..=60".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 60 {
        return Err(ConfigError::Validation("llm.timeout_secs must be in range 1..=60".to_string()));
    }

    if !llm.enabled {
        return Ok(());
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_automation(automation: &AutomationConfig) -> Result<(), ConfigError> {
    if automation.session_staleness_days == 0 {
        return Err(ConfigError::Validation(
            "automation.session_staleness_days must be greater than zero".to_string(),
        ));
    }

    if automation.abandoned_cart_minutes == 0 || automation.payment_reminder_minutes == 0 {
        return Err(ConfigError::Validation(
            "automation reminder windows must be greater than zero minutes".to_string(),
        ));
    }

    if automation.lease_secs == 0 || automation.lease_secs > 600 {
        return Err(ConfigError::Validation(
            "automation.lease_secs must be in range 1..=600".to_string(),
        ));
    }

    Ok(())
}

fn validate_worker(worker: &WorkerConfig, scheduler: &SchedulerConfig) -> Result<(), ConfigError> {
    if worker.concurrency == 0 || worker.concurrency > 64 {
        return Err(ConfigError::Validation(
            "worker.concurrency must be in range 1..=64".to_string(),
        ));
    }

    if worker.max_attempts == 0 || worker.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "worker.max_attempts must be in range 1..=10".to_string(),
        ));
    }

    if worker.retry_backoff_multiplier == 0 {
        return Err(ConfigError::Validation(
            "worker.retry_backoff_multiplier must be greater than zero".to_string(),
        ));
    }

    if worker.poll_interval_secs == 0 || worker.queue_capacity == 0 {
        return Err(ConfigError::Validation(
            "worker.poll_interval_secs and worker.queue_capacity must be greater than zero"
                .to_string(),
        ));
    }

    if scheduler.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "scheduler.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    whatsapp: Option<WhatsAppPatch>,
    llm: Option<LlmPatch>,
    automation: Option<AutomationPatch>,
    worker: Option<WorkerPatch>,
    scheduler: Option<SchedulerPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WhatsAppPatch {
    app_secret: Option<String>,
    verify_token: Option<String>,
    access_token: Option<String>,
    api_base_url: Option<String>,
    api_version: Option<String>,
    send_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    enabled: Option<bool>,
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AutomationPatch {
    session_staleness_days: Option<u32>,
    abandoned_cart_minutes: Option<u32>,
    payment_reminder_minutes: Option<u32>,
    lease_secs: Option<u64>,
    model_assisted_classification: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerPatch {
    concurrency: Option<u32>,
    max_attempts: Option<u32>,
    retry_base_delay_secs: Option<u64>,
    retry_backoff_multiplier: Option<u32>,
    claim_timeout_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    queue_capacity: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulerPatch {
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

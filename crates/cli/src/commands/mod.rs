pub mod config;
pub mod doctor;
pub mod migrate;
pub mod requeue;
pub mod sweep;

use std::fmt::Display;

use serde::Serialize;
use tokio::runtime::Runtime;
use vendabot_core::config::{AppConfig, LoadOptions};
use vendabot_db::{connect_with_settings, DbPool};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

/// Why a command stopped. Each class owns its process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    Config,
    Runtime,
    DbConnect,
    Bootstrap,
    Migration,
    Sweep,
    Repository,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config_validation",
            Self::Runtime => "runtime_init",
            Self::DbConnect => "db_connectivity",
            Self::Bootstrap => "bootstrap",
            Self::Migration => "migration",
            Self::Sweep => "sweep",
            Self::Repository => "repository",
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Self::Config => 2,
            Self::Runtime => 3,
            Self::DbConnect | Self::Bootstrap => 4,
            Self::Migration | Self::Sweep => 5,
            Self::Repository => 6,
        }
    }

    /// Adapter for `map_err` chains.
    pub(crate) fn with<E: Display>(self) -> impl FnOnce(E) -> CommandFailure {
        move |error| CommandFailure { class: self, message: error.to_string() }
    }
}

#[derive(Debug)]
pub struct CommandFailure {
    pub class: FailureClass,
    pub message: String,
}

#[derive(Serialize)]
struct Payload<'a> {
    command: &'a str,
    status: &'static str,
    error_class: Option<&'static str>,
    message: &'a str,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            exit_code: 0,
            output: render(Payload { command, status: "ok", error_class: None, message: &message }),
        }
    }

    pub fn failure(command: &str, failure: CommandFailure) -> Self {
        Self {
            exit_code: failure.class.exit_code(),
            output: render(Payload {
                command,
                status: "error",
                error_class: Some(failure.class.as_str()),
                message: &failure.message,
            }),
        }
    }

    /// Loads config and a current-thread runtime, then runs `body` to
    /// completion. `body` yields the success message.
    pub(crate) fn execute<F, Fut>(command: &str, body: F) -> Self
    where
        F: FnOnce(AppConfig) -> Fut,
        Fut: std::future::Future<Output = Result<String, CommandFailure>>,
    {
        let outcome = load_config().and_then(|config| Ok((config, runtime()?))).and_then(
            |(config, runtime)| runtime.block_on(body(config)),
        );
        match outcome {
            Ok(message) => Self::success(command, message),
            Err(failure) => Self::failure(command, failure),
        }
    }
}

fn load_config() -> Result<AppConfig, CommandFailure> {
    AppConfig::load(LoadOptions::default()).map_err(|error| CommandFailure {
        class: FailureClass::Config,
        message: format!("configuration issue: {error}"),
    })
}

fn runtime() -> Result<Runtime, CommandFailure> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandFailure {
            class: FailureClass::Runtime,
            message: format!("failed to initialize async runtime: {error}"),
        }
    })
}

pub(crate) async fn open_pool(config: &AppConfig) -> Result<DbPool, CommandFailure> {
    connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(FailureClass::DbConnect.with())
}

fn render(payload: Payload<'_>) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{CommandFailure, CommandResult, FailureClass};

    #[test]
    fn failure_payload_carries_class_and_exit_code() {
        let result = CommandResult::failure(
            "sweep",
            CommandFailure { class: FailureClass::Sweep, message: "session store \"down\"".to_string() },
        );
        assert_eq!(result.exit_code, 5);
        let payload: serde_json::Value = serde_json::from_str(&result.output).expect("json");
        assert_eq!(payload["error_class"], "sweep");
        assert_eq!(payload["message"], "session store \"down\"");
    }

    #[test]
    fn exit_codes_group_by_stage() {
        assert_eq!(FailureClass::DbConnect.exit_code(), FailureClass::Bootstrap.exit_code());
        assert_eq!(FailureClass::Migration.exit_code(), 5);
        assert_eq!(FailureClass::Repository.exit_code(), 6);
    }
}

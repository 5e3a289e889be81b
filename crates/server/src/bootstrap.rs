use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use vendabot_agent::templates::TemplateError;
use vendabot_agent::{
    AutomationOrchestrator, CannedTemplates, CommerceDeps, HandlerRegistry, LlmClient, LlmError,
    OpenAiCompatibleClient, OrchestratorDeps, OrchestratorSettings, ReminderService, SessionManager,
    StaticPixGateway,
};
use vendabot_core::config::{AppConfig, ConfigError, LoadOptions};
use vendabot_core::dispatch::{DispatchConfig, EventProcessingEngine};
use vendabot_core::domain::webhook_event::WebhookEventId;
use vendabot_core::intent::{ClassifierError, IntentClassifier};
use vendabot_db::repositories::{
    AccountRepository, AutomationLogRepository, LeaseRepository, MessageRepository, OrderRepository,
    ProductRepository, SessionRepository, SqlAccountRepository, SqlAutomationLogRepository,
    SqlLeaseRepository, SqlMessageRepository, SqlOrderRepository, SqlProductRepository,
    SqlSessionRepository, SqlTemplateRepository, SqlWebhookEventRepository, TemplateRepository,
    WebhookEventRepository,
};
use vendabot_db::{connect_with_settings, migrations, DbPool};
use vendabot_whatsapp::{CloudApiTransport, MessageTransport, TransportError};

use crate::health;
use crate::ingestion::IngestionService;
use crate::processor::EventProcessor;
use crate::webhook::{self, WebhookState};
use crate::worker::WorkerPool;

/// Every repository the runtime touches, behind its trait.
#[derive(Clone)]
pub struct Repositories {
    pub accounts: Arc<dyn AccountRepository>,
    pub products: Arc<dyn ProductRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub events: Arc<dyn WebhookEventRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub leases: Arc<dyn LeaseRepository>,
    pub logs: Arc<dyn AutomationLogRepository>,
    pub templates: Arc<dyn TemplateRepository>,
}

impl Repositories {
    pub fn sql(pool: &DbPool) -> Self {
        Self {
            accounts: Arc::new(SqlAccountRepository::new(pool.clone())),
            products: Arc::new(SqlProductRepository::new(pool.clone())),
            orders: Arc::new(SqlOrderRepository::new(pool.clone())),
            events: Arc::new(SqlWebhookEventRepository::new(pool.clone())),
            messages: Arc::new(SqlMessageRepository::new(pool.clone())),
            sessions: Arc::new(SqlSessionRepository::new(pool.clone())),
            leases: Arc::new(SqlLeaseRepository::new(pool.clone())),
            logs: Arc::new(SqlAutomationLogRepository::new(pool.clone())),
            templates: Arc::new(SqlTemplateRepository::new(pool.clone())),
        }
    }
}

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub repositories: Repositories,
    pub ingestion: Arc<IngestionService>,
    pub processor: Arc<EventProcessor>,
    pub reminders: Arc<ReminderService>,
    pub queue_tx: mpsc::Sender<WebhookEventId>,
    /// Taken once by whoever runs the worker pool.
    pub queue_rx: Option<mpsc::Receiver<WebhookEventId>>,
}

impl Application {
    /// Webhook and health routes on one listener.
    pub fn router(&self) -> Router {
        webhook::router(WebhookState {
            ingestion: self.ingestion.clone(),
            verify_token: self.config.whatsapp.verify_token.clone(),
        })
        .merge(health::router(self.db_pool.clone(), self.config.worker.concurrency))
    }

    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(
            self.processor.clone(),
            self.repositories.events.clone(),
            self.queue_tx.clone(),
            self.config.worker.clone(),
        )
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("whatsapp transport setup failed: {0}")]
    Transport(#[source] TransportError),
    #[error("llm client setup failed: {0}")]
    Llm(#[source] LlmError),
    #[error("template catalog failed to load: {0}")]
    Templates(#[source] TemplateError),
    #[error("intent patterns failed to compile: {0}")]
    Classifier(#[source] ClassifierError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "system.bootstrap.database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "system.bootstrap.migrations_applied", "database migrations applied");

    let transport: Arc<dyn MessageTransport> =
        Arc::new(CloudApiTransport::new(&config.whatsapp).map_err(BootstrapError::Transport)?);
    let llm: Option<Arc<dyn LlmClient>> = if config.llm.enabled {
        let client = OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::Llm)?;
        info!(
            event_name = "system.bootstrap.llm_enabled",
            provider = ?config.llm.provider,
            model = %config.llm.model,
            "generative fallback enabled"
        );
        Some(Arc::new(client))
    } else {
        None
    };

    assemble(config, db_pool, transport, llm)
}

/// Wires services over an already migrated pool. The transport and model
/// client come in from outside so tests can substitute them.
pub fn assemble(
    config: AppConfig,
    db_pool: DbPool,
    transport: Arc<dyn MessageTransport>,
    llm: Option<Arc<dyn LlmClient>>,
) -> Result<Application, BootstrapError> {
    let repositories = Repositories::sql(&db_pool);
    let templates =
        CannedTemplates::new(repositories.templates.clone()).map_err(BootstrapError::Templates)?;
    let classifier = Arc::new(IntentClassifier::new().map_err(BootstrapError::Classifier)?);
    let sessions = SessionManager::new(
        repositories.sessions.clone(),
        config.automation.session_staleness_days,
    );

    let registry = HandlerRegistry::standard(CommerceDeps {
        products: repositories.products.clone(),
        orders: repositories.orders.clone(),
        sessions: sessions.clone(),
        payments: Arc::new(StaticPixGateway::new()),
        templates: templates.clone(),
    });

    let orchestrator = Arc::new(AutomationOrchestrator::new(
        OrchestratorDeps {
            registry,
            sessions: sessions.clone(),
            products: repositories.products.clone(),
            orders: repositories.orders.clone(),
            messages: repositories.messages.clone(),
            leases: repositories.leases.clone(),
            logs: repositories.logs.clone(),
            templates: templates.clone(),
            transport: transport.clone(),
            classifier,
            llm,
        },
        OrchestratorSettings::from_config(&config),
    ));

    let (queue_tx, queue_rx) = mpsc::channel(config.worker.queue_capacity.max(1) as usize);

    let ingestion = Arc::new(IngestionService::new(
        repositories.accounts.clone(),
        repositories.events.clone(),
        config.whatsapp.app_secret.clone(),
        queue_tx.clone(),
    ));
    let processor = Arc::new(EventProcessor::new(
        repositories.events.clone(),
        repositories.accounts.clone(),
        repositories.messages.clone(),
        orchestrator,
        EventProcessingEngine::with_config(DispatchConfig::from(&config.worker)),
    ));
    let reminders = Arc::new(ReminderService::new(
        sessions,
        repositories.accounts.clone(),
        repositories.orders.clone(),
        transport,
        templates,
        config.automation.clone(),
    ));

    info!(
        event_name = "system.bootstrap.assembled",
        workers = config.worker.concurrency,
        queue_capacity = config.worker.queue_capacity,
        "services assembled"
    );

    Ok(Application {
        config,
        db_pool,
        repositories,
        ingestion,
        processor,
        reminders,
        queue_tx,
        queue_rx: Some(queue_rx),
    })
}

#[cfg(test)]
mod tests {
    use vendabot_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_without_app_secret() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                whatsapp_verify_token: Some("verify-me".to_string()),
                whatsapp_access_token: Some("EAAG-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("missing secret should fail").to_string();
        assert!(message.contains("whatsapp.app_secret"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_exposes_runtime_tables() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                whatsapp_app_secret: Some("app-secret".to_string()),
                whatsapp_verify_token: Some("verify-me".to_string()),
                whatsapp_access_token: Some("EAAG-test".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('business_account', 'product', 'customer_order', 'webhook_event', 'message', 'customer_session')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables should be queryable after bootstrap");
        assert_eq!(table_count, 6);
        assert_eq!(app.queue_tx.max_capacity(), app.config.worker.queue_capacity as usize);

        app.db_pool.close().await;
    }
}

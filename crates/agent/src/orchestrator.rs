//! Decides and sends the reply to one inbound customer message.
//!
//! Stages: session short-circuit, intent detection, handler dispatch,
//! generative fallback, delivery, and an automation log entry for every
//! terminal outcome. Handler faults and model failures never escape; only
//! persistence and transport failures are returned, so the caller's retry
//! policy can decide.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tera::Context;
use thiserror::Error;
use tracing::{info, warn};

use vendabot_core::config::AppConfig;
use vendabot_core::domain::account::BusinessAccount;
use vendabot_core::domain::automation::{AutomationLog, AutomationLogId, ResponseKind};
use vendabot_core::domain::intent::{DetectionMethod, Intent, IntentResult};
use vendabot_core::domain::message::{DeliveryStatus, Direction, Message, MessageId, MessageType};
use vendabot_core::domain::reply::InteractiveReply;
use vendabot_core::domain::session::{CustomerSession, SessionStatus};
use vendabot_core::intent::IntentClassifier;
use vendabot_core::text::{fold, tokens};
use vendabot_db::repositories::{
    AutomationLogRepository, LeaseRepository, MessageRepository, OrderRepository,
    ProductRepository, RepositoryError,
};
use vendabot_whatsapp::{MessageTransport, TransportError};

use crate::classifier::ModelAssistedClassifier;
use crate::handlers::{intent_for_reply, HandlerContext, HandlerRegistry, HandlerResult, PAYMENT_DONE_ID};
use crate::llm::{LlmClient, LlmRequest, Role};
use crate::session::{SessionError, SessionManager};
use crate::templates::{format_brl, CannedTemplates, TemplateError, TemplateKey};

const RESET_PHRASES: &[&str] =
    &["reset", "reiniciar", "recomecar", "comecar de novo", "menu inicial", "zerar", "limpar tudo"];
const CONFIRMATION_WORDS: &[&str] = &["paguei", "pago", "enviei", "mandei", "transferi", "comprovante"];
const CONFIRMATION_PHRASES: &[&str] =
    &["pix feito", "fiz o pix", "pagamento feito", "pagamento realizado", "pagamento efetuado"];
const NEGATIONS: &[&str] = &["nao", "ainda"];
const PROMPT_CATALOG_LIMIT: usize = 30;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl OrchestratorError {
    /// Whether a later attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Repository(_) | Self::Template(TemplateError::Repository(_)) => true,
            Self::Session(SessionError::Repository(_)) => true,
            Self::Session(SessionError::Domain(_)) | Self::Template(TemplateError::Render { .. }) => false,
            Self::Transport(error) => error.is_retryable(),
        }
    }
}

/// The stored inbound message plus the business it was sent to.
#[derive(Clone, Debug)]
pub struct InboundContext {
    pub account: BusinessAccount,
    pub message: Message,
    /// Id of the tapped button or list row, if any.
    pub reply_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AutomationOutcome {
    pub kind: ResponseKind,
    pub intent: Option<Intent>,
    pub handler: Option<String>,
    pub outbound_message_id: Option<MessageId>,
    pub provider_message_id: Option<String>,
    pub used_model: bool,
    pub error: Option<String>,
    pub latency_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub use_llm: bool,
    pub model_assisted_classification: bool,
    pub llm_timeout: Duration,
    pub lease_ttl: chrono::Duration,
    pub context_messages: u32,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            use_llm: config.llm.enabled,
            model_assisted_classification: config.automation.model_assisted_classification,
            llm_timeout: Duration::from_secs(config.llm.timeout_secs.max(1)),
            lease_ttl: chrono::Duration::seconds(
                i64::try_from(config.automation.lease_secs).unwrap_or(i64::MAX / 1_000),
            ),
            context_messages: 10,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            use_llm: false,
            model_assisted_classification: false,
            llm_timeout: Duration::from_secs(8),
            lease_ttl: chrono::Duration::seconds(120),
            context_messages: 10,
        }
    }
}

pub struct OrchestratorDeps {
    pub registry: HandlerRegistry,
    pub sessions: SessionManager,
    pub products: Arc<dyn ProductRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub leases: Arc<dyn LeaseRepository>,
    pub logs: Arc<dyn AutomationLogRepository>,
    pub templates: CannedTemplates,
    pub transport: Arc<dyn MessageTransport>,
    pub classifier: Arc<IntentClassifier>,
    pub llm: Option<Arc<dyn LlmClient>>,
}

/// What to send, before delivery.
enum Reply {
    Text(String),
    Interactive(InteractiveReply),
    Silent,
}

/// Bookkeeping carried through the stages into the log entry.
#[derive(Default)]
struct Trace {
    intent: Option<Intent>,
    handler: Option<String>,
    used_model: bool,
    error: Option<String>,
}

pub struct AutomationOrchestrator {
    deps: OrchestratorDeps,
    settings: OrchestratorSettings,
    model_classifier: Option<ModelAssistedClassifier>,
}

impl AutomationOrchestrator {
    pub fn new(deps: OrchestratorDeps, settings: OrchestratorSettings) -> Self {
        let model_classifier = match (&deps.llm, settings.model_assisted_classification) {
            (Some(llm), true) => Some(ModelAssistedClassifier::new(
                llm.clone(),
                deps.classifier.clone(),
                settings.llm_timeout,
            )),
            _ => None,
        };
        Self { deps, settings, model_classifier }
    }

    fn model(&self) -> Option<&Arc<dyn LlmClient>> {
        self.deps.llm.as_ref().filter(|_| self.settings.use_llm)
    }

    /// Produces at most one reply for `inbound`. A message whose reply claim is
    /// already held yields `ResponseKind::None`.
    pub async fn handle(&self, inbound: InboundContext) -> Result<AutomationOutcome, OrchestratorError> {
        let started = Instant::now();
        let now = Utc::now();
        let mut trace = Trace::default();

        let result = self.run(&inbound, now, &mut trace).await;
        let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (kind, outbound, error) = match &result {
            Ok((kind, outbound)) => (*kind, outbound.as_ref(), trace.error.clone()),
            Err(error) => (ResponseKind::Error, None, Some(error.to_string())),
        };
        let outcome = AutomationOutcome {
            kind,
            intent: trace.intent,
            handler: trace.handler.clone(),
            outbound_message_id: outbound.map(|message| message.id.clone()),
            provider_message_id: outbound.and_then(|message| message.provider_message_id.clone()),
            used_model: trace.used_model,
            error,
            latency_ms,
        };
        self.record(&inbound, &outcome, now);

        result.map(|_| outcome)
    }

    async fn run(
        &self,
        inbound: &InboundContext,
        now: DateTime<Utc>,
        trace: &mut Trace,
    ) -> Result<(ResponseKind, Option<Message>), OrchestratorError> {
        if inbound.message.reply_claimed_at.is_some() {
            return Ok((ResponseKind::None, None));
        }
        let account = &inbound.account;
        let text = inbound.message.body.clone().unwrap_or_default();
        let session =
            self.deps.sessions.get_or_create(&account.id, &inbound.message.from_address, now).await?;

        let reply = if is_reset(&text) {
            trace.handler = Some("session.reset".to_string());
            self.deps.sessions.reset(session, now).await?;
            Reply::Text(self.deps.templates.render_plain(account, TemplateKey::SessionReset).await?)
        } else if matches!(session.status, SessionStatus::PaymentPending | SessionStatus::PaymentConfirmed)
            && is_payment_confirmation(inbound, &text)
        {
            // Already confirmed means a retry of this message or a repeat
            // notice; both get the same acknowledgement.
            trace.handler = Some("session.payment_confirmation".to_string());
            self.confirm_payment(account, session, now).await?
        } else {
            let detected = self.detect(inbound, &text).await;
            trace.intent = Some(detected.intent);
            self.dispatch(inbound, session, &detected, now, trace).await?
        };

        self.deliver(inbound, reply, now, trace).await
    }

    async fn confirm_payment(
        &self,
        account: &BusinessAccount,
        session: CustomerSession,
        now: DateTime<Utc>,
    ) -> Result<Reply, OrchestratorError> {
        let order = match session.order_id.as_ref() {
            Some(order_id) => self.deps.orders.find_by_id(order_id).await?,
            None => None,
        };
        let fallback = session.payment_reference.clone().unwrap_or_default();
        if session.status == SessionStatus::PaymentPending {
            self.deps.sessions.confirm_payment(session, now).await?;
        }

        let mut context = Context::new();
        context.insert("order_number", &order.map(|order| order.order_number).unwrap_or(fallback));
        Ok(Reply::Text(self.deps.templates.render(account, TemplateKey::PaymentReceived, context).await?))
    }

    async fn detect(&self, inbound: &InboundContext, text: &str) -> IntentResult {
        if let Some(intent) = inbound.reply_id.as_deref().and_then(intent_for_reply) {
            return IntentResult {
                intent,
                method: DetectionMethod::PatternMatch,
                confidence: 1.0,
                entities: self.deps.classifier.extract_entities(intent, text),
                text: text.to_string(),
            };
        }

        let detected = self.deps.classifier.detect(text);
        match (&self.model_classifier, detected.intent) {
            (Some(classifier), Intent::Unknown) if !text.trim().is_empty() => {
                classifier.classify(text).await
            }
            _ => detected,
        }
    }

    async fn dispatch(
        &self,
        inbound: &InboundContext,
        session: CustomerSession,
        detected: &IntentResult,
        now: DateTime<Utc>,
        trace: &mut Trace,
    ) -> Result<Reply, OrchestratorError> {
        let Some(handler) = self.deps.registry.get(detected.intent) else {
            return self
                .contain_fault(inbound, &session, format!("no handler for {}", detected.intent.as_str()), now, trace)
                .await;
        };
        trace.handler = Some(handler.name().to_string());

        let context = HandlerContext {
            account: inbound.account.clone(),
            session: session.clone(),
            message: inbound.message.clone(),
            reply_id: inbound.reply_id.clone(),
            now,
        };
        let outcome = AssertUnwindSafe(handler.handle(&context, detected)).catch_unwind().await;

        match outcome {
            Ok(Ok(HandlerResult::Text(text))) => Ok(Reply::Text(text)),
            Ok(Ok(HandlerResult::Interactive(reply))) => Ok(Reply::Interactive(reply)),
            Ok(Ok(HandlerResult::NoReply)) => Ok(Reply::Silent),
            Ok(Ok(HandlerResult::DelegateToModel)) => {
                let deep = detected.intent == Intent::ComplexQuery
                    || self.deps.classifier.requires_deep_reasoning(&detected.text);
                if deep && self.model().is_some() {
                    self.generate(inbound, &session, now, trace).await
                } else {
                    self.apology(&inbound.account).await
                }
            }
            Ok(Err(error)) => self.contain_fault(inbound, &session, error.to_string(), now, trace).await,
            Err(_) => {
                self.contain_fault(inbound, &session, "handler panicked".to_string(), now, trace).await
            }
        }
    }

    async fn contain_fault(
        &self,
        inbound: &InboundContext,
        session: &CustomerSession,
        error: String,
        now: DateTime<Utc>,
        trace: &mut Trace,
    ) -> Result<Reply, OrchestratorError> {
        warn!(
            event_name = "automation.handler.fault",
            business_id = %inbound.account.id.0,
            message_id = %inbound.message.id.0,
            handler = trace.handler.as_deref().unwrap_or("none"),
            error = %error,
            "handler fault contained"
        );
        trace.error = Some(error);
        if self.model().is_some() {
            self.generate(inbound, session, now, trace).await
        } else {
            self.apology(&inbound.account).await
        }
    }

    async fn apology(&self, account: &BusinessAccount) -> Result<Reply, OrchestratorError> {
        Ok(Reply::Text(self.deps.templates.render_plain(account, TemplateKey::Apology).await?))
    }

    /// Generative answer under the per-message lease. Losing the lease means
    /// another worker owns this message, so nothing is sent.
    async fn generate(
        &self,
        inbound: &InboundContext,
        session: &CustomerSession,
        now: DateTime<Utc>,
        trace: &mut Trace,
    ) -> Result<Reply, OrchestratorError> {
        let Some(llm) = self.model() else {
            return self.apology(&inbound.account).await;
        };
        let lease_key = format!("reply:{}", inbound.message.id.0);
        let holder = uuid::Uuid::new_v4().to_string();
        if !self.deps.leases.try_acquire(&lease_key, &holder, now, self.settings.lease_ttl).await? {
            info!(
                event_name = "automation.llm.lease_busy",
                message_id = %inbound.message.id.0,
                "message already being answered"
            );
            return Ok(Reply::Silent);
        }

        let answer = self.ask_model(llm.as_ref(), inbound, session).await;
        if let Err(error) = self.deps.leases.release(&lease_key, &holder).await {
            warn!(
                event_name = "automation.llm.lease_release_failed",
                message_id = %inbound.message.id.0,
                error = %error,
                "lease release failed; it will expire"
            );
        }

        match answer {
            Ok(text) => {
                trace.used_model = true;
                Ok(Reply::Text(text))
            }
            Err(error) => {
                warn!(
                    event_name = "automation.llm.failed",
                    message_id = %inbound.message.id.0,
                    error = %error,
                    "generative fallback failed"
                );
                trace.error.get_or_insert(error);
                self.apology(&inbound.account).await
            }
        }
    }

    async fn ask_model(
        &self,
        llm: &dyn LlmClient,
        inbound: &InboundContext,
        session: &CustomerSession,
    ) -> Result<String, String> {
        let account = &inbound.account;
        let catalog = self.deps.products.list_active(&account.id).await.map_err(|error| error.to_string())?;
        let history = self
            .deps
            .messages
            .recent_conversation(&account.id, &inbound.message.from_address, self.settings.context_messages)
            .await
            .map_err(|error| error.to_string())?;

        let mut request = LlmRequest::new(system_prompt(account, &catalog, session));
        for message in history.iter().filter(|message| message.id != inbound.message.id) {
            let role = match message.direction {
                Direction::Inbound => Role::User,
                Direction::Outbound => Role::Assistant,
            };
            request = request.push(role, message.body.as_deref().unwrap_or_default());
        }
        request = request.push(Role::User, inbound.message.body.as_deref().unwrap_or_default());

        match tokio::time::timeout(self.settings.llm_timeout, llm.complete(&request)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err(format!("model timed out after {}ms", self.settings.llm_timeout.as_millis())),
        }
    }

    async fn deliver(
        &self,
        inbound: &InboundContext,
        reply: Reply,
        now: DateTime<Utc>,
        trace: &mut Trace,
    ) -> Result<(ResponseKind, Option<Message>), OrchestratorError> {
        if matches!(reply, Reply::Silent) {
            return Ok((ResponseKind::None, None));
        }
        if !self.deps.messages.claim_reply(&inbound.message.id, now).await? {
            info!(
                event_name = "automation.reply.already_claimed",
                message_id = %inbound.message.id.0,
                "reply already sent for message"
            );
            return Ok((ResponseKind::None, None));
        }

        let phone_number_id = &inbound.account.phone_number_id;
        let to = &inbound.message.from_address;
        let sent = match &reply {
            Reply::Interactive(interactive) => {
                match self.deps.transport.send_interactive(phone_number_id, to, interactive).await {
                    Ok(id) => Ok((ResponseKind::Interactive, id, MessageType::Interactive, interactive.body().to_string())),
                    Err(error) => {
                        warn!(
                            event_name = "automation.reply.interactive_degraded",
                            message_id = %inbound.message.id.0,
                            error = %error,
                            "interactive send failed, sending text"
                        );
                        trace.error.get_or_insert(format!("interactive send failed: {error}"));
                        let text = interactive.flatten_text();
                        self.deps
                            .transport
                            .send_text(phone_number_id, to, &text)
                            .await
                            .map(|id| (ResponseKind::Text, id, MessageType::Text, text))
                    }
                }
            }
            Reply::Text(text) => self
                .deps
                .transport
                .send_text(phone_number_id, to, text)
                .await
                .map(|id| (ResponseKind::Text, id, MessageType::Text, text.clone())),
            Reply::Silent => return Ok((ResponseKind::None, None)),
        };

        let (kind, provider_id, message_type, body) = match sent {
            Ok(sent) => sent,
            Err(error) => {
                self.deps.messages.release_reply_claim(&inbound.message.id).await?;
                return Err(error.into());
            }
        };

        let content = match &reply {
            Reply::Interactive(interactive) if message_type == MessageType::Interactive => {
                serde_json::to_value(interactive).ok()
            }
            _ => None,
        };
        let mut outbound = Message::outbound(
            inbound.account.id.clone(),
            message_type,
            inbound.account.display_phone_number.clone(),
            to.clone(),
            Some(body),
            content,
            now,
        );
        outbound.provider_message_id = Some(provider_id);
        outbound.apply_status(DeliveryStatus::Sent, now, None).map_err(SessionError::from)?;
        self.deps.messages.save(outbound.clone()).await?;

        let kind = if trace.used_model { ResponseKind::Delegated } else { kind };
        Ok((kind, Some(outbound)))
    }

    /// Writes the log entry off the reply path; a failed write is only traced.
    fn record(&self, inbound: &InboundContext, outcome: &AutomationOutcome, now: DateTime<Utc>) {
        let log = AutomationLog {
            id: AutomationLogId(uuid::Uuid::new_v4().to_string()),
            business_id: inbound.account.id.clone(),
            message_id: Some(inbound.message.id.clone()),
            phone_number: inbound.message.from_address.clone(),
            intent: outcome.intent,
            handler: outcome.handler.clone(),
            response_kind: outcome.kind,
            latency_ms: outcome.latency_ms,
            error: outcome.error.clone(),
            created_at: now,
        };
        info!(
            event_name = reply_event_name(outcome.kind),
            business_id = %inbound.account.id.0,
            message_id = %inbound.message.id.0,
            intent = outcome.intent.map(|intent| intent.as_str()).unwrap_or("none"),
            handler = outcome.handler.as_deref().unwrap_or("none"),
            latency_ms = outcome.latency_ms,
            used_model = outcome.used_model,
            "automation outcome"
        );

        let logs = self.deps.logs.clone();
        tokio::spawn(async move {
            if let Err(error) = logs.append(log).await {
                warn!(
                    event_name = "automation.log.write_failed",
                    error = %error,
                    "automation log write failed"
                );
            }
        });
    }
}

fn reply_event_name(kind: ResponseKind) -> &'static str {
    match kind {
        ResponseKind::Text => "automation.reply.text",
        ResponseKind::Interactive => "automation.reply.interactive",
        ResponseKind::Delegated => "automation.reply.delegated",
        ResponseKind::None => "automation.reply.none",
        ResponseKind::Error => "automation.reply.error",
    }
}

fn system_prompt(
    account: &BusinessAccount,
    catalog: &[vendabot_core::domain::product::Product],
    session: &CustomerSession,
) -> String {
    let mut prompt = format!(
        "Você é o atendente virtual da {} no WhatsApp. Responda em português, de forma curta e \
         cordial. Use somente os produtos e preços abaixo; nunca invente itens, preços, prazos ou \
         status de pedido. Se não souber, diga que vai chamar alguém da equipe.\n\nCardápio:\n",
        account.name
    );
    if catalog.is_empty() {
        prompt.push_str("(sem produtos disponíveis)\n");
    }
    for product in catalog.iter().take(PROMPT_CATALOG_LIMIT) {
        prompt.push_str(&format!("- {}: {}", product.name, format_brl(product.price)));
        if let Some(description) = product.description.as_deref().filter(|text| !text.is_empty()) {
            prompt.push_str(&format!(" ({description})"));
        }
        prompt.push('\n');
    }
    if !session.cart.is_empty() {
        prompt.push_str("\nCarrinho atual do cliente:\n");
        for item in &session.cart {
            prompt.push_str(&format!("- {}x {}\n", item.quantity, item.name));
        }
        prompt.push_str(&format!("Total: {}\n", format_brl(session.cart_total)));
    }
    prompt
}

fn is_reset(text: &str) -> bool {
    let normalized = tokens(text).join(" ");
    RESET_PHRASES.contains(&normalized.as_str())
}

fn is_payment_confirmation(inbound: &InboundContext, text: &str) -> bool {
    if inbound.reply_id.as_deref() == Some(PAYMENT_DONE_ID) {
        return true;
    }
    if matches!(inbound.message.message_type, MessageType::Image | MessageType::Document) {
        return true;
    }
    let words = tokens(text);
    if words.iter().any(|word| NEGATIONS.contains(&word.as_str())) {
        return false;
    }
    let folded = fold(text);
    words.iter().any(|word| CONFIRMATION_WORDS.contains(&word.as_str()))
        || CONFIRMATION_PHRASES.iter().any(|phrase| folded.contains(phrase))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use vendabot_core::domain::automation::ResponseKind;
    use vendabot_core::domain::intent::{Intent, IntentResult};
    use vendabot_core::domain::message::{Message, MessageType};
    use vendabot_core::domain::session::SessionStatus;
    use vendabot_core::intent::IntentClassifier;
    use vendabot_db::repositories::{AutomationLogRepository, LeaseRepository, MessageRepository};
    use vendabot_whatsapp::TransportError;

    use super::{
        is_payment_confirmation, is_reset, AutomationOrchestrator, InboundContext, OrchestratorDeps,
        OrchestratorError, OrchestratorSettings,
    };
    use crate::handlers::{HandlerContext, HandlerError, HandlerRegistry, HandlerResult, IntentHandler};
    use crate::llm::{LlmClient, ScriptedLlm};
    use crate::templates::TemplateKey;
    use crate::test_support::Fixture;

    struct PanickingHandler;

    #[async_trait]
    impl IntentHandler for PanickingHandler {
        fn name(&self) -> &'static str {
            "test.panicking"
        }

        async fn handle(
            &self,
            _context: &HandlerContext,
            _intent: &IntentResult,
        ) -> Result<HandlerResult, HandlerError> {
            panic!("handler bug")
        }
    }

    fn orchestrator_with(
        fixture: &Fixture,
        registry: HandlerRegistry,
        llm: Option<Arc<dyn LlmClient>>,
        settings: OrchestratorSettings,
    ) -> AutomationOrchestrator {
        AutomationOrchestrator::new(
            OrchestratorDeps {
                registry,
                sessions: fixture.session_manager(),
                products: fixture.products.clone(),
                orders: fixture.orders.clone(),
                messages: fixture.messages.clone(),
                leases: fixture.leases.clone(),
                logs: fixture.logs.clone(),
                templates: fixture.canned(),
                transport: fixture.transport.clone(),
                classifier: Arc::new(IntentClassifier::new().expect("patterns")),
                llm,
            },
            settings,
        )
    }

    fn orchestrator(fixture: &Fixture) -> AutomationOrchestrator {
        orchestrator_with(
            fixture,
            HandlerRegistry::standard(fixture.commerce()),
            None,
            OrchestratorSettings::default(),
        )
    }

    fn with_model(fixture: &Fixture, llm: Arc<ScriptedLlm>, timeout: Duration) -> AutomationOrchestrator {
        let settings = OrchestratorSettings { use_llm: true, llm_timeout: timeout, ..OrchestratorSettings::default() };
        orchestrator_with(fixture, HandlerRegistry::standard(fixture.commerce()), Some(llm), settings)
    }

    async fn inbound(fixture: &Fixture, text: &str) -> InboundContext {
        InboundContext { account: fixture.account.clone(), message: fixture.inbound(text).await, reply_id: None }
    }

    fn sent_text(body: &serde_json::Value) -> String {
        match body["type"].as_str() {
            Some("text") => body["text"]["body"].as_str().unwrap_or_default().to_string(),
            _ => body["interactive"]["body"]["text"].as_str().unwrap_or_default().to_string(),
        }
    }

    async fn logged(fixture: &Fixture, expected: usize) -> usize {
        for _ in 0..50 {
            let logs = fixture.logs.list_for_business(&fixture.account.id, 20).await.expect("logs");
            if logs.len() >= expected {
                return logs.len();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        0
    }

    #[tokio::test]
    async fn order_message_gets_interactive_payment_reply_and_log() {
        let fixture = Fixture::with_catalog().await;
        let outcome = orchestrator(&fixture).handle(inbound(&fixture, "2 rondelli de frango").await).await.expect("handled");

        assert_eq!(outcome.kind, ResponseKind::Interactive);
        assert_eq!(outcome.intent, Some(Intent::AddToCart));
        assert_eq!(outcome.handler.as_deref(), Some("commerce.add_to_cart"));
        assert_eq!(outcome.provider_message_id.as_deref(), Some("wamid.sent.1"));

        let sent = fixture.transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].phone_number_id, "1111");
        let session = fixture.open_session().await;
        let code = session.payment_code.expect("payment code");
        assert!(sent_text(&sent[0].body).contains(&code));

        let outbound_id = outcome.outbound_message_id.expect("outbound stored");
        let stored = fixture.messages.find_by_id(&outbound_id).await.expect("find").expect("stored");
        assert_eq!(stored.message_type, MessageType::Interactive);
        assert!(stored.sent_at.is_some());
        assert_eq!(logged(&fixture, 1).await, 1);
    }

    #[tokio::test]
    async fn replayed_message_is_answered_once() {
        let fixture = Fixture::with_catalog().await;
        let orchestrator = orchestrator(&fixture);
        let context = inbound(&fixture, "2 rondelli de frango").await;

        orchestrator.handle(context.clone()).await.expect("first");
        let replay = orchestrator.handle(context).await.expect("replay");

        assert_eq!(replay.kind, ResponseKind::None);
        assert_eq!(fixture.transport.sent().await.len(), 1);
        let session = fixture.open_session().await;
        assert_eq!(session.cart[0].quantity, 2);
    }

    #[tokio::test]
    async fn claimed_message_short_circuits() {
        let fixture = Fixture::with_catalog().await;
        let mut context = inbound(&fixture, "oi").await;
        context.message.reply_claimed_at = Some(Utc::now());

        let outcome = orchestrator(&fixture).handle(context).await.expect("handled");
        assert_eq!(outcome.kind, ResponseKind::None);
        assert!(fixture.transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn failed_interactive_send_degrades_to_text() {
        let fixture = Fixture::with_catalog().await;
        fixture
            .transport
            .fail_next_interactive(TransportError::NonRetryable { status: Some(400), code: Some(131009), message: "bad param".into() })
            .await;

        let outcome = orchestrator(&fixture).handle(inbound(&fixture, "cardápio").await).await.expect("handled");

        assert_eq!(outcome.kind, ResponseKind::Text);
        assert!(outcome.error.as_deref().is_some_and(|error| error.contains("interactive send failed")));
        let sent = fixture.transport.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent_text(&sent[0].body).contains("Rondelli de Frango"));
    }

    #[tokio::test]
    async fn transport_failure_releases_the_claim() {
        let fixture = Fixture::with_catalog().await;
        fixture.transport.fail_next(TransportError::Retryable { status: Some(503), message: "busy".into() }).await;
        let context = inbound(&fixture, "oi").await;
        let message_id = context.message.id.clone();

        let error = orchestrator(&fixture).handle(context).await.expect_err("send fails");
        assert!(matches!(error, OrchestratorError::Transport(_)));
        assert!(error.is_retryable());

        let stored: Message = fixture.messages.find_by_id(&message_id).await.expect("find").expect("stored");
        assert!(stored.reply_claimed_at.is_none());
        assert_eq!(logged(&fixture, 1).await, 1);
    }

    #[tokio::test]
    async fn handler_panic_becomes_apology() {
        let fixture = Fixture::with_catalog().await;
        let mut registry = HandlerRegistry::standard(fixture.commerce());
        registry.register(Intent::Greeting, PanickingHandler);
        let orchestrator = orchestrator_with(&fixture, registry, None, OrchestratorSettings::default());

        let outcome = orchestrator.handle(inbound(&fixture, "oi").await).await.expect("contained");

        assert_eq!(outcome.kind, ResponseKind::Text);
        assert_eq!(outcome.error.as_deref(), Some("handler panicked"));
        let apology = fixture.canned().render_plain(&fixture.account, TemplateKey::Apology).await.expect("apology");
        assert_eq!(sent_text(&fixture.transport.sent().await[0].body), apology);
    }

    #[tokio::test]
    async fn reset_clears_the_cart() {
        let fixture = Fixture::with_catalog().await;
        fixture.seed_cart(3).await;

        let outcome = orchestrator(&fixture).handle(inbound(&fixture, "Reiniciar").await).await.expect("reset");

        assert_eq!(outcome.handler.as_deref(), Some("session.reset"));
        let session = fixture.open_session().await;
        assert!(session.cart.is_empty());
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn payment_confirmation_moves_session_forward() {
        let fixture = Fixture::with_catalog().await;
        let orchestrator = orchestrator(&fixture);
        orchestrator.handle(inbound(&fixture, "2 rondelli de frango").await).await.expect("order");

        let outcome = orchestrator.handle(inbound(&fixture, "já paguei").await).await.expect("confirm");

        assert_eq!(outcome.handler.as_deref(), Some("session.payment_confirmation"));
        let session = fixture.open_session().await;
        assert_eq!(session.status, SessionStatus::PaymentConfirmed);
        let sent = fixture.transport.sent().await;
        assert!(sent_text(&sent[1].body).contains("Recebemos seu aviso de pagamento"));
    }

    #[tokio::test]
    async fn retried_payment_confirmation_still_acknowledges() {
        let fixture = Fixture::with_catalog().await;
        let orchestrator = orchestrator(&fixture);
        orchestrator.handle(inbound(&fixture, "2 rondelli de frango").await).await.expect("order");
        fixture.transport.fail_next(TransportError::Retryable { status: Some(503), message: "busy".into() }).await;
        let context = inbound(&fixture, "já paguei").await;

        orchestrator.handle(context.clone()).await.expect_err("first send fails");
        assert_eq!(fixture.open_session().await.status, SessionStatus::PaymentConfirmed);
        let retry = orchestrator.handle(context).await.expect("retry");

        assert_eq!(retry.handler.as_deref(), Some("session.payment_confirmation"));
        assert_eq!(retry.intent, None);
        let sent = fixture.transport.sent().await;
        assert_eq!(sent.len(), 2);
        assert!(sent_text(&sent[1].body).contains("Recebemos seu aviso de pagamento"));
        assert_eq!(fixture.open_session().await.status, SessionStatus::PaymentConfirmed);
    }

    #[tokio::test]
    async fn retried_reset_reuses_the_fresh_session() {
        let fixture = Fixture::with_catalog().await;
        fixture.seed_cart(2).await;
        let orchestrator = orchestrator(&fixture);
        fixture.transport.fail_next(TransportError::Retryable { status: Some(503), message: "busy".into() }).await;
        let context = inbound(&fixture, "reiniciar").await;

        orchestrator.handle(context.clone()).await.expect_err("first send fails");
        let fresh = fixture.open_session().await;
        let retry = orchestrator.handle(context).await.expect("retry");

        assert_eq!(retry.handler.as_deref(), Some("session.reset"));
        assert_eq!(fixture.open_session().await.id, fresh.id);
        let reset = fixture.canned().render_plain(&fixture.account, TemplateKey::SessionReset).await.expect("reset");
        assert_eq!(sent_text(&fixture.transport.sent().await[0].body), reset);
    }

    #[tokio::test]
    async fn confirmation_words_respect_negation() {
        let fixture = Fixture::new().await;
        let context = inbound(&fixture, "ainda não paguei").await;
        assert!(!is_payment_confirmation(&context, "ainda não paguei"));
        assert!(is_payment_confirmation(&context, "fiz o pix agora"));

        let mut tapped = context.clone();
        tapped.reply_id = Some("payment_done".to_string());
        assert!(is_payment_confirmation(&tapped, ""));

        assert!(is_reset("  Começar de novo "));
        assert!(!is_reset("quero reiniciar meu pedido de lasanha"));
    }

    #[tokio::test]
    async fn complex_query_is_answered_by_the_model() {
        let fixture = Fixture::with_catalog().await;
        let llm = Arc::new(ScriptedLlm::new());
        llm.answer("O rondelli é enrolado e recheado de frango.").await;
        let orchestrator = with_model(&fixture, llm.clone(), Duration::from_secs(2));

        let outcome = orchestrator
            .handle(inbound(&fixture, "qual a diferença entre o rondelli e o nhoque?").await)
            .await
            .expect("handled");

        assert_eq!(outcome.kind, ResponseKind::Delegated);
        assert!(outcome.used_model);
        let requests = llm.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].system.contains("Rondelli de Frango: R$ 34,90"));
        assert_eq!(
            sent_text(&fixture.transport.sent().await[0].body),
            "O rondelli é enrolado e recheado de frango."
        );
    }

    #[tokio::test]
    async fn held_reply_lease_keeps_a_second_worker_silent() {
        let fixture = Fixture::with_catalog().await;
        let llm = Arc::new(ScriptedLlm::new());
        llm.answer("resposta duplicada").await;
        let orchestrator = with_model(&fixture, llm.clone(), Duration::from_secs(2));
        let context = inbound(&fixture, "qual a diferença entre o rondelli e o nhoque?").await;
        let key = format!("reply:{}", context.message.id.0);
        let held = fixture
            .leases
            .try_acquire(&key, "other-worker", Utc::now(), chrono::Duration::seconds(120))
            .await
            .expect("acquire");
        assert!(held);

        let outcome = orchestrator.handle(context).await.expect("handled");

        assert_eq!(outcome.kind, ResponseKind::None);
        assert!(!outcome.used_model);
        assert!(llm.requests().await.is_empty());
        assert!(fixture.transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn complex_query_without_model_gets_apology() {
        let fixture = Fixture::with_catalog().await;
        let outcome = orchestrator(&fixture)
            .handle(inbound(&fixture, "qual a diferença entre o rondelli e o nhoque?").await)
            .await
            .expect("handled");

        assert_eq!(outcome.kind, ResponseKind::Text);
        assert!(!outcome.used_model);
        let apology = fixture.canned().render_plain(&fixture.account, TemplateKey::Apology).await.expect("apology");
        assert_eq!(sent_text(&fixture.transport.sent().await[0].body), apology);
    }

    #[tokio::test]
    async fn model_timeout_falls_back_to_apology() {
        let fixture = Fixture::with_catalog().await;
        let llm = Arc::new(ScriptedLlm::with_delay(Duration::from_millis(200)));
        llm.answer("tarde demais").await;
        let orchestrator = with_model(&fixture, llm, Duration::from_millis(20));

        let outcome = orchestrator
            .handle(inbound(&fixture, "qual a diferença entre o rondelli e o nhoque?").await)
            .await
            .expect("handled");

        assert_eq!(outcome.kind, ResponseKind::Text);
        assert!(outcome.error.as_deref().is_some_and(|error| error.contains("timed out")));
        let body = sent_text(&fixture.transport.sent().await[0].body);
        assert!(body.starts_with("Desculpe"));
    }
}

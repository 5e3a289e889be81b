//! Conversation runtime for inbound customer messages.
//!
//! One inbound message flows through the [`orchestrator`]:
//! 1. **Session short-circuit** (`session`): reset keywords and payment
//!    confirmations are handled before classification.
//! 2. **Intent detection**: the deterministic classifier from `vendabot-core`,
//!    optionally backed by the model-assisted `classifier`.
//! 3. **Handler dispatch** (`handlers`): canned templates and deterministic
//!    commerce handlers.
//! 4. **Generative fallback** (`llm`): only for open-ended questions, behind a
//!    lease and a timeout.
//!
//! # Safety Principle
//!
//! The model never decides prices, products, or order state. Those come from
//! the catalog and order repositories; the model only phrases answers.

pub mod classifier;
pub mod handlers;
pub mod llm;
pub mod orchestrator;
pub mod payment;
pub mod reminders;
pub mod session;
pub mod templates;

#[cfg(test)]
pub(crate) mod test_support;

pub use classifier::ModelAssistedClassifier;
pub use handlers::{CommerceDeps, HandlerContext, HandlerError, HandlerRegistry, HandlerResult, IntentHandler};
pub use llm::{ChatTurn, LlmClient, LlmError, LlmRequest, OpenAiCompatibleClient, ScriptedLlm};
pub use orchestrator::{
    AutomationOrchestrator, AutomationOutcome, InboundContext, OrchestratorDeps, OrchestratorError,
    OrchestratorSettings,
};
pub use payment::{PaymentCode, PaymentError, PaymentGateway, StaticPixGateway};
pub use reminders::{ReminderService, SweepReport};
pub use session::SessionManager;
pub use templates::{CannedTemplates, TemplateError, TemplateKey};

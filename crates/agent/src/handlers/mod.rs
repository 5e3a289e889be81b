//! Deterministic reply handlers, one per intent.

mod canned;
mod cart;
mod catalog;
mod orders;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use vendabot_core::domain::account::BusinessAccount;
use vendabot_core::domain::intent::{Intent, IntentResult};
use vendabot_core::domain::message::Message;
use vendabot_core::domain::reply::InteractiveReply;
use vendabot_core::domain::session::CustomerSession;
use vendabot_db::repositories::{OrderRepository, ProductRepository, RepositoryError};

use crate::payment::{PaymentError, PaymentGateway};
use crate::session::{SessionError, SessionManager};
use crate::templates::{CannedTemplates, TemplateError, TemplateKey};

pub use canned::{CannedReplyHandler, DelegateHandler};
pub use cart::{AddToCartHandler, ViewCartHandler};
pub use catalog::{CatalogHandler, PriceCheckHandler};
pub use orders::{CancelOrderHandler, CreateOrderHandler, PaymentInfoHandler, TrackOrderHandler};

/// Reply ids carried back by interactive buttons and list rows.
pub const PAYMENT_DONE_ID: &str = "payment_done";
pub const CANCEL_ORDER_ID: &str = "cancel_order";
pub const CHECKOUT_ID: &str = "checkout";
pub const CATALOG_ID: &str = "catalog";
pub const PRODUCT_ID_PREFIX: &str = "product:";

/// Maps an interactive reply id to the intent it stands for.
pub fn intent_for_reply(reply_id: &str) -> Option<Intent> {
    match reply_id {
        CANCEL_ORDER_ID => Some(Intent::CancelOrder),
        CHECKOUT_ID => Some(Intent::CreateOrder),
        CATALOG_ID => Some(Intent::Catalog),
        id if id.starts_with(PRODUCT_ID_PREFIX) => Some(Intent::AddToCart),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Text(String),
    Interactive(InteractiveReply),
    /// The handler cannot answer; the generative fallback should.
    DelegateToModel,
    NoReply,
}

/// Everything a handler may read about the message being answered.
#[derive(Clone, Debug)]
pub struct HandlerContext {
    pub account: BusinessAccount,
    pub session: CustomerSession,
    /// The stored inbound message.
    pub message: Message,
    pub reply_id: Option<String>,
    pub now: DateTime<Utc>,
}

impl HandlerContext {
    /// Stable id for side effects derived from this message.
    pub fn source_id(&self) -> &str {
        self.message.provider_message_id.as_deref().unwrap_or(&self.message.id.0)
    }
}

#[async_trait]
pub trait IntentHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        context: &HandlerContext,
        intent: &IntentResult,
    ) -> Result<HandlerResult, HandlerError>;
}

/// Collaborators shared by the commerce handlers.
#[derive(Clone)]
pub struct CommerceDeps {
    pub products: Arc<dyn ProductRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub sessions: SessionManager,
    pub payments: Arc<dyn PaymentGateway>,
    pub templates: CannedTemplates,
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Intent, Arc<dyn IntentHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One handler per intent; a later registration replaces the earlier one.
    pub fn register<H>(&mut self, intent: Intent, handler: H)
    where
        H: IntentHandler + 'static,
    {
        self.handlers.insert(intent, Arc::new(handler));
    }

    pub fn get(&self, intent: Intent) -> Option<Arc<dyn IntentHandler>> {
        self.handlers.get(&intent).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// The full handler set for a commerce account.
    pub fn standard(deps: CommerceDeps) -> Self {
        let mut registry = Self::new();
        let canned = |name, key| CannedReplyHandler::new(name, key, deps.templates.clone());

        registry.register(Intent::Greeting, canned("canned.greeting", TemplateKey::Greeting));
        registry.register(Intent::Thanks, canned("canned.thanks", TemplateKey::Thanks));
        registry.register(Intent::Farewell, canned("canned.farewell", TemplateKey::Farewell));
        registry.register(
            Intent::BusinessHours,
            canned("canned.business_hours", TemplateKey::BusinessHours),
        );
        registry.register(Intent::Delivery, canned("canned.delivery", TemplateKey::Delivery));
        registry.register(
            Intent::HumanHandoff,
            canned("canned.human_handoff", TemplateKey::HumanHandoff),
        );
        registry.register(Intent::Unknown, canned("canned.clarify", TemplateKey::Unknown));
        registry.register(Intent::ComplexQuery, DelegateHandler);

        registry.register(Intent::Catalog, CatalogHandler::new(deps.clone()));
        registry.register(Intent::PriceCheck, PriceCheckHandler::new(deps.clone()));
        registry.register(Intent::AddToCart, AddToCartHandler::new(deps.clone()));
        registry.register(Intent::ViewCart, ViewCartHandler::new(deps.clone()));
        registry.register(Intent::CreateOrder, CreateOrderHandler::new(deps.clone()));
        registry.register(Intent::CancelOrder, CancelOrderHandler::new(deps.clone()));
        registry.register(Intent::TrackOrder, TrackOrderHandler::new(deps.clone()));
        registry.register(Intent::PaymentInfo, PaymentInfoHandler::new(deps));
        registry
    }
}

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;

use vendabot_core::domain::account::{BusinessAccount, BusinessId};
use vendabot_core::domain::intent::IntentResult;
use vendabot_core::domain::message::{Message, MessageType};
use vendabot_core::domain::order::{LineItem, Order, OrderId, OrderStatus};
use vendabot_core::domain::product::{Product, ProductId};
use vendabot_core::domain::session::CustomerSession;
use vendabot_core::intent::IntentClassifier;
use vendabot_db::repositories::{
    AccountRepository, InMemoryAccountRepository, InMemoryAutomationLogRepository,
    InMemoryLeaseRepository, InMemoryMessageRepository, InMemoryOrderRepository,
    InMemoryProductRepository, InMemorySessionRepository, InMemoryTemplateRepository,
    MessageRepository, ProductRepository, SessionRepository,
};
use vendabot_whatsapp::RecordingTransport;

use crate::handlers::{CommerceDeps, HandlerContext};
use crate::payment::StaticPixGateway;
use crate::session::SessionManager;
use crate::templates::CannedTemplates;

pub(crate) const CUSTOMER: &str = "5511988887777";

pub(crate) fn account() -> BusinessAccount {
    let now = Utc::now();
    BusinessAccount {
        id: BusinessId("biz-1".to_string()),
        name: "Cantina da Nona".to_string(),
        phone_number_id: "1111".to_string(),
        display_phone_number: "5511999990000".to_string(),
        workspace_id: Some("waba-1".to_string()),
        pix_key: Some("nona@example.com".to_string()),
        merchant_city: "Sao Paulo".to_string(),
        active: true,
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn order(number: &str, total: Decimal) -> Order {
    let now = Utc::now();
    Order {
        id: OrderId(format!("order-{number}")),
        business_id: BusinessId("biz-1".to_string()),
        order_number: number.to_string(),
        customer_phone: CUSTOMER.to_string(),
        items: Vec::new(),
        total,
        status: OrderStatus::PendingPayment,
        payment_reference: None,
        payment_code: None,
        idempotency_key: format!("ord_{number}"),
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn product(id: &str, name: &str, cents: i64, keywords: &[&str]) -> Product {
    Product {
        id: ProductId(id.to_string()),
        business_id: BusinessId("biz-1".to_string()),
        name: name.to_string(),
        description: Some("Massa fresca da casa".to_string()),
        price: Decimal::new(cents, 2),
        keywords: keywords.iter().map(|keyword| keyword.to_string()).collect(),
        active: true,
    }
}

pub(crate) fn detect(text: &str) -> IntentResult {
    IntentClassifier::new().expect("patterns").detect(text)
}

/// In-memory collaborators for one business and one customer.
pub(crate) struct Fixture {
    pub account: BusinessAccount,
    pub accounts: Arc<InMemoryAccountRepository>,
    pub products: Arc<InMemoryProductRepository>,
    pub orders: Arc<InMemoryOrderRepository>,
    pub sessions: Arc<InMemorySessionRepository>,
    pub messages: Arc<InMemoryMessageRepository>,
    pub templates: Arc<InMemoryTemplateRepository>,
    pub leases: Arc<InMemoryLeaseRepository>,
    pub logs: Arc<InMemoryAutomationLogRepository>,
    pub transport: Arc<RecordingTransport>,
    counter: AtomicU32,
}

impl Fixture {
    pub async fn new() -> Self {
        let fixture = Self {
            account: account(),
            accounts: Arc::new(InMemoryAccountRepository::default()),
            products: Arc::new(InMemoryProductRepository::default()),
            orders: Arc::new(InMemoryOrderRepository::default()),
            sessions: Arc::new(InMemorySessionRepository::default()),
            messages: Arc::new(InMemoryMessageRepository::default()),
            templates: Arc::new(InMemoryTemplateRepository::default()),
            leases: Arc::new(InMemoryLeaseRepository::default()),
            logs: Arc::new(InMemoryAutomationLogRepository::default()),
            transport: Arc::new(RecordingTransport::new()),
            counter: AtomicU32::new(0),
        };
        fixture.accounts.save(fixture.account.clone()).await.expect("save account");
        fixture
    }

    pub async fn with_catalog() -> Self {
        let fixture = Self::new().await;
        for product in [
            product("p1", "Rondelli de Frango", 3490, &["rondeli"]),
            product("p2", "Lasanha Bolonhesa", 4200, &["lasagna"]),
            product("p3", "Nhoque ao Sugo", 2990, &["gnocchi"]),
        ] {
            fixture.products.save(product).await.expect("save product");
        }
        fixture
    }

    pub fn session_manager(&self) -> SessionManager {
        SessionManager::new(self.sessions.clone(), 7)
    }

    pub fn canned(&self) -> CannedTemplates {
        CannedTemplates::new(self.templates.clone()).expect("templates")
    }

    pub fn commerce(&self) -> CommerceDeps {
        CommerceDeps {
            products: self.products.clone(),
            orders: self.orders.clone(),
            sessions: self.session_manager(),
            payments: Arc::new(StaticPixGateway::new()),
            templates: self.canned(),
        }
    }

    /// Stores a fresh inbound text message from the customer.
    pub async fn inbound(&self, text: &str) -> Message {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let message = Message::inbound(
            self.account.id.clone(),
            format!("wamid.in.{n}"),
            MessageType::Text,
            CUSTOMER,
            self.account.display_phone_number.clone(),
            Some(text.to_string()),
            None,
            Utc::now(),
        );
        self.messages.insert_if_absent(message.clone()).await.expect("store inbound");
        message
    }

    pub async fn context(&self, text: &str) -> HandlerContext {
        HandlerContext {
            account: self.account.clone(),
            session: self.open_session().await,
            message: self.inbound(text).await,
            reply_id: None,
            now: Utc::now(),
        }
    }

    pub async fn open_session(&self) -> CustomerSession {
        self.sessions.get_or_create(&self.account.id, CUSTOMER, Utc::now()).await.expect("session")
    }

    pub async fn seed_cart(&self, quantity: u32) {
        let session = self.open_session().await;
        let item = LineItem {
            product_id: ProductId("p1".to_string()),
            name: "Rondelli de Frango".to_string(),
            quantity,
            unit_price: Decimal::new(3490, 2),
        };
        self.session_manager().update_cart(session, vec![item], Utc::now()).await.expect("seed cart");
    }
}

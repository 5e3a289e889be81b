pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod idempotency;
pub mod intent;
pub mod pix;
pub mod text;

pub use chrono;
pub use rust_decimal;

pub use catalog::{CatalogMatcher, ProductMatch};
pub use dispatch::{DispatchConfig, DispatchError, EventProcessingEngine, RetryPolicy};
pub use domain::account::{BusinessAccount, BusinessId};
pub use domain::automation::{AutomationLog, AutomationLogId, ResponseKind};
pub use domain::intent::{DetectionMethod, Intent, IntentEntities, IntentResult};
pub use domain::message::{DeliveryStatus, Direction, Message, MessageId, MessageType};
pub use domain::order::{LineItem, Order, OrderId, OrderStatus};
pub use domain::product::{Product, ProductId};
pub use domain::reply::{InteractiveReply, ListRow, ListSection, ReplyButton};
pub use domain::session::{CustomerSession, NotificationType, SessionId, SessionStatus};
pub use domain::webhook_event::{EventKind, ProcessingStatus, WebhookEvent, WebhookEventId};
pub use errors::DomainError;
pub use intent::IntentClassifier;

pub mod account;
pub mod automation;
pub mod intent;
pub mod message;
pub mod order;
pub mod product;
pub mod reply;
pub mod session;
pub mod webhook_event;

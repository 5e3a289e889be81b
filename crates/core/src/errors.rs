use thiserror::Error;

use crate::domain::message::DeliveryStatus;
use crate::domain::session::SessionStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid session transition from {from:?} to {to:?}")]
    InvalidSessionTransition { from: SessionStatus, to: SessionStatus },
    #[error("delivery status {status:?} does not apply to {direction} messages")]
    InvalidDeliveryStatus { status: DeliveryStatus, direction: &'static str },
}

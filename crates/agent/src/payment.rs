use async_trait::async_trait;
use thiserror::Error;

use vendabot_core::domain::account::BusinessAccount;
use vendabot_core::domain::order::Order;
use vendabot_core::pix::{PixError, PixPayload};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("business {0} has no pix key configured")]
    MissingPixKey(String),
    #[error(transparent)]
    Pix(#[from] PixError),
    #[error("payment provider failure: {0}")]
    Provider(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentCode {
    /// Transaction id the customer's bank echoes back.
    pub reference: String,
    /// Copy-and-paste payload shown to the customer.
    pub code: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_code(
        &self,
        account: &BusinessAccount,
        order: &Order,
    ) -> Result<PaymentCode, PaymentError>;
}

/// Encodes a static PIX payload from the business's own key. No network call.
#[derive(Clone, Debug, Default)]
pub struct StaticPixGateway;

impl StaticPixGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentGateway for StaticPixGateway {
    async fn request_code(
        &self,
        account: &BusinessAccount,
        order: &Order,
    ) -> Result<PaymentCode, PaymentError> {
        let key = account
            .pix_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| PaymentError::MissingPixKey(account.id.0.clone()))?;

        let reference = format!("PED{}", order.order_number);
        let code = PixPayload {
            key: key.to_string(),
            merchant_name: account.name.clone(),
            merchant_city: account.merchant_city.clone(),
            amount: order.total,
            txid: reference.clone(),
        }
        .encode()?;

        Ok(PaymentCode { reference, code })
    }
}

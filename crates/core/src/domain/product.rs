use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::account::BusinessId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub business_id: BusinessId,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub keywords: Vec<String>,
    pub active: bool,
}

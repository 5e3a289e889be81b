use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::account::BusinessId;
use crate::domain::product::ProductId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

/// One product and quantity, used both for cart snapshots and placed orders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

pub fn items_total(items: &[LineItem]) -> Decimal {
    items.iter().map(LineItem::subtotal).sum()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    PendingPayment,
    Paid,
    Preparing,
    OutForDelivery,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Preparing => "preparing",
            Self::OutForDelivery => "out_for_delivery",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending_payment" => Some(Self::PendingPayment),
            "paid" => Some(Self::Paid),
            "preparing" => Some(Self::Preparing),
            "out_for_delivery" => Some(Self::OutForDelivery),
            "delivered" => Some(Self::Delivered),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Customer-facing Portuguese label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PendingPayment => "aguardando pagamento",
            Self::Paid => "pagamento confirmado",
            Self::Preparing => "em preparo",
            Self::OutForDelivery => "saiu para entrega",
            Self::Delivered => "entregue",
            Self::Cancelled => "cancelado",
        }
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::PendingPayment | Self::Paid)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub business_id: BusinessId,
    pub order_number: String,
    pub customer_phone: String,
    pub items: Vec<LineItem>,
    pub total: Decimal,
    pub status: OrderStatus,
    pub payment_reference: Option<String>,
    pub payment_code: Option<String>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{items_total, LineItem, OrderStatus};
    use crate::domain::product::ProductId;

    #[test]
    fn order_status_round_trips() {
        for status in [
            OrderStatus::PendingPayment,
            OrderStatus::Paid,
            OrderStatus::Preparing,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn items_total_multiplies_quantities() {
        let items = vec![
            LineItem {
                product_id: ProductId("p1".to_string()),
                name: "Rondelli de frango".to_string(),
                quantity: 2,
                unit_price: Decimal::new(3490, 2),
            },
            LineItem {
                product_id: ProductId("p2".to_string()),
                name: "Molho extra".to_string(),
                quantity: 1,
                unit_price: Decimal::new(500, 2),
            },
        ];
        assert_eq!(items_total(&items), Decimal::new(7480, 2));
    }
}

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    Catalog,
    PriceCheck,
    AddToCart,
    ViewCart,
    CreateOrder,
    CancelOrder,
    TrackOrder,
    PaymentInfo,
    BusinessHours,
    Delivery,
    HumanHandoff,
    Thanks,
    Farewell,
    /// Needs open-ended reasoning; only the generative model should answer.
    ComplexQuery,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 16] = [
        Self::Greeting,
        Self::Catalog,
        Self::PriceCheck,
        Self::AddToCart,
        Self::ViewCart,
        Self::CreateOrder,
        Self::CancelOrder,
        Self::TrackOrder,
        Self::PaymentInfo,
        Self::BusinessHours,
        Self::Delivery,
        Self::HumanHandoff,
        Self::Thanks,
        Self::Farewell,
        Self::ComplexQuery,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Catalog => "catalog",
            Self::PriceCheck => "price_check",
            Self::AddToCart => "add_to_cart",
            Self::ViewCart => "view_cart",
            Self::CreateOrder => "create_order",
            Self::CancelOrder => "cancel_order",
            Self::TrackOrder => "track_order",
            Self::PaymentInfo => "payment_info",
            Self::BusinessHours => "business_hours",
            Self::Delivery => "delivery",
            Self::HumanHandoff => "human_handoff",
            Self::Thanks => "thanks",
            Self::Farewell => "farewell",
            Self::ComplexQuery => "complex_query",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|intent| intent.as_str() == normalized)
    }

    /// Intents that change orders or carts.
    pub fn is_transactional(&self) -> bool {
        matches!(
            self,
            Self::AddToCart | Self::CreateOrder | Self::CancelOrder | Self::TrackOrder
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    PatternMatch,
    ModelAssisted,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PatternMatch => "pattern_match",
            Self::ModelAssisted => "model_assisted",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentEntities {
    pub quantity: Option<u32>,
    pub product: Option<String>,
    pub order_number: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub method: DetectionMethod,
    pub confidence: f32,
    pub entities: IntentEntities,
    pub text: String,
}

impl IntentResult {
    pub fn unknown(text: impl Into<String>, method: DetectionMethod) -> Self {
        Self {
            intent: Intent::Unknown,
            method,
            confidence: 0.0,
            entities: IntentEntities::default(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Intent;

    #[test]
    fn intents_round_trip() {
        for intent in Intent::ALL {
            assert_eq!(Intent::parse(intent.as_str()), Some(intent));
        }
        assert_eq!(Intent::parse("ADD_TO_CART"), Some(Intent::AddToCart));
        assert_eq!(Intent::parse("bogus"), None);
    }
}

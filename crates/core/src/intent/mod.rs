//! Deterministic intent classification for customer messages.
//!
//! The classifier is pure: an ordered pattern table decides the intent, a
//! secondary table flags messages that need open-ended reasoning, and a small
//! extractor pulls quantities, product phrases and order numbers.

mod entities;
mod patterns;

use regex::Regex;
use thiserror::Error;

use crate::domain::intent::{DetectionMethod, Intent, IntentResult};
use crate::text::fold;

pub const PATTERN_CONFIDENCE: f32 = 0.95;
pub const DEEP_REASONING_CONFIDENCE: f32 = 0.6;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("invalid pattern for {intent}: {source}")]
    Pattern { intent: &'static str, source: regex::Error },
}

#[derive(Clone, Debug)]
pub struct IntentClassifier {
    rules: Vec<(Intent, Vec<Regex>)>,
    deep_reasoning: Vec<Regex>,
    order_number: Regex,
}

impl IntentClassifier {
    pub fn new() -> Result<Self, ClassifierError> {
        let rules = patterns::INTENT_PATTERNS
            .iter()
            .map(|(intent, sources)| Ok((*intent, compile(intent.as_str(), sources)?)))
            .collect::<Result<Vec<_>, ClassifierError>>()?;
        let deep_reasoning =
            compile(Intent::ComplexQuery.as_str(), patterns::DEEP_REASONING_PATTERNS)?;
        let order_number = Regex::new(patterns::ORDER_NUMBER_PATTERN)
            .map_err(|source| ClassifierError::Pattern { intent: "order_number", source })?;

        Ok(Self { rules, deep_reasoning, order_number })
    }

    /// First matching rule wins; then the deep-reasoning table; else unknown.
    pub fn detect(&self, text: &str) -> IntentResult {
        let folded = fold(text);
        if folded.trim().is_empty() {
            return IntentResult::unknown(text, DetectionMethod::PatternMatch);
        }

        let matched = self
            .rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|pattern| pattern.is_match(&folded)))
            .map(|(intent, _)| *intent);

        let (intent, confidence) = match matched {
            Some(intent) => (intent, PATTERN_CONFIDENCE),
            None if self.requires_deep_reasoning(text) => {
                (Intent::ComplexQuery, DEEP_REASONING_CONFIDENCE)
            }
            None => return IntentResult::unknown(text, DetectionMethod::PatternMatch),
        };

        IntentResult {
            intent,
            method: DetectionMethod::PatternMatch,
            confidence,
            entities: self.extract_entities(intent, text),
            text: text.to_string(),
        }
    }

    pub fn requires_deep_reasoning(&self, text: &str) -> bool {
        let folded = fold(text);
        self.deep_reasoning.iter().any(|pattern| pattern.is_match(&folded))
    }

    pub fn extract_entities(&self, intent: Intent, text: &str) -> crate::IntentEntities {
        entities::extract(intent, text, &self.order_number)
    }
}

fn compile(intent: &'static str, sources: &[&str]) -> Result<Vec<Regex>, ClassifierError> {
    sources
        .iter()
        .map(|source| {
            Regex::new(source).map_err(|source| ClassifierError::Pattern { intent, source })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{IntentClassifier, DEEP_REASONING_CONFIDENCE, PATTERN_CONFIDENCE};
    use crate::domain::intent::{DetectionMethod, Intent};

    fn classifier() -> IntentClassifier {
        IntentClassifier::new().expect("patterns should compile")
    }

    #[test]
    fn detects_common_intents() {
        let classifier = classifier();
        let cases = [
            ("Oi", Intent::Greeting),
            ("Olá, bom dia!", Intent::Greeting),
            ("me mostra o cardápio", Intent::Catalog),
            ("quanto custa a lasanha?", Intent::PriceCheck),
            ("ver meu carrinho", Intent::ViewCart),
            ("quero fazer um pedido", Intent::CreateOrder),
            ("pode fechar o pedido", Intent::CreateOrder),
            ("onde está meu pedido?", Intent::TrackOrder),
            ("aceita pix?", Intent::PaymentInfo),
            ("qual o horário de funcionamento?", Intent::BusinessHours),
            ("vocês entregam no centro?", Intent::Delivery),
            ("quero falar com um atendente", Intent::HumanHandoff),
            ("muito obrigada", Intent::Thanks),
            ("tchau, até amanhã", Intent::Farewell),
        ];

        for (text, expected) in cases {
            let result = classifier.detect(text);
            assert_eq!(result.intent, expected, "text: {text}");
            assert_eq!(result.method, DetectionMethod::PatternMatch);
            assert!((result.confidence - PATTERN_CONFIDENCE).abs() < f32::EPSILON);
        }
    }

    #[test]
    fn transactional_intents_beat_greetings() {
        let classifier = classifier();
        assert_eq!(classifier.detect("oi, quero cancelar meu pedido").intent, Intent::CancelOrder);
        assert_eq!(classifier.detect("boa noite, cadê meu pedido?").intent, Intent::TrackOrder);
        assert_eq!(classifier.detect("olá! 2 rondelli de frango").intent, Intent::AddToCart);
    }

    #[test]
    fn declining_more_items_is_not_a_cancellation() {
        let classifier = classifier();
        assert_ne!(classifier.detect("não quero mais nada, obrigado").intent, Intent::CancelOrder);
        assert_ne!(classifier.detect("não quero mais refrigerante").intent, Intent::CancelOrder);
        assert_eq!(classifier.detect("não quero mais o pedido").intent, Intent::CancelOrder);
    }

    #[test]
    fn cart_add_extracts_quantity_and_product() {
        let result = classifier().detect("2 rondelli de frango");
        assert_eq!(result.intent, Intent::AddToCart);
        assert_eq!(result.entities.quantity, Some(2));
        assert_eq!(result.entities.product.as_deref(), Some("rondelli de frango"));
    }

    #[test]
    fn cart_add_limits_product_to_three_words_and_stops_at_fillers() {
        let classifier = classifier();

        let result = classifier.detect("quero 3 lasanha bolonhesa grande gratinada");
        assert_eq!(result.entities.quantity, Some(3));
        assert_eq!(result.entities.product.as_deref(), Some("lasanha bolonhesa grande"));

        let result = classifier.detect("quero 2 nhoque por favor");
        assert_eq!(result.entities.product.as_deref(), Some("nhoque"));
    }

    #[test]
    fn quantity_defaults_to_one() {
        let result = classifier().detect("adiciona um nhoque ao sugo");
        assert_eq!(result.intent, Intent::AddToCart);
        assert_eq!(result.entities.quantity, Some(1));
        assert_eq!(result.entities.product.as_deref(), Some("nhoque ao sugo"));
    }

    #[test]
    fn labeled_order_number_is_extracted() {
        let result = classifier().detect("qual o status do pedido nº 482913?");
        assert_eq!(result.intent, Intent::TrackOrder);
        assert_eq!(result.entities.order_number.as_deref(), Some("482913"));
    }

    #[test]
    fn deep_reasoning_messages_become_complex_queries() {
        let result = classifier().detect("qual a diferença entre o rondelli e o canelone?");
        assert_eq!(result.intent, Intent::ComplexQuery);
        assert!((result.confidence - DEEP_REASONING_CONFIDENCE).abs() < f32::EPSILON);
    }

    #[test]
    fn unmatched_text_is_unknown() {
        let classifier = classifier();
        let result = classifier.detect("asdkjh qwe");
        assert_eq!(result.intent, Intent::Unknown);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(classifier.detect("   ").intent, Intent::Unknown);
    }

    #[test]
    fn detection_is_deterministic() {
        let classifier = classifier();
        let first = classifier.detect("quero 2 rondelli de frango");
        let second = classifier.detect("quero 2 rondelli de frango");
        assert_eq!(first, second);
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use vendabot_core::domain::intent::{DetectionMethod, Intent, IntentResult};
use vendabot_core::intent::IntentClassifier;
use vendabot_core::text::fold;

use crate::llm::{LlmClient, LlmError, LlmRequest, Role};

const MODEL_CONFIDENCE: f32 = 0.7;

/// Asks the model for one intent label. Any failure, or an answer that is not
/// a known label, yields `unknown`.
pub struct ModelAssistedClassifier {
    llm: Arc<dyn LlmClient>,
    patterns: Arc<IntentClassifier>,
    timeout: Duration,
}

impl ModelAssistedClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, patterns: Arc<IntentClassifier>, timeout: Duration) -> Self {
        Self { llm, patterns, timeout }
    }

    pub async fn classify(&self, text: &str) -> IntentResult {
        match self.ask(text).await {
            Ok(Some(intent)) => IntentResult {
                intent,
                method: DetectionMethod::ModelAssisted,
                confidence: MODEL_CONFIDENCE,
                entities: self.patterns.extract_entities(intent, text),
                text: text.to_string(),
            },
            Ok(None) => IntentResult::unknown(text, DetectionMethod::ModelAssisted),
            Err(error) => {
                warn!(
                    event_name = "automation.classifier.model_failed",
                    error = %error,
                    "model-assisted classification failed"
                );
                IntentResult::unknown(text, DetectionMethod::ModelAssisted)
            }
        }
    }

    async fn ask(&self, text: &str) -> Result<Option<Intent>, LlmError> {
        let labels: Vec<&str> = Intent::ALL.iter().map(Intent::as_str).collect();
        let request = LlmRequest::new(format!(
            "Classifique a mensagem de um cliente de delivery em exatamente um rótulo. \
             Responda somente com o rótulo. Rótulos: {}.",
            labels.join(", ")
        ))
        .push(Role::User, text);

        let answer = tokio::time::timeout(self.timeout, self.llm.complete(&request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;
        Ok(parse_label(&answer))
    }
}

fn parse_label(answer: &str) -> Option<Intent> {
    let folded = fold(answer);
    let label = folded.trim().trim_matches(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_');
    Intent::parse(label)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use vendabot_core::domain::intent::{DetectionMethod, Intent};
    use vendabot_core::intent::IntentClassifier;

    use super::{parse_label, ModelAssistedClassifier};
    use crate::llm::{LlmError, ScriptedLlm};

    fn classifier(llm: Arc<ScriptedLlm>, timeout: Duration) -> ModelAssistedClassifier {
        let patterns = Arc::new(IntentClassifier::new().expect("patterns"));
        ModelAssistedClassifier::new(llm, patterns, timeout)
    }

    #[test]
    fn labels_are_parsed_leniently() {
        assert_eq!(parse_label(" Track_Order. "), Some(Intent::TrackOrder));
        assert_eq!(parse_label("\"catalog\""), Some(Intent::Catalog));
        assert_eq!(parse_label("não sei"), None);
    }

    #[tokio::test]
    async fn model_label_is_used_with_entities() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.answer("track_order").await;
        let result = classifier(llm.clone(), Duration::from_secs(1))
            .classify("e aí, cadê o pedido 482913?")
            .await;

        assert_eq!(result.intent, Intent::TrackOrder);
        assert_eq!(result.method, DetectionMethod::ModelAssisted);
        assert_eq!(llm.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn model_errors_and_timeouts_degrade_to_unknown() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.fail(LlmError::Status { status: 500, body: "boom".into() }).await;
        let result = classifier(llm, Duration::from_secs(1)).classify("hmm").await;
        assert_eq!(result.intent, Intent::Unknown);
        assert_eq!(result.method, DetectionMethod::ModelAssisted);

        let slow = Arc::new(ScriptedLlm::with_delay(Duration::from_millis(200)));
        slow.answer("catalog").await;
        let result = classifier(slow, Duration::from_millis(20)).classify("hmm").await;
        assert_eq!(result.intent, Intent::Unknown);
    }
}

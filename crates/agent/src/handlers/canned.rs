use async_trait::async_trait;

use vendabot_core::domain::intent::IntentResult;

use super::{HandlerContext, HandlerError, HandlerResult, IntentHandler};
use crate::templates::{CannedTemplates, TemplateKey};

/// Answers with a business template; no state is read or written.
pub struct CannedReplyHandler {
    name: &'static str,
    key: TemplateKey,
    templates: CannedTemplates,
}

impl CannedReplyHandler {
    pub fn new(name: &'static str, key: TemplateKey, templates: CannedTemplates) -> Self {
        Self { name, key, templates }
    }
}

#[async_trait]
impl IntentHandler for CannedReplyHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(
        &self,
        context: &HandlerContext,
        _intent: &IntentResult,
    ) -> Result<HandlerResult, HandlerError> {
        let text = self.templates.render_plain(&context.account, self.key).await?;
        Ok(HandlerResult::Text(text))
    }
}

/// Open-ended questions go to the generative fallback.
pub struct DelegateHandler;

#[async_trait]
impl IntentHandler for DelegateHandler {
    fn name(&self) -> &'static str {
        "model.delegate"
    }

    async fn handle(
        &self,
        _context: &HandlerContext,
        _intent: &IntentResult,
    ) -> Result<HandlerResult, HandlerError> {
        Ok(HandlerResult::DelegateToModel)
    }
}

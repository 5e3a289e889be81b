use async_trait::async_trait;

use vendabot_core::catalog::{CatalogMatcher, ProductMatch};
use vendabot_core::domain::intent::IntentResult;
use vendabot_core::domain::product::Product;
use vendabot_core::domain::reply::{InteractiveReply, ListRow, ListSection, ReplyButton, MAX_LIST_ROWS};

use super::{CommerceDeps, HandlerContext, HandlerError, HandlerResult, IntentHandler};
use super::{CATALOG_ID, PRODUCT_ID_PREFIX};
use crate::templates::format_brl;

const NOT_FOUND_SUGGESTIONS: usize = 5;

pub(crate) const EMPTY_CATALOG: &str = "No momento não há produtos disponíveis no cardápio.";

pub(crate) fn product_row(product: &Product) -> ListRow {
    let price = format_brl(product.price);
    let description = match product.description.as_deref().filter(|text| !text.trim().is_empty()) {
        Some(text) => format!("{price} · {text}"),
        None => price,
    };
    ListRow {
        id: format!("{PRODUCT_ID_PREFIX}{}", product.id.0),
        title: product.name.clone(),
        description: Some(description),
    }
}

pub(crate) fn product_list(body: impl Into<String>, products: &[Product]) -> InteractiveReply {
    let rows = products.iter().map(product_row).collect();
    InteractiveReply::list(body, "Ver opções", vec![ListSection { title: "Cardápio".to_string(), rows }])
}

/// Names only: an unmatched query must never be answered with a price.
pub(crate) fn not_found_text(query: &str, catalog: &[Product]) -> String {
    let suggestions = CatalogMatcher::new().subset(catalog, NOT_FOUND_SUGGESTIONS);
    if suggestions.is_empty() {
        return format!("Não encontrei \"{query}\" no cardápio. {EMPTY_CATALOG}");
    }
    let names: Vec<&str> = suggestions.iter().map(|product| product.name.as_str()).collect();
    format!(
        "Não encontrei \"{query}\" no nosso cardápio. Temos, por exemplo: {}. \
         Peça o *cardápio* para ver todas as opções.",
        names.join(", ")
    )
}

pub struct CatalogHandler {
    deps: CommerceDeps,
}

impl CatalogHandler {
    pub fn new(deps: CommerceDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl IntentHandler for CatalogHandler {
    fn name(&self) -> &'static str {
        "commerce.catalog"
    }

    async fn handle(
        &self,
        context: &HandlerContext,
        _intent: &IntentResult,
    ) -> Result<HandlerResult, HandlerError> {
        let products = self.deps.products.list_active(&context.account.id).await?;
        if products.is_empty() {
            return Ok(HandlerResult::Text(EMPTY_CATALOG.to_string()));
        }

        let mut body = format!("Confira o cardápio da {}:", context.account.name);
        if products.len() > MAX_LIST_ROWS {
            body.push_str(&format!(" (mostrando {MAX_LIST_ROWS} de {})", products.len()));
        }
        Ok(HandlerResult::Interactive(
            product_list(body, &products).with_footer("Toque em um item para adicionar"),
        ))
    }
}

pub struct PriceCheckHandler {
    deps: CommerceDeps,
}

impl PriceCheckHandler {
    pub fn new(deps: CommerceDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl IntentHandler for PriceCheckHandler {
    fn name(&self) -> &'static str {
        "commerce.price_check"
    }

    async fn handle(
        &self,
        context: &HandlerContext,
        intent: &IntentResult,
    ) -> Result<HandlerResult, HandlerError> {
        let catalog = self.deps.products.list_active(&context.account.id).await?;
        if catalog.is_empty() {
            return Ok(HandlerResult::Text(EMPTY_CATALOG.to_string()));
        }
        let Some(query) = intent.entities.product.as_deref() else {
            return Ok(HandlerResult::Interactive(product_list("Estes são nossos preços:", &catalog)));
        };

        let reply = match CatalogMatcher::new().resolve(query, &catalog) {
            ProductMatch::Found(product) => HandlerResult::Interactive(InteractiveReply::buttons(
                format!("*{}* sai por {}.", product.name, format_brl(product.price)),
                vec![
                    ReplyButton::new(format!("{PRODUCT_ID_PREFIX}{}", product.id.0), "Adicionar"),
                    ReplyButton::new(CATALOG_ID, "Ver cardápio"),
                ],
            )),
            ProductMatch::Ambiguous(candidates) => HandlerResult::Interactive(product_list(
                format!("Temos mais de uma opção para \"{query}\":"),
                &candidates,
            )),
            ProductMatch::NotFound => HandlerResult::Text(not_found_text(query, &catalog)),
        };
        Ok(reply)
    }
}

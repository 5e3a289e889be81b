use async_trait::async_trait;

use vendabot_core::catalog::{CatalogMatcher, ProductMatch};
use vendabot_core::domain::intent::IntentResult;
use vendabot_core::domain::order::LineItem;
use vendabot_core::domain::product::{Product, ProductId};
use vendabot_core::domain::reply::{InteractiveReply, ReplyButton};
use vendabot_core::domain::session::{CustomerSession, SessionStatus};

use super::catalog::{not_found_text, product_list, EMPTY_CATALOG};
use super::orders::{cart_lines, checkout, order_from_this_message, payment_reply, EMPTY_CART};
use super::{CommerceDeps, HandlerContext, HandlerError, HandlerResult, IntentHandler};
use super::{CANCEL_ORDER_ID, CATALOG_ID, CHECKOUT_ID, PRODUCT_ID_PREFIX};
use crate::templates::format_brl;

pub(crate) enum ItemResolution {
    Item(LineItem),
    Reply(HandlerResult),
}

/// A session that can take cart changes. A confirmed or placed order is
/// closed out first and a fresh session opened.
pub(crate) async fn shopping_session(
    deps: &CommerceDeps,
    context: &HandlerContext,
) -> Result<CustomerSession, HandlerError> {
    let session = context.session.clone();
    if !matches!(session.status, SessionStatus::PaymentConfirmed | SessionStatus::OrderPlaced) {
        return Ok(session);
    }
    let business_id = session.business_id.clone();
    let phone_number = session.phone_number.clone();
    deps.sessions.complete_order(session, context.now).await?;
    Ok(deps.sessions.get_or_create(&business_id, &phone_number, context.now).await?)
}

/// Picks the product from a tapped list row or the extracted product phrase.
/// Only catalog products are ever returned.
pub(crate) async fn resolve_item(
    deps: &CommerceDeps,
    context: &HandlerContext,
    intent: &IntentResult,
    catalog: &[Product],
) -> Result<ItemResolution, HandlerError> {
    if catalog.is_empty() {
        return Ok(ItemResolution::Reply(HandlerResult::Text(EMPTY_CATALOG.to_string())));
    }
    let quantity = intent.entities.quantity.unwrap_or(1).max(1);

    let tapped = context.reply_id.as_deref().and_then(|id| id.strip_prefix(PRODUCT_ID_PREFIX));
    if let Some(product_id) = tapped {
        let product = deps
            .products
            .find_by_id(&ProductId(product_id.to_string()))
            .await?
            .filter(|product| product.active && product.business_id == context.account.id);
        return Ok(match product {
            Some(product) => ItemResolution::Item(line_item(&product, quantity)),
            None => ItemResolution::Reply(HandlerResult::Interactive(product_list(
                "Esse item não está mais disponível. Veja as opções:",
                catalog,
            ))),
        });
    }

    let Some(query) = intent.entities.product.as_deref() else {
        return Ok(ItemResolution::Reply(HandlerResult::Interactive(product_list(
            "O que você gostaria de adicionar?",
            catalog,
        ))));
    };
    Ok(match CatalogMatcher::new().resolve(query, catalog) {
        ProductMatch::Found(product) => ItemResolution::Item(line_item(&product, quantity)),
        ProductMatch::Ambiguous(candidates) => ItemResolution::Reply(HandlerResult::Interactive(
            product_list(format!("Qual destas opções de \"{query}\" você quer?"), &candidates),
        )),
        ProductMatch::NotFound => ItemResolution::Reply(HandlerResult::Text(not_found_text(query, catalog))),
    })
}

fn line_item(product: &Product, quantity: u32) -> LineItem {
    LineItem {
        product_id: product.id.clone(),
        name: product.name.clone(),
        quantity,
        unit_price: product.price,
    }
}

/// Adds the requested item and checks the cart out in the same turn, so
/// "2 rondelli de frango" ends with a PIX code.
pub struct AddToCartHandler {
    deps: CommerceDeps,
}

impl AddToCartHandler {
    pub fn new(deps: CommerceDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl IntentHandler for AddToCartHandler {
    fn name(&self) -> &'static str {
        "commerce.add_to_cart"
    }

    async fn handle(
        &self,
        context: &HandlerContext,
        intent: &IntentResult,
    ) -> Result<HandlerResult, HandlerError> {
        if let Some(order) = order_from_this_message(&self.deps, context).await? {
            return Ok(payment_reply(&order));
        }
        if context.session.status == SessionStatus::PaymentPending {
            return Ok(HandlerResult::Interactive(InteractiveReply::buttons(
                "Você tem um pedido aguardando pagamento. Cancele-o para começar um novo.",
                vec![ReplyButton::new(CANCEL_ORDER_ID, "Cancelar pedido")],
            )));
        }

        let catalog = self.deps.products.list_active(&context.account.id).await?;
        let item = match resolve_item(&self.deps, context, intent, &catalog).await? {
            ItemResolution::Item(item) => item,
            ItemResolution::Reply(reply) => return Ok(reply),
        };

        let session = shopping_session(&self.deps, context).await?;
        let session = self.deps.sessions.update_cart(session, vec![item], context.now).await?;
        checkout(&self.deps, context, session).await
    }
}

pub struct ViewCartHandler {
    deps: CommerceDeps,
}

impl ViewCartHandler {
    pub fn new(deps: CommerceDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl IntentHandler for ViewCartHandler {
    fn name(&self) -> &'static str {
        "commerce.view_cart"
    }

    async fn handle(
        &self,
        context: &HandlerContext,
        _intent: &IntentResult,
    ) -> Result<HandlerResult, HandlerError> {
        let session = &context.session;
        if session.status == SessionStatus::PaymentPending {
            if let Some(order_id) = session.order_id.as_ref() {
                if let Some(order) = self.deps.orders.find_by_id(order_id).await? {
                    return Ok(payment_reply(&order));
                }
            }
        }
        if session.cart.is_empty() {
            return Ok(HandlerResult::Text(EMPTY_CART.to_string()));
        }

        Ok(HandlerResult::Interactive(InteractiveReply::buttons(
            format!(
                "Seu carrinho:\n{}\nTotal: {}",
                cart_lines(&session.cart),
                format_brl(session.cart_total)
            ),
            vec![
                ReplyButton::new(CHECKOUT_ID, "Finalizar pedido"),
                ReplyButton::new(CATALOG_ID, "Ver cardápio"),
                ReplyButton::new(CANCEL_ORDER_ID, "Esvaziar carrinho"),
            ],
        )))
    }
}

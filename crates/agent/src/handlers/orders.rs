use async_trait::async_trait;
use tracing::{debug, info};

use vendabot_core::domain::intent::IntentResult;
use vendabot_core::domain::order::{LineItem, Order, OrderId, OrderStatus};
use vendabot_core::domain::reply::{InteractiveReply, ReplyButton, MAX_BODY};
use vendabot_core::domain::session::{CustomerSession, SessionStatus};
use vendabot_core::idempotency::{order_key, order_number};
use vendabot_db::repositories::RepositoryError;

use super::cart::{resolve_item, shopping_session, ItemResolution};
use super::catalog::{product_list, EMPTY_CATALOG};
use super::{CommerceDeps, HandlerContext, HandlerError, HandlerResult, IntentHandler};
use super::{CANCEL_ORDER_ID, PAYMENT_DONE_ID};
use crate::templates::format_brl;

const ORDER_NUMBER_ATTEMPTS: u32 = 8;

pub(crate) const EMPTY_CART: &str = "Seu carrinho está vazio. Peça o *cardápio* para começar.";

pub(crate) fn cart_lines(items: &[LineItem]) -> String {
    items
        .iter()
        .map(|item| format!("{}x {} · {}", item.quantity, item.name, format_brl(item.subtotal())))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Item lines that fit in `budget` characters. Lines that do not fit are
/// folded into a trailing count.
fn cart_lines_within(items: &[LineItem], budget: usize) -> String {
    let full = cart_lines(items);
    if full.chars().count() <= budget {
        return full;
    }
    let mut kept: Vec<String> = Vec::new();
    let mut used = 0;
    for (index, item) in items.iter().enumerate() {
        let line = format!("{}x {} · {}", item.quantity, item.name, format_brl(item.subtotal()));
        let rest = format!("… e mais {} itens", items.len() - index - 1);
        let cost = line.chars().count() + 1;
        if used + cost + rest.chars().count() > budget {
            break;
        }
        used += cost;
        kept.push(line);
    }
    kept.push(format!("… e mais {} itens", items.len() - kept.len()));
    kept.join("\n")
}

/// Order summary, PIX code and the follow-up buttons. The item list gives way
/// before the PIX code does, so the code always reaches the customer whole.
pub(crate) fn payment_reply(order: &Order) -> HandlerResult {
    let heading = format!("Pedido #{} criado! ✅\n", order.order_number);
    let mut tail = format!("\nTotal: {}", format_brl(order.total));
    if let Some(code) = order.payment_code.as_deref() {
        tail.push_str("\n\nPague com PIX copia e cola:\n");
        tail.push_str(code);
    }
    let budget = MAX_BODY.saturating_sub(heading.chars().count() + tail.chars().count());
    let body = format!("{heading}{}{tail}", cart_lines_within(&order.items, budget));
    HandlerResult::Interactive(InteractiveReply::buttons(
        body,
        vec![
            ReplyButton::new(PAYMENT_DONE_ID, "Já paguei"),
            ReplyButton::new(CANCEL_ORDER_ID, "Cancelar pedido"),
        ],
    ))
}

/// The order this very message already created, if it is being reprocessed.
pub(crate) async fn order_from_this_message(
    deps: &CommerceDeps,
    context: &HandlerContext,
) -> Result<Option<Order>, HandlerError> {
    let Some(order_id) = context.session.order_id.as_ref() else {
        return Ok(None);
    };
    let key = order_key(&context.account.id.0, context.source_id());
    Ok(deps.orders.find_by_id(order_id).await?.filter(|order| order.idempotency_key == key))
}

async fn pending_order(
    deps: &CommerceDeps,
    session: &CustomerSession,
) -> Result<Option<Order>, HandlerError> {
    if session.status != SessionStatus::PaymentPending {
        return Ok(None);
    }
    match session.order_id.as_ref() {
        Some(order_id) => Ok(deps
            .orders
            .find_by_id(order_id)
            .await?
            .filter(|order| order.status == OrderStatus::PendingPayment)),
        None => Ok(None),
    }
}

/// Turns the session cart into an order with a payment code and moves the
/// session to `payment_pending`. The order key comes from the inbound message,
/// so a reprocessed message gets the order it already created.
pub(crate) async fn checkout(
    deps: &CommerceDeps,
    context: &HandlerContext,
    session: CustomerSession,
) -> Result<HandlerResult, HandlerError> {
    if session.cart.is_empty() {
        return Ok(HandlerResult::Text(EMPTY_CART.to_string()));
    }

    let key = order_key(&context.account.id.0, context.source_id());
    let mut attempt = 0;
    let mut order = loop {
        let draft = Order {
            id: OrderId(uuid::Uuid::new_v4().to_string()),
            business_id: context.account.id.clone(),
            order_number: order_number(&key, attempt),
            customer_phone: session.phone_number.clone(),
            items: session.cart.clone(),
            total: session.cart_total,
            status: OrderStatus::PendingPayment,
            payment_reference: None,
            payment_code: None,
            idempotency_key: key.clone(),
            created_at: context.now,
            updated_at: context.now,
        };
        match deps.orders.create(draft).await {
            Err(RepositoryError::Conflict(detail)) if attempt + 1 < ORDER_NUMBER_ATTEMPTS => {
                debug!(
                    event_name = "automation.order.number_taken",
                    business_id = %context.account.id.0,
                    attempt,
                    detail = %detail,
                    "order number already in use"
                );
                attempt += 1;
            }
            created => break created?,
        }
    };

    let (reference, code) = match (order.payment_reference.clone(), order.payment_code.clone()) {
        (Some(reference), Some(code)) => (reference, code),
        _ => {
            let issued = deps.payments.request_code(&context.account, &order).await?;
            order.payment_reference = Some(issued.reference.clone());
            order.payment_code = Some(issued.code.clone());
            order.updated_at = context.now;
            deps.orders.save(order.clone()).await?;
            (issued.reference, issued.code)
        }
    };

    deps.sessions
        .set_payment_pending(session, order.id.clone(), &reference, &code, context.now)
        .await?;
    info!(
        event_name = "automation.order.created",
        business_id = %context.account.id.0,
        order_id = %order.id.0,
        order_number = %order.order_number,
        "order created and awaiting payment"
    );
    Ok(payment_reply(&order))
}

/// Looks up a customer's order by number, else the session's order, else the
/// latest one. Orders of other customers are never returned.
async fn find_customer_order(
    deps: &CommerceDeps,
    context: &HandlerContext,
    number: Option<&str>,
) -> Result<Option<Order>, HandlerError> {
    let customer = &context.session.phone_number;
    let order = match (number, context.session.order_id.as_ref()) {
        (Some(number), _) => deps.orders.find_by_number(&context.account.id, number).await?,
        (None, Some(order_id)) => deps.orders.find_by_id(order_id).await?,
        (None, None) => deps.orders.latest_for_customer(&context.account.id, customer).await?,
    };
    Ok(order.filter(|order| order.customer_phone == *customer))
}

pub struct CreateOrderHandler {
    deps: CommerceDeps,
}

impl CreateOrderHandler {
    pub fn new(deps: CommerceDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl IntentHandler for CreateOrderHandler {
    fn name(&self) -> &'static str {
        "commerce.create_order"
    }

    async fn handle(
        &self,
        context: &HandlerContext,
        intent: &IntentResult,
    ) -> Result<HandlerResult, HandlerError> {
        if let Some(order) = order_from_this_message(&self.deps, context).await? {
            return Ok(payment_reply(&order));
        }
        if let Some(order) = pending_order(&self.deps, &context.session).await? {
            return Ok(payment_reply(&order));
        }

        let mut session = shopping_session(&self.deps, context).await?;
        if intent.entities.product.is_some() {
            let catalog = self.deps.products.list_active(&context.account.id).await?;
            match resolve_item(&self.deps, context, intent, &catalog).await? {
                ItemResolution::Item(item) => {
                    session = self.deps.sessions.update_cart(session, vec![item], context.now).await?;
                }
                ItemResolution::Reply(reply) => return Ok(reply),
            }
        }

        if session.cart.is_empty() {
            let catalog = self.deps.products.list_active(&context.account.id).await?;
            if catalog.is_empty() {
                return Ok(HandlerResult::Text(EMPTY_CATALOG.to_string()));
            }
            return Ok(HandlerResult::Interactive(product_list(
                "Seu carrinho está vazio. O que você gostaria de pedir?",
                &catalog,
            )));
        }
        checkout(&self.deps, context, session).await
    }
}

pub struct CancelOrderHandler {
    deps: CommerceDeps,
}

impl CancelOrderHandler {
    pub fn new(deps: CommerceDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl IntentHandler for CancelOrderHandler {
    fn name(&self) -> &'static str {
        "commerce.cancel_order"
    }

    async fn handle(
        &self,
        context: &HandlerContext,
        intent: &IntentResult,
    ) -> Result<HandlerResult, HandlerError> {
        let number = intent.entities.order_number.as_deref();
        let Some(mut order) = find_customer_order(&self.deps, context, number).await? else {
            if number.is_none() && !context.session.cart.is_empty() {
                self.deps.sessions.cancel(context.session.clone(), context.now).await?;
                return Ok(HandlerResult::Text(
                    "Carrinho descartado. Quando quiser, é só pedir o *cardápio*.".to_string(),
                ));
            }
            return Ok(HandlerResult::Text(match number {
                Some(number) => format!("Não encontrei o pedido #{number}."),
                None => "Não encontrei nenhum pedido em aberto para cancelar.".to_string(),
            }));
        };

        if order.status == OrderStatus::Cancelled {
            return Ok(HandlerResult::Text(format!("O pedido #{} já está cancelado.", order.order_number)));
        }
        if !order.status.is_cancellable() {
            return Ok(HandlerResult::Text(format!(
                "O pedido #{} já está {} e não pode mais ser cancelado por aqui. \
                 Se precisar, posso chamar alguém da equipe.",
                order.order_number,
                order.status.label()
            )));
        }

        order.status = OrderStatus::Cancelled;
        order.updated_at = context.now;
        self.deps.orders.save(order.clone()).await?;
        if context.session.order_id.as_ref() == Some(&order.id) && !context.session.status.is_terminal() {
            self.deps.sessions.cancel(context.session.clone(), context.now).await?;
        }
        info!(
            event_name = "automation.order.cancelled",
            business_id = %context.account.id.0,
            order_id = %order.id.0,
            "order cancelled by customer"
        );
        Ok(HandlerResult::Text(format!(
            "Pedido #{} cancelado. Quando quiser, é só pedir o *cardápio* para começar de novo.",
            order.order_number
        )))
    }
}

pub struct TrackOrderHandler {
    deps: CommerceDeps,
}

impl TrackOrderHandler {
    pub fn new(deps: CommerceDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl IntentHandler for TrackOrderHandler {
    fn name(&self) -> &'static str {
        "commerce.track_order"
    }

    async fn handle(
        &self,
        context: &HandlerContext,
        intent: &IntentResult,
    ) -> Result<HandlerResult, HandlerError> {
        let number = intent.entities.order_number.as_deref();
        let text = match find_customer_order(&self.deps, context, number).await? {
            Some(order) => format!(
                "Pedido #{}: {}.\n{}\nTotal: {}",
                order.order_number,
                order.status.label(),
                cart_lines(&order.items),
                format_brl(order.total)
            ),
            None => match number {
                Some(number) => format!("Não encontrei o pedido #{number}. Confira o número, por favor."),
                None => "Você ainda não tem pedidos com a gente.".to_string(),
            },
        };
        Ok(HandlerResult::Text(text))
    }
}

pub struct PaymentInfoHandler {
    deps: CommerceDeps,
}

impl PaymentInfoHandler {
    pub fn new(deps: CommerceDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl IntentHandler for PaymentInfoHandler {
    fn name(&self) -> &'static str {
        "commerce.payment_info"
    }

    async fn handle(
        &self,
        context: &HandlerContext,
        _intent: &IntentResult,
    ) -> Result<HandlerResult, HandlerError> {
        if let Some(order) = pending_order(&self.deps, &context.session).await? {
            return Ok(payment_reply(&order));
        }
        Ok(HandlerResult::Text(
            "Aceitamos PIX. Quando você fechar o pedido, envio o código copia e cola com o valor certinho."
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use vendabot_core::domain::intent::Intent;
    use vendabot_core::domain::order::{LineItem, OrderStatus};
    use vendabot_core::domain::product::ProductId;
    use vendabot_core::domain::reply::MAX_BODY;
    use vendabot_core::domain::session::SessionStatus;
    use vendabot_core::idempotency::{order_key, order_number};
    use vendabot_db::repositories::{OrderRepository, SessionRepository};

    use super::{payment_reply, CancelOrderHandler, CreateOrderHandler, TrackOrderHandler};
    use crate::handlers::{HandlerResult, IntentHandler};
    use crate::test_support::{detect, Fixture};

    #[tokio::test]
    async fn create_order_checks_out_the_session_cart() {
        let fixture = Fixture::with_catalog().await;
        fixture.seed_cart(2).await;
        let context = fixture.context("quero fechar o pedido").await;
        let handler = CreateOrderHandler::new(fixture.commerce());

        let result = handler.handle(&context, &detect("quero fechar o pedido")).await.expect("checkout");
        let HandlerResult::Interactive(reply) = result else { panic!("expected payment buttons") };
        assert!(reply.body().contains("Total: R$ 69,80"));
        assert!(reply.body().contains("000201"));

        let session = fixture.open_session().await;
        assert_eq!(session.status, SessionStatus::PaymentPending);
        let order = fixture
            .orders
            .find_by_id(session.order_id.as_ref().expect("order id"))
            .await
            .expect("find")
            .expect("order");
        assert_eq!(order.total, Decimal::new(6980, 2));
        assert_eq!(order.payment_code, session.payment_code);
    }

    #[test]
    fn large_orders_keep_the_whole_pix_code() {
        let mut order = crate::test_support::order("482913", Decimal::new(69800, 2));
        order.items = (0..20)
            .map(|n| LineItem {
                product_id: ProductId(format!("p{n}")),
                name: format!("Rondelli de Frango com Requeijão Cremoso nº {n}"),
                quantity: 2,
                unit_price: Decimal::new(3490, 2),
            })
            .collect();
        let code = format!("00020101021226{}6304ABCD", "9".repeat(180));
        order.payment_code = Some(code.clone());

        let HandlerResult::Interactive(reply) = payment_reply(&order) else { panic!("expected buttons") };
        let body = reply.normalized().body().to_string();

        assert!(body.chars().count() <= MAX_BODY);
        assert!(body.ends_with(&code));
        assert!(body.contains("Total: R$ 698,00"));
        assert!(body.contains("… e mais"));
        assert!(body.contains("nº 0"));
    }

    #[tokio::test]
    async fn colliding_order_number_steps_to_a_free_one() {
        let fixture = Fixture::with_catalog().await;
        fixture.seed_cart(2).await;
        // The first inbound message of the fixture is wamid.in.1.
        let key = order_key("biz-1", "wamid.in.1");
        let taken = order_number(&key, 0);
        fixture
            .orders
            .create(crate::test_support::order(&taken, Decimal::ONE))
            .await
            .expect("earlier order");

        let context = fixture.context("fechar pedido").await;
        assert_eq!(context.source_id(), "wamid.in.1");
        CreateOrderHandler::new(fixture.commerce())
            .handle(&context, &detect("fechar pedido"))
            .await
            .expect("checkout");

        let session = fixture.open_session().await;
        let order = fixture
            .orders
            .find_by_id(session.order_id.as_ref().expect("order id"))
            .await
            .expect("find")
            .expect("order");
        assert_ne!(order.order_number, taken);
        assert_eq!(order.order_number, order_number(&key, 1));
        assert_eq!(order.idempotency_key, key);
    }

    #[tokio::test]
    async fn create_order_with_empty_cart_offers_the_catalog() {
        let fixture = Fixture::with_catalog().await;
        let context = fixture.context("quero fazer um pedido").await;
        let result = CreateOrderHandler::new(fixture.commerce())
            .handle(&context, &detect("quero fazer um pedido"))
            .await
            .expect("handled");
        assert!(matches!(result, HandlerResult::Interactive(_)));
        assert_eq!(fixture.open_session().await.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn cancel_order_cancels_pending_order_and_ends_session() {
        let fixture = Fixture::with_catalog().await;
        fixture.seed_cart(1).await;
        let context = fixture.context("fechar pedido").await;
        CreateOrderHandler::new(fixture.commerce())
            .handle(&context, &detect("fechar pedido"))
            .await
            .expect("checkout");
        let session = fixture.open_session().await;
        let order_id = session.order_id.clone().expect("order");

        let context = fixture.context("quero cancelar o pedido").await;
        let result = CancelOrderHandler::new(fixture.commerce())
            .handle(&context, &detect("quero cancelar o pedido"))
            .await
            .expect("cancel");
        assert!(matches!(result, HandlerResult::Text(ref text) if text.contains("cancelado")));

        let order = fixture.orders.find_by_id(&order_id).await.expect("find").expect("order");
        assert_eq!(order.status, OrderStatus::Cancelled);
        let old = fixture.sessions.find_by_id(&session.id).await.expect("find").expect("session");
        assert_eq!(old.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn tracking_reports_status_or_truthful_not_found() {
        let fixture = Fixture::with_catalog().await;
        let context = fixture.context("cadê meu pedido 123456?").await;
        let intent = detect("cadê meu pedido 123456?");
        assert_eq!(intent.intent, Intent::TrackOrder);

        let result = TrackOrderHandler::new(fixture.commerce()).handle(&context, &intent).await.expect("track");
        assert_eq!(
            result,
            HandlerResult::Text("Não encontrei o pedido #123456. Confira o número, por favor.".to_string())
        );

        fixture.seed_cart(1).await;
        let context = fixture.context("fechar pedido").await;
        CreateOrderHandler::new(fixture.commerce())
            .handle(&context, &detect("fechar pedido"))
            .await
            .expect("checkout");
        let context = fixture.context("status do pedido").await;
        let result = TrackOrderHandler::new(fixture.commerce())
            .handle(&context, &detect("status do pedido"))
            .await
            .expect("track");
        assert!(matches!(result, HandlerResult::Text(ref text) if text.contains("aguardando pagamento")));
    }
}

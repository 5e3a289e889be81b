use sqlx::sqlite::SqliteRow;

use vendabot_core::domain::account::BusinessId;
use vendabot_core::domain::order::{Order, OrderId, OrderStatus};

use super::{
    format_timestamp, get, parse_decimal, parse_json, parse_timestamp, to_json, OrderRepository,
    RepositoryError,
};
use crate::DbPool;

const SELECT_ORDER: &str = "SELECT id, business_id, order_number, customer_phone, items_json,
        total_text, status, payment_reference, payment_code, idempotency_key,
        created_at, updated_at
 FROM customer_order";

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_ORDER} WHERE idempotency_key = ?"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }
}

fn order_from_row(row: &SqliteRow) -> Result<Order, RepositoryError> {
    let items: String = get(row, "items_json")?;
    let total: String = get(row, "total_text")?;
    let status: String = get(row, "status")?;
    Ok(Order {
        id: OrderId(get(row, "id")?),
        business_id: BusinessId(get(row, "business_id")?),
        order_number: get(row, "order_number")?,
        customer_phone: get(row, "customer_phone")?,
        items: parse_json("items_json", &items)?,
        total: parse_decimal("total_text", &total)?,
        status: OrderStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown order status `{status}`")))?,
        payment_reference: get(row, "payment_reference")?,
        payment_code: get(row, "payment_code")?,
        idempotency_key: get(row, "idempotency_key")?,
        created_at: parse_timestamp("created_at", get(row, "created_at")?)?,
        updated_at: parse_timestamp("updated_at", get(row, "updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn create(&self, order: Order) -> Result<Order, RepositoryError> {
        let inserted = sqlx::query(
            "INSERT INTO customer_order (id, business_id, order_number, customer_phone,
                                         items_json, total_text, status,
                                         payment_reference, payment_code,
                                         idempotency_key, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(idempotency_key) DO NOTHING",
        )
        .bind(&order.id.0)
        .bind(&order.business_id.0)
        .bind(&order.order_number)
        .bind(&order.customer_phone)
        .bind(to_json("items_json", &order.items)?)
        .bind(order.total.to_string())
        .bind(order.status.as_str())
        .bind(&order.payment_reference)
        .bind(&order.payment_code)
        .bind(&order.idempotency_key)
        .bind(format_timestamp(order.created_at))
        .bind(format_timestamp(order.updated_at))
        .execute(&self.pool)
        .await;

        let existing = self.find_by_idempotency_key(&order.idempotency_key).await?;
        match (inserted, existing) {
            (_, Some(existing)) => Ok(existing),
            (Err(sqlx::Error::Database(error)), None) if error.is_unique_violation() => {
                Err(RepositoryError::Conflict(format!("order number {}", order.order_number)))
            }
            (Err(error), None) => Err(error.into()),
            (Ok(_), None) => {
                Err(RepositoryError::NotFound(format!("order with key {}", order.idempotency_key)))
            }
        }
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_ORDER} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_by_number(
        &self,
        business_id: &BusinessId,
        order_number: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_ORDER} WHERE business_id = ? AND order_number = ?
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(&business_id.0)
        .bind(order_number)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn latest_for_customer(
        &self,
        business_id: &BusinessId,
        customer_phone: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_ORDER} WHERE business_id = ? AND customer_phone = ?
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(&business_id.0)
        .bind(customer_phone)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn save(&self, order: Order) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE customer_order
             SET status = ?, payment_reference = ?, payment_code = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(order.status.as_str())
        .bind(&order.payment_reference)
        .bind(&order.payment_code)
        .bind(format_timestamp(order.updated_at))
        .bind(&order.id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal::Decimal;

    use vendabot_core::domain::account::BusinessId;
    use vendabot_core::domain::order::{LineItem, Order, OrderId, OrderStatus};
    use vendabot_core::domain::product::ProductId;

    use super::SqlOrderRepository;
    use crate::repositories::test_support::{insert_account, parse_ts, setup_pool};
    use crate::repositories::{OrderRepository, RepositoryError};

    fn order(id: &str, number: &str, key: &str, created_at: &str) -> Order {
        let at = parse_ts(created_at);
        Order {
            id: OrderId(id.to_string()),
            business_id: BusinessId("biz-1".to_string()),
            order_number: number.to_string(),
            customer_phone: "5511988887777".to_string(),
            items: vec![LineItem {
                product_id: ProductId("p1".to_string()),
                name: "Rondelli de Frango".to_string(),
                quantity: 2,
                unit_price: Decimal::new(3490, 2),
            }],
            total: Decimal::new(6980, 2),
            status: OrderStatus::PendingPayment,
            payment_reference: Some(format!("VB{number}")),
            payment_code: None,
            idempotency_key: key.to_string(),
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_on_key() {
        let pool = setup_pool().await;
        insert_account(&pool, "biz-1", "1111").await;
        let repo = SqlOrderRepository::new(pool);

        let first = repo
            .create(order("o1", "482913", "ord_a", "2026-03-01T12:00:00Z"))
            .await
            .expect("create");
        let replay = repo
            .create(order("o2", "482913", "ord_a", "2026-03-01T12:00:05Z"))
            .await
            .expect("replay");

        assert_eq!(first.id.0, "o1");
        assert_eq!(replay.id.0, "o1");
        assert_eq!(replay.items.len(), 1);
        assert_eq!(replay.total, Decimal::new(6980, 2));
        assert!(repo.find_by_id(&OrderId("o2".to_string())).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn lookups_by_number_and_customer_return_latest() {
        let pool = setup_pool().await;
        insert_account(&pool, "biz-1", "1111").await;
        let repo = SqlOrderRepository::new(pool);
        let business = BusinessId("biz-1".to_string());

        repo.create(order("o1", "100001", "ord_a", "2026-03-01T12:00:00Z")).await.expect("create");
        repo.create(order("o2", "100002", "ord_b", "2026-03-02T12:00:00Z")).await.expect("create");

        let by_number =
            repo.find_by_number(&business, "100001").await.expect("find").expect("present");
        assert_eq!(by_number.id.0, "o1");

        let latest =
            repo.latest_for_customer(&business, "5511988887777").await.expect("find").expect("some");
        assert_eq!(latest.id.0, "o2");
        assert!(repo.find_by_number(&business, "999999").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn taken_order_number_is_a_conflict() {
        let pool = setup_pool().await;
        insert_account(&pool, "biz-1", "1111").await;
        let repo = SqlOrderRepository::new(pool);

        repo.create(order("o1", "285224", "ord_a", "2026-03-01T12:00:00Z")).await.expect("create");
        let error = repo
            .create(order("o2", "285224", "ord_b", "2026-03-01T12:00:05Z"))
            .await
            .expect_err("number taken");

        assert!(matches!(error, RepositoryError::Conflict(_)));
        assert!(repo.find_by_id(&OrderId("o2".to_string())).await.expect("find").is_none());
        // Replaying the first order still resolves to it.
        let replay = repo
            .create(order("o3", "285224", "ord_a", "2026-03-01T12:00:09Z"))
            .await
            .expect("replay");
        assert_eq!(replay.id.0, "o1");
    }

    #[tokio::test]
    async fn save_updates_status() {
        let pool = setup_pool().await;
        insert_account(&pool, "biz-1", "1111").await;
        let repo = SqlOrderRepository::new(pool);

        let mut created = repo
            .create(order("o1", "482913", "ord_a", "2026-03-01T12:00:00Z"))
            .await
            .expect("create");
        created.status = OrderStatus::Cancelled;
        created.updated_at = created.updated_at + Duration::minutes(3);
        repo.save(created).await.expect("save");

        let stored = repo.find_by_id(&OrderId("o1".to_string())).await.expect("find").expect("some");
        assert_eq!(stored.status, OrderStatus::Cancelled);
    }
}

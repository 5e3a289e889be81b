use sqlx::sqlite::SqliteRow;

use vendabot_core::domain::account::BusinessId;
use vendabot_core::domain::product::{Product, ProductId};

use super::{get, parse_decimal, parse_json, to_json, ProductRepository, RepositoryError};
use crate::DbPool;

const SELECT_PRODUCT: &str =
    "SELECT id, business_id, name, description, price_text, keywords_json, active FROM product";

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn product_from_row(row: &SqliteRow) -> Result<Product, RepositoryError> {
    let price: String = get(row, "price_text")?;
    let keywords: String = get(row, "keywords_json")?;
    Ok(Product {
        id: ProductId(get(row, "id")?),
        business_id: BusinessId(get(row, "business_id")?),
        name: get(row, "name")?,
        description: get(row, "description")?,
        price: parse_decimal("price_text", &price)?,
        keywords: parse_json("keywords_json", &keywords)?,
        active: get::<i64>(row, "active")? != 0,
    })
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn find_by_id(&self, id: &ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_PRODUCT} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(product_from_row).transpose()
    }

    async fn list_active(&self, business_id: &BusinessId) -> Result<Vec<Product>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_PRODUCT} WHERE business_id = ? AND active = 1 ORDER BY position, name"
        ))
        .bind(&business_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(product_from_row).collect()
    }

    /// New products are appended to the end of the catalog; updates keep
    /// their position.
    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO product (id, business_id, name, description, price_text, keywords_json,
                                  active, position)
             VALUES (?, ?, ?, ?, ?, ?, ?,
                     (SELECT COALESCE(MAX(position), -1) + 1 FROM product WHERE business_id = ?))
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 price_text = excluded.price_text,
                 keywords_json = excluded.keywords_json,
                 active = excluded.active",
        )
        .bind(&product.id.0)
        .bind(&product.business_id.0)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.to_string())
        .bind(to_json("keywords_json", &product.keywords)?)
        .bind(i64::from(product.active))
        .bind(&product.business_id.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

use sqlx::sqlite::SqliteRow;

use vendabot_core::domain::account::{normalize_phone, BusinessAccount, BusinessId};

use super::{format_timestamp, get, parse_timestamp, AccountRepository, RepositoryError};
use crate::DbPool;

const SELECT_ACCOUNT: &str = "SELECT id, name, phone_number_id, display_phone_number, workspace_id,
        pix_key, merchant_city, active, created_at, updated_at
 FROM business_account";

pub struct SqlAccountRepository {
    pool: DbPool,
}

impl SqlAccountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn list_active(&self) -> Result<Vec<BusinessAccount>, RepositoryError> {
        let rows = sqlx::query(&format!("{SELECT_ACCOUNT} WHERE active = 1 ORDER BY name"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(account_from_row).collect()
    }
}

fn account_from_row(row: &SqliteRow) -> Result<BusinessAccount, RepositoryError> {
    Ok(BusinessAccount {
        id: BusinessId(get(row, "id")?),
        name: get(row, "name")?,
        phone_number_id: get(row, "phone_number_id")?,
        display_phone_number: get(row, "display_phone_number")?,
        workspace_id: get(row, "workspace_id")?,
        pix_key: get(row, "pix_key")?,
        merchant_city: get(row, "merchant_city")?,
        active: get::<i64>(row, "active")? != 0,
        created_at: parse_timestamp("created_at", get(row, "created_at")?)?,
        updated_at: parse_timestamp("updated_at", get(row, "updated_at")?)?,
    })
}

#[async_trait::async_trait]
impl AccountRepository for SqlAccountRepository {
    async fn find_by_id(&self, id: &BusinessId) -> Result<Option<BusinessAccount>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_ACCOUNT} WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_phone_number_id(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<BusinessAccount>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_ACCOUNT} WHERE phone_number_id = ? AND active = 1"))
            .bind(phone_number_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_display_number(
        &self,
        display_phone_number: &str,
    ) -> Result<Option<BusinessAccount>, RepositoryError> {
        let digits = normalize_phone(display_phone_number);
        if digits.is_empty() {
            return Ok(None);
        }
        let row = sqlx::query(&format!(
            "{SELECT_ACCOUNT}
             WHERE active = 1
               AND REPLACE(REPLACE(REPLACE(REPLACE(REPLACE(
                       display_phone_number, '+', ''), ' ', ''), '-', ''), '(', ''), ')', '') = ?
             ORDER BY updated_at DESC
             LIMIT 1"
        ))
        .bind(&digits)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_workspace_id(
        &self,
        workspace_id: &str,
    ) -> Result<Option<BusinessAccount>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_ACCOUNT} WHERE workspace_id = ? AND active = 1 ORDER BY updated_at DESC LIMIT 1"
        ))
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn save(&self, account: BusinessAccount) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO business_account (id, name, phone_number_id, display_phone_number,
                                           workspace_id, pix_key, merchant_city, active,
                                           created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 phone_number_id = excluded.phone_number_id,
                 display_phone_number = excluded.display_phone_number,
                 workspace_id = excluded.workspace_id,
                 pix_key = excluded.pix_key,
                 merchant_city = excluded.merchant_city,
                 active = excluded.active,
                 updated_at = excluded.updated_at",
        )
        .bind(&account.id.0)
        .bind(&account.name)
        .bind(&account.phone_number_id)
        .bind(&account.display_phone_number)
        .bind(&account.workspace_id)
        .bind(&account.pix_key)
        .bind(&account.merchant_city)
        .bind(i64::from(account.active))
        .bind(format_timestamp(account.created_at))
        .bind(format_timestamp(account.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

use sqlx::{sqlite::SqliteRow, Row};

use orderly_core::domain::account::AccountId;
use orderly_core::domain::product::{Product, ProductId};

use super::{parse_decimal, ProductRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProductRepository {
    pool: DbPool,
}

impl SqlProductRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProductRepository for SqlProductRepository {
    async fn search(
        &self,
        account_id: &AccountId,
        term: &str,
    ) -> Result<Vec<Product>, RepositoryError> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, account_id, sku, name, unit_price, active
             FROM products
             WHERE account_id = ?1
               AND active = 1
               AND (
                    instr(lower(name), lower(?2)) > 0
                 OR instr(lower(sku), lower(?2)) > 0
                 OR instr(lower(?2), lower(name)) > 0
                 OR instr(lower(?2), lower(sku)) > 0
               )
             ORDER BY created_at ASC, id ASC",
        )
        .bind(account_id.as_str())
        .bind(term)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(product_from_row).collect()
    }

    async fn find_by_id(
        &self,
        account_id: &AccountId,
        id: &ProductId,
    ) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, account_id, sku, name, unit_price, active
             FROM products
             WHERE id = ? AND account_id = ?",
        )
        .bind(&id.0)
        .bind(account_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(product_from_row).transpose()
    }

    async fn save(&self, product: Product) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO products (id, account_id, sku, name, unit_price, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
             ON CONFLICT(id) DO UPDATE SET
                sku = excluded.sku,
                name = excluded.name,
                unit_price = excluded.unit_price,
                active = excluded.active",
        )
        .bind(&product.id.0)
        .bind(product.account_id.as_str())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.unit_price.to_string())
        .bind(product.active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub(crate) fn product_from_row(row: SqliteRow) -> Result<Product, RepositoryError> {
    Ok(Product {
        id: ProductId(row.try_get("id")?),
        account_id: AccountId(row.try_get("account_id")?),
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        active: row.try_get("active")?,
    })
}

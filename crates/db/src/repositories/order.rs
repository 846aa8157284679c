use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use orderly_core::domain::account::{AccountId, UserId};
use orderly_core::domain::company::CompanyId;
use orderly_core::domain::order::{
    line_total, NewOrder, Order, OrderId, OrderItem, OrderItemId, OrderNumber, OrderReceipt,
    OrderStatus,
};
use orderly_core::domain::product::ProductId;
use orderly_core::domain::progress::RunId;

use super::{
    format_timestamp, parse_decimal, parse_timestamp, parse_u32, OrderRepository, RepositoryError,
};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn create(&self, order: NewOrder) -> Result<OrderReceipt, RepositoryError> {
        order.validate().map_err(|error| RepositoryError::Invariant(error.to_string()))?;

        // Dropping `tx` on any early return rolls the whole aggregate back.
        let mut tx = self.pool.begin().await?;

        let company_in_scope: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM companies WHERE id = ? AND account_id = ?)",
        )
        .bind(&order.company_id.0)
        .bind(order.account_id.as_str())
        .fetch_one(&mut *tx)
        .await?;
        if company_in_scope == 0 {
            return Err(RepositoryError::ScopeViolation(format!(
                "company {} does not belong to account {}",
                order.company_id.0, order.account_id
            )));
        }

        let sequence: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(order_seq), 0) + 1 FROM orders WHERE account_id = ?",
        )
        .bind(order.account_id.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let order_id = OrderId(Uuid::new_v4().to_string());
        let order_number = OrderNumber::from_sequence(sequence);

        sqlx::query(
            "INSERT INTO orders (
                id,
                account_id,
                company_id,
                order_seq,
                order_number,
                status,
                total_amount,
                created_by,
                run_id,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, '0', ?, ?, ?)",
        )
        .bind(&order_id.0)
        .bind(order.account_id.as_str())
        .bind(&order.company_id.0)
        .bind(sequence)
        .bind(&order_number.0)
        .bind(OrderStatus::INITIAL.as_str())
        .bind(order.created_by.as_str())
        .bind(order.run_id.as_ref().map(|run_id| run_id.0.as_str()))
        .bind(format_timestamp(&Utc::now()))
        .execute(&mut *tx)
        .await?;

        let mut total_amount = Decimal::ZERO;
        for item in &order.items {
            let price: Option<String> = sqlx::query_scalar(
                "SELECT unit_price FROM products WHERE id = ? AND account_id = ? AND active = 1",
            )
            .bind(&item.product_id.0)
            .bind(order.account_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
            let unit_price = match price {
                Some(raw) => parse_decimal("unit_price", raw)?,
                None => {
                    return Err(RepositoryError::ScopeViolation(format!(
                        "product {} is not an active product of account {}",
                        item.product_id.0, order.account_id
                    )))
                }
            };

            let total = line_total(unit_price, item.quantity);
            total_amount += total;

            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, quantity, unit_price, line_total)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&order_id.0)
            .bind(&item.product_id.0)
            .bind(i64::from(item.quantity))
            .bind(unit_price.to_string())
            .bind(total.to_string())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE orders SET total_amount = ? WHERE id = ?")
            .bind(total_amount.to_string())
            .bind(&order_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(OrderReceipt {
            order_id,
            order_number,
            company_id: order.company_id,
            item_count: order.items.len(),
            total_amount,
        })
    }

    async fn find_by_id(
        &self,
        account_id: &AccountId,
        id: &OrderId,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id,
                account_id,
                company_id,
                order_number,
                status,
                total_amount,
                created_by,
                run_id,
                created_at
             FROM orders
             WHERE id = ? AND account_id = ?",
        )
        .bind(&id.0)
        .bind(account_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items = sqlx::query(
            "SELECT id, order_id, product_id, quantity, unit_price, line_total
             FROM order_items
             WHERE order_id = ?
             ORDER BY rowid ASC",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(item_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        order_from_row(row, items).map(Some)
    }

    async fn count_for_account(&self, account_id: &AccountId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM orders WHERE account_id = ?")
            .bind(account_id.as_str())
            .fetch_one(&self.pool)
            .await?;
        u64::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("negative order count: {count}")))
    }
}

fn order_from_row(row: SqliteRow, items: Vec<OrderItem>) -> Result<Order, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = OrderStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown order status `{status_raw}`")))?;

    Ok(Order {
        id: OrderId(row.try_get("id")?),
        account_id: AccountId(row.try_get("account_id")?),
        company_id: CompanyId(row.try_get("company_id")?),
        order_number: OrderNumber(row.try_get("order_number")?),
        status,
        total_amount: parse_decimal("total_amount", row.try_get("total_amount")?)?,
        created_by: UserId(row.try_get("created_by")?),
        run_id: row.try_get::<Option<String>, _>("run_id")?.map(RunId),
        items,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn item_from_row(row: SqliteRow) -> Result<OrderItem, RepositoryError> {
    Ok(OrderItem {
        id: OrderItemId(row.try_get("id")?),
        order_id: OrderId(row.try_get("order_id")?),
        product_id: ProductId(row.try_get("product_id")?),
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        unit_price: parse_decimal("unit_price", row.try_get("unit_price")?)?,
        line_total: parse_decimal("line_total", row.try_get("line_total")?)?,
    })
}

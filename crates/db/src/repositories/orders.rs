use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::DbPool;

use super::{NewOrder, OrderRecord, OrderRepository, RepositoryError};

#[derive(Clone)]
pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn order_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<OrderRecord, RepositoryError> {
    let order_date: DateTime<Utc> = row.get("order_date");
    Ok(OrderRecord {
        order_id: row.get("order_id"),
        org_id: row.get("org_id"),
        customer_name: row.get("customer_name"),
        customer_email: row.get("customer_email"),
        status: row.get("status"),
        total_amount_cents: row.get("total_amount_cents"),
        placed_by: row.get("placed_by"),
        order_date,
    })
}

const ORDER_COLUMNS: &str = "order_id, org_id, customer_name, customer_email, status, \
                             total_amount_cents, placed_by, order_date";

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn fetch_order(
        &self,
        org_id: &str,
        order_id: i64,
    ) -> Result<Option<OrderRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM customer_order WHERE org_id = ? AND order_id = ?"
        ))
        .bind(org_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn update_status(
        &self,
        org_id: &str,
        order_id: i64,
        status: &str,
    ) -> Result<Option<OrderRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "UPDATE customer_order SET status = ?, updated_at = datetime('now') \
             WHERE org_id = ? AND order_id = ? \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(status)
        .bind(org_id)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn create_order(&self, order: NewOrder) -> Result<OrderRecord, RepositoryError> {
        let total = order.total_amount_cents();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "INSERT INTO customer_order \
                 (org_id, customer_name, customer_email, customer_phone, status, \
                  total_amount_cents, shipping_address, payment_method, notes, \
                  placed_by, order_date) \
             VALUES (?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?) \
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(&order.org_id)
        .bind(&order.customer_name)
        .bind(&order.customer_email)
        .bind(&order.customer_phone)
        .bind(total)
        .bind(&order.shipping_address)
        .bind(&order.payment_method)
        .bind(&order.notes)
        .bind(&order.placed_by)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;
        let record = order_from_row(&row)?;

        for item in &order.items {
            sqlx::query(
                "INSERT INTO order_item (order_id, product_id, quantity, price_at_order_cents) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(record.order_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(record)
    }
}

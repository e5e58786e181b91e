use sqlx::Row;

use crate::DbPool;

use super::{NewReorderRequest, ReorderRepository, RepositoryError};

#[derive(Clone)]
pub struct SqlReorderRepository {
    pool: DbPool,
}

impl SqlReorderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReorderRepository for SqlReorderRepository {
    async fn create_reorder(&self, request: NewReorderRequest) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            "INSERT INTO reorder_request \
                 (org_id, product_id, warehouse_id, quantity, priority, notes, requested_by) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             RETURNING reorder_request_id",
        )
        .bind(&request.org_id)
        .bind(request.product_id)
        .bind(request.warehouse_id)
        .bind(request.quantity)
        .bind(&request.priority)
        .bind(&request.notes)
        .bind(&request.requested_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("reorder_request_id"))
    }
}

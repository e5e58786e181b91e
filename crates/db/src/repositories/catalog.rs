use sqlx::Row;

use crate::DbPool;

use super::{
    CatalogRepository, ProductRecord, RepositoryError, StockLevel, StockRepository,
    WarehouseRecord,
};

#[derive(Clone)]
pub struct SqlCatalogRepository {
    pool: DbPool,
}

impl SqlCatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn product_from_row(row: &sqlx::sqlite::SqliteRow) -> ProductRecord {
    ProductRecord {
        product_id: row.get("product_id"),
        org_id: row.get("org_id"),
        name: row.get("name"),
        sku: row.get("sku"),
        unit_price_cents: row.get("unit_price_cents"),
    }
}

fn warehouse_from_row(row: &sqlx::sqlite::SqliteRow) -> WarehouseRecord {
    WarehouseRecord {
        warehouse_id: row.get("warehouse_id"),
        org_id: row.get("org_id"),
        name: row.get("name"),
    }
}

/// LIKE special characters in user text are treated literally.
fn like_pattern(query: &str) -> String {
    let escaped = query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait::async_trait]
impl CatalogRepository for SqlCatalogRepository {
    async fn find_product(
        &self,
        org_id: &str,
        name: &str,
    ) -> Result<Option<ProductRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT product_id, org_id, name, sku, unit_price_cents FROM product \
             WHERE org_id = ? AND name = ? COLLATE NOCASE",
        )
        .bind(org_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(product_from_row))
    }

    async fn search_products(
        &self,
        org_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<ProductRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT product_id, org_id, name, sku, unit_price_cents FROM product \
             WHERE org_id = ? AND name LIKE ? ESCAPE '\\' COLLATE NOCASE \
             ORDER BY name ASC LIMIT ?",
        )
        .bind(org_id)
        .bind(like_pattern(query))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(product_from_row).collect())
    }

    async fn find_warehouse(
        &self,
        org_id: &str,
        name: &str,
    ) -> Result<Option<WarehouseRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT warehouse_id, org_id, name FROM warehouse \
             WHERE org_id = ? AND name = ? COLLATE NOCASE",
        )
        .bind(org_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(warehouse_from_row))
    }

    async fn search_warehouses(
        &self,
        org_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<WarehouseRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT warehouse_id, org_id, name FROM warehouse \
             WHERE org_id = ? AND name LIKE ? ESCAPE '\\' COLLATE NOCASE \
             ORDER BY name ASC LIMIT ?",
        )
        .bind(org_id)
        .bind(like_pattern(query))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(warehouse_from_row).collect())
    }

    async fn stock_levels(
        &self,
        org_id: &str,
        product_id: Option<i64>,
        warehouse_id: Option<i64>,
    ) -> Result<Vec<StockLevel>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT s.product_id, p.name AS product_name, \
                    s.warehouse_id, w.name AS warehouse_name, s.quantity \
             FROM product_stock s \
             JOIN product p ON p.product_id = s.product_id \
             JOIN warehouse w ON w.warehouse_id = s.warehouse_id \
             WHERE p.org_id = ? \
               AND (? IS NULL OR s.product_id = ?) \
               AND (? IS NULL OR s.warehouse_id = ?) \
             ORDER BY p.name ASC, w.name ASC",
        )
        .bind(org_id)
        .bind(product_id)
        .bind(product_id)
        .bind(warehouse_id)
        .bind(warehouse_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| StockLevel {
                product_id: row.get("product_id"),
                product_name: row.get("product_name"),
                warehouse_id: row.get("warehouse_id"),
                warehouse_name: row.get("warehouse_name"),
                quantity: row.get("quantity"),
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl StockRepository for SqlCatalogRepository {
    async fn upsert_stock(
        &self,
        org_id: &str,
        product_id: i64,
        warehouse_id: i64,
        quantity: i64,
    ) -> Result<i64, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let owned = sqlx::query("SELECT 1 FROM product WHERE product_id = ? AND org_id = ?")
            .bind(product_id)
            .bind(org_id)
            .fetch_optional(&mut *tx)
            .await?;
        if owned.is_none() {
            return Err(RepositoryError::Conflict(
                "product does not belong to this organization".to_owned(),
            ));
        }

        let previous: i64 = sqlx::query(
            "SELECT quantity FROM product_stock WHERE product_id = ? AND warehouse_id = ?",
        )
        .bind(product_id)
        .bind(warehouse_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|row| row.get("quantity"))
        .unwrap_or(0);

        sqlx::query(
            "INSERT INTO product_stock (product_id, warehouse_id, quantity) VALUES (?, ?, ?) \
             ON CONFLICT(product_id, warehouse_id) DO UPDATE SET quantity = excluded.quantity",
        )
        .bind(product_id)
        .bind(warehouse_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(previous)
    }

    async fn transfer_stock(
        &self,
        org_id: &str,
        product_id: i64,
        from_warehouse_id: i64,
        to_warehouse_id: i64,
        quantity: i64,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let owned = sqlx::query("SELECT 1 FROM product WHERE product_id = ? AND org_id = ?")
            .bind(product_id)
            .bind(org_id)
            .fetch_optional(&mut *tx)
            .await?;
        if owned.is_none() {
            return Err(RepositoryError::Conflict(
                "product does not belong to this organization".to_owned(),
            ));
        }

        // The guard on `quantity >=` makes the deduction refuse rather
        // than drive the source row negative.
        let deducted = sqlx::query(
            "UPDATE product_stock SET quantity = quantity - ? \
             WHERE product_id = ? AND warehouse_id = ? AND quantity >= ?",
        )
        .bind(quantity)
        .bind(product_id)
        .bind(from_warehouse_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;
        if deducted.rows_affected() == 0 {
            return Err(RepositoryError::Conflict("insufficient stock at source".to_owned()));
        }

        sqlx::query(
            "INSERT INTO product_stock (product_id, warehouse_id, quantity) VALUES (?, ?, ?) \
             ON CONFLICT(product_id, warehouse_id) DO UPDATE \
             SET quantity = quantity + excluded.quantity",
        )
        .bind(product_id)
        .bind(to_warehouse_id)
        .bind(quantity)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{CatalogRepository, RepositoryError, StockRepository};
    use super::SqlCatalogRepository;
    use crate::{connect_with_settings, migrations::run_pending, DbPool};

    async fn seeded_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");

        for (org, name, sku, price) in [
            ("org-1", "Laptop Pro 15", "LP-15", 149_900),
            ("org-1", "Laptop Air 13", "LA-13", 99_900),
            ("org-1", "Desk Lamp", "DL-01", 2_500),
            ("org-2", "Laptop Pro 15", "LP-15", 159_900),
        ] {
            sqlx::query(
                "INSERT INTO product (org_id, name, sku, unit_price_cents) VALUES (?, ?, ?, ?)",
            )
            .bind(org)
            .bind(name)
            .bind(sku)
            .bind(price)
            .execute(&pool)
            .await
            .expect("seed product");
        }

        for (org, name) in [("org-1", "East Coast"), ("org-1", "West Coast")] {
            sqlx::query("INSERT INTO warehouse (org_id, name) VALUES (?, ?)")
                .bind(org)
                .bind(name)
                .execute(&pool)
                .await
                .expect("seed warehouse");
        }

        for (product, warehouse, qty) in [(1, 1, 42), (1, 2, 7), (2, 1, 0)] {
            sqlx::query(
                "INSERT INTO product_stock (product_id, warehouse_id, quantity) VALUES (?, ?, ?)",
            )
            .bind(product)
            .bind(warehouse)
            .bind(qty)
            .execute(&pool)
            .await
            .expect("seed stock");
        }

        pool
    }

    #[tokio::test]
    async fn find_product_is_case_insensitive_and_org_scoped() {
        let repo = SqlCatalogRepository::new(seeded_pool().await);

        let hit = repo.find_product("org-1", "laptop pro 15").await.expect("query");
        let hit = hit.expect("product found");
        assert_eq!(hit.sku, "LP-15");
        assert_eq!(hit.unit_price_cents, 149_900);

        let other_org = repo.find_product("org-3", "Laptop Pro 15").await.expect("query");
        assert!(other_org.is_none());
    }

    #[tokio::test]
    async fn search_products_returns_substring_matches_in_order() {
        let repo = SqlCatalogRepository::new(seeded_pool().await);

        let hits = repo.search_products("org-1", "laptop", 3).await.expect("query");
        let names: Vec<&str> = hits.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Laptop Air 13", "Laptop Pro 15"]);
    }

    #[tokio::test]
    async fn search_treats_like_wildcards_literally() {
        let repo = SqlCatalogRepository::new(seeded_pool().await);
        let hits = repo.search_products("org-1", "%", 5).await.expect("query");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn stock_levels_filters_by_product_and_warehouse() {
        let repo = SqlCatalogRepository::new(seeded_pool().await);

        let all = repo.stock_levels("org-1", None, None).await.expect("query");
        assert_eq!(all.len(), 3);

        let one = repo.stock_levels("org-1", Some(1), Some(2)).await.expect("query");
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].warehouse_name, "West Coast");
        assert_eq!(one[0].quantity, 7);
    }

    #[tokio::test]
    async fn upsert_stock_overwrites_and_creates_rows() {
        let repo = SqlCatalogRepository::new(seeded_pool().await);

        // Existing row (product 1 at warehouse 1 holds 42).
        let previous = repo.upsert_stock("org-1", 1, 1, 100).await.expect("upsert");
        assert_eq!(previous, 42);

        // New row (product 3 has no stock anywhere yet).
        let previous = repo.upsert_stock("org-1", 3, 1, 12).await.expect("upsert");
        assert_eq!(previous, 0);

        let levels = repo.stock_levels("org-1", Some(3), None).await.expect("query");
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].quantity, 12);

        // Product 4 belongs to org-2.
        let foreign = repo.upsert_stock("org-1", 4, 1, 5).await;
        assert!(matches!(foreign, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn transfer_moves_stock_and_refuses_shortfalls() {
        let repo = SqlCatalogRepository::new(seeded_pool().await);

        // 42 at East (warehouse 1), 7 at West (warehouse 2).
        repo.transfer_stock("org-1", 1, 1, 2, 10).await.expect("transfer");
        let levels = repo.stock_levels("org-1", Some(1), None).await.expect("query");
        assert_eq!(levels[0].quantity, 32);
        assert_eq!(levels[1].quantity, 17);

        let short = repo.transfer_stock("org-1", 1, 2, 1, 500).await;
        assert!(matches!(short, Err(RepositoryError::Conflict(ref message))
            if message.contains("insufficient stock")));

        // The refused transfer must not have touched either side.
        let levels = repo.stock_levels("org-1", Some(1), None).await.expect("query");
        assert_eq!(levels[0].quantity, 32);
        assert_eq!(levels[1].quantity, 17);
    }
}

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::{
    CatalogRepository, NewOrder, NewReorderRequest, OrderRecord, OrderRepository, ProductRecord,
    ReorderRepository, RepositoryError, StockLevel, StockRepository, WarehouseRecord,
};

#[derive(Default)]
struct TenantState {
    products: Vec<ProductRecord>,
    warehouses: Vec<WarehouseRecord>,
    stock: Vec<(i64, i64, i64)>,
    orders: Vec<OrderRecord>,
    reorders: Vec<NewReorderRequest>,
}

/// In-memory stand-in for the SQL repositories. Tests seed it through
/// the `add_*` helpers and hand out one clone per trait object.
#[derive(Clone, Default)]
pub struct InMemoryTenantStore {
    state: Arc<RwLock<TenantState>>,
}

impl InMemoryTenantStore {
    fn read(&self) -> RwLockReadGuard<'_, TenantState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, TenantState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_product(&self, org_id: &str, name: &str, sku: &str, unit_price_cents: i64) -> i64 {
        let mut state = self.write();
        let product_id = state.products.len() as i64 + 1;
        state.products.push(ProductRecord {
            product_id,
            org_id: org_id.to_owned(),
            name: name.to_owned(),
            sku: sku.to_owned(),
            unit_price_cents,
        });
        product_id
    }

    pub fn add_warehouse(&self, org_id: &str, name: &str) -> i64 {
        let mut state = self.write();
        let warehouse_id = state.warehouses.len() as i64 + 1;
        state.warehouses.push(WarehouseRecord {
            warehouse_id,
            org_id: org_id.to_owned(),
            name: name.to_owned(),
        });
        warehouse_id
    }

    pub fn set_stock(&self, product_id: i64, warehouse_id: i64, quantity: i64) {
        let mut state = self.write();
        if let Some(row) =
            state.stock.iter_mut().find(|(p, w, _)| *p == product_id && *w == warehouse_id)
        {
            row.2 = quantity;
        } else {
            state.stock.push((product_id, warehouse_id, quantity));
        }
    }

    pub fn orders(&self) -> Vec<OrderRecord> {
        self.read().orders.clone()
    }

    pub fn reorders(&self) -> Vec<NewReorderRequest> {
        self.read().reorders.clone()
    }
}

#[async_trait::async_trait]
impl CatalogRepository for InMemoryTenantStore {
    async fn find_product(
        &self,
        org_id: &str,
        name: &str,
    ) -> Result<Option<ProductRecord>, RepositoryError> {
        Ok(self
            .read()
            .products
            .iter()
            .find(|p| p.org_id == org_id && p.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn search_products(
        &self,
        org_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<ProductRecord>, RepositoryError> {
        let needle = query.to_lowercase();
        let mut hits: Vec<ProductRecord> = self
            .read()
            .products
            .iter()
            .filter(|p| p.org_id == org_id && p.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn find_warehouse(
        &self,
        org_id: &str,
        name: &str,
    ) -> Result<Option<WarehouseRecord>, RepositoryError> {
        Ok(self
            .read()
            .warehouses
            .iter()
            .find(|w| w.org_id == org_id && w.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn search_warehouses(
        &self,
        org_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<WarehouseRecord>, RepositoryError> {
        let needle = query.to_lowercase();
        let mut hits: Vec<WarehouseRecord> = self
            .read()
            .warehouses
            .iter()
            .filter(|w| w.org_id == org_id && w.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.name.cmp(&b.name));
        hits.truncate(limit as usize);
        Ok(hits)
    }

    async fn stock_levels(
        &self,
        org_id: &str,
        product_id: Option<i64>,
        warehouse_id: Option<i64>,
    ) -> Result<Vec<StockLevel>, RepositoryError> {
        let state = self.read();
        let mut levels: Vec<StockLevel> = state
            .stock
            .iter()
            .filter(|(p, w, _)| {
                product_id.map_or(true, |id| *p == id) && warehouse_id.map_or(true, |id| *w == id)
            })
            .filter_map(|(p, w, quantity)| {
                let product = state
                    .products
                    .iter()
                    .find(|record| record.product_id == *p && record.org_id == org_id)?;
                let warehouse =
                    state.warehouses.iter().find(|record| record.warehouse_id == *w)?;
                Some(StockLevel {
                    product_id: *p,
                    product_name: product.name.clone(),
                    warehouse_id: *w,
                    warehouse_name: warehouse.name.clone(),
                    quantity: *quantity,
                })
            })
            .collect();
        levels.sort_by(|a, b| {
            (a.product_name.as_str(), a.warehouse_name.as_str())
                .cmp(&(b.product_name.as_str(), b.warehouse_name.as_str()))
        });
        Ok(levels)
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryTenantStore {
    async fn fetch_order(
        &self,
        org_id: &str,
        order_id: i64,
    ) -> Result<Option<OrderRecord>, RepositoryError> {
        Ok(self
            .read()
            .orders
            .iter()
            .find(|o| o.org_id == org_id && o.order_id == order_id)
            .cloned())
    }

    async fn update_status(
        &self,
        org_id: &str,
        order_id: i64,
        status: &str,
    ) -> Result<Option<OrderRecord>, RepositoryError> {
        let mut state = self.write();
        let Some(order) =
            state.orders.iter_mut().find(|o| o.org_id == org_id && o.order_id == order_id)
        else {
            return Ok(None);
        };
        order.status = status.to_owned();
        Ok(Some(order.clone()))
    }

    async fn create_order(&self, order: NewOrder) -> Result<OrderRecord, RepositoryError> {
        let total = order.total_amount_cents();
        let mut state = self.write();
        let record = OrderRecord {
            order_id: state.orders.len() as i64 + 1,
            org_id: order.org_id,
            customer_name: order.customer_name,
            customer_email: order.customer_email,
            status: "pending".to_owned(),
            total_amount_cents: total,
            placed_by: order.placed_by,
            order_date: Utc::now(),
        };
        state.orders.push(record.clone());
        Ok(record)
    }
}

#[async_trait::async_trait]
impl StockRepository for InMemoryTenantStore {
    async fn upsert_stock(
        &self,
        org_id: &str,
        product_id: i64,
        warehouse_id: i64,
        quantity: i64,
    ) -> Result<i64, RepositoryError> {
        let mut state = self.write();
        if !state.products.iter().any(|p| p.product_id == product_id && p.org_id == org_id) {
            return Err(RepositoryError::Conflict(
                "product does not belong to this organization".to_owned(),
            ));
        }
        if let Some(row) =
            state.stock.iter_mut().find(|(p, w, _)| *p == product_id && *w == warehouse_id)
        {
            let previous = row.2;
            row.2 = quantity;
            Ok(previous)
        } else {
            state.stock.push((product_id, warehouse_id, quantity));
            Ok(0)
        }
    }

    async fn transfer_stock(
        &self,
        org_id: &str,
        product_id: i64,
        from_warehouse_id: i64,
        to_warehouse_id: i64,
        quantity: i64,
    ) -> Result<(), RepositoryError> {
        let mut state = self.write();
        if !state.products.iter().any(|p| p.product_id == product_id && p.org_id == org_id) {
            return Err(RepositoryError::Conflict(
                "product does not belong to this organization".to_owned(),
            ));
        }
        let available = state
            .stock
            .iter()
            .find(|(p, w, _)| *p == product_id && *w == from_warehouse_id)
            .map(|(_, _, q)| *q)
            .unwrap_or(0);
        if available < quantity {
            return Err(RepositoryError::Conflict("insufficient stock at source".to_owned()));
        }
        if let Some(source) =
            state.stock.iter_mut().find(|(p, w, _)| *p == product_id && *w == from_warehouse_id)
        {
            source.2 -= quantity;
        }
        if let Some(dest) =
            state.stock.iter_mut().find(|(p, w, _)| *p == product_id && *w == to_warehouse_id)
        {
            dest.2 += quantity;
        } else {
            state.stock.push((product_id, to_warehouse_id, quantity));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReorderRepository for InMemoryTenantStore {
    async fn create_reorder(&self, request: NewReorderRequest) -> Result<i64, RepositoryError> {
        let mut state = self.write();
        state.reorders.push(request);
        Ok(state.reorders.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{
        CatalogRepository, NewOrder, NewOrderItem, OrderRepository, RepositoryError,
        StockRepository,
    };
    use super::InMemoryTenantStore;

    #[tokio::test]
    async fn behaves_like_the_sql_catalog_for_lookups() {
        let store = InMemoryTenantStore::default();
        let laptop = store.add_product("org-1", "Laptop Pro 15", "LP-15", 149_900);
        store.add_product("org-1", "Desk Lamp", "DL-01", 2_500);
        let east = store.add_warehouse("org-1", "East Coast");
        store.set_stock(laptop, east, 42);

        let found = store.find_product("org-1", "laptop pro 15").await.expect("query");
        assert_eq!(found.expect("hit").product_id, laptop);

        let suggestions = store.search_products("org-1", "la", 3).await.expect("query");
        assert_eq!(suggestions.len(), 2);

        let stock = store.stock_levels("org-1", Some(laptop), None).await.expect("query");
        assert_eq!(stock.len(), 1);
        assert_eq!(stock[0].quantity, 42);
    }

    #[tokio::test]
    async fn orders_round_trip_with_status_updates() {
        let store = InMemoryTenantStore::default();
        let record = store
            .create_order(NewOrder {
                org_id: "org-1".to_owned(),
                customer_name: "Dana Smith".to_owned(),
                customer_email: "dana@example.com".to_owned(),
                customer_phone: None,
                shipping_address: None,
                payment_method: None,
                notes: None,
                placed_by: "user-7".to_owned(),
                items: vec![NewOrderItem { product_id: 1, quantity: 3, unit_price_cents: 1_000 }],
            })
            .await
            .expect("create");
        assert_eq!(record.total_amount_cents, 3_000);

        let updated = store
            .update_status("org-1", record.order_id, "shipped")
            .await
            .expect("query")
            .expect("order exists");
        assert_eq!(updated.status, "shipped");
        assert!(store.fetch_order("org-2", record.order_id).await.expect("query").is_none());
    }

    #[tokio::test]
    async fn stock_writes_match_the_sql_repository_contract() {
        let store = InMemoryTenantStore::default();
        let laptop = store.add_product("org-1", "Laptop Pro 15", "LP-15", 149_900);
        let east = store.add_warehouse("org-1", "East Coast");
        let west = store.add_warehouse("org-1", "West Coast");
        store.set_stock(laptop, east, 42);

        let previous = store.upsert_stock("org-1", laptop, east, 100).await.expect("upsert");
        assert_eq!(previous, 42);

        store.transfer_stock("org-1", laptop, east, west, 30).await.expect("transfer");
        let levels = store.stock_levels("org-1", Some(laptop), None).await.expect("query");
        assert_eq!(levels[0].quantity, 70);
        assert_eq!(levels[1].quantity, 30);

        let short = store.transfer_stock("org-1", laptop, west, east, 500).await;
        assert!(matches!(short, Err(RepositoryError::Conflict(_))));

        let foreign = store.upsert_stock("org-2", laptop, east, 5).await;
        assert!(matches!(foreign, Err(RepositoryError::Conflict(_))));
    }
}

//! Tenant data access. Every query is scoped by `org_id`; a row from
//! another organization is never reachable through these traits.

mod catalog;
mod memory;
mod orders;
mod reorders;

pub use catalog::SqlCatalogRepository;
pub use memory::InMemoryTenantStore;
pub use orders::SqlOrderRepository;
pub use reorders::SqlReorderRepository;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database failure: {0}")]
    Database(String),
    /// The write was refused because current state forbids it, e.g. a
    /// transfer that would drive a stock row negative.
    #[error("conflicting update: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database(error.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductRecord {
    pub product_id: i64,
    pub org_id: String,
    pub name: String,
    pub sku: String,
    pub unit_price_cents: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WarehouseRecord {
    pub warehouse_id: i64,
    pub org_id: String,
    pub name: String,
}

/// One product/warehouse stock row, joined with display names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockLevel {
    pub product_id: i64,
    pub product_name: String,
    pub warehouse_id: i64,
    pub warehouse_name: String,
    pub quantity: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderRecord {
    pub order_id: i64,
    pub org_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub status: String,
    pub total_amount_cents: i64,
    pub placed_by: String,
    pub order_date: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewOrderItem {
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Clone, Debug)]
pub struct NewOrder {
    pub org_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub shipping_address: Option<String>,
    pub payment_method: Option<String>,
    pub notes: Option<String>,
    pub placed_by: String,
    pub items: Vec<NewOrderItem>,
}

impl NewOrder {
    pub fn total_amount_cents(&self) -> i64 {
        self.items.iter().map(|item| item.quantity * item.unit_price_cents).sum()
    }
}

#[derive(Clone, Debug)]
pub struct NewReorderRequest {
    pub org_id: String,
    pub product_id: i64,
    pub warehouse_id: i64,
    pub quantity: i64,
    pub priority: String,
    pub notes: Option<String>,
    pub requested_by: String,
}

#[async_trait::async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Case-insensitive exact name match.
    async fn find_product(
        &self,
        org_id: &str,
        name: &str,
    ) -> Result<Option<ProductRecord>, RepositoryError>;

    /// Substring search, for suggestions when the exact match fails.
    async fn search_products(
        &self,
        org_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<ProductRecord>, RepositoryError>;

    async fn find_warehouse(
        &self,
        org_id: &str,
        name: &str,
    ) -> Result<Option<WarehouseRecord>, RepositoryError>;

    async fn search_warehouses(
        &self,
        org_id: &str,
        query: &str,
        limit: u32,
    ) -> Result<Vec<WarehouseRecord>, RepositoryError>;

    /// Stock rows for the org, optionally narrowed to one product
    /// and/or one warehouse.
    async fn stock_levels(
        &self,
        org_id: &str,
        product_id: Option<i64>,
        warehouse_id: Option<i64>,
    ) -> Result<Vec<StockLevel>, RepositoryError>;
}

#[async_trait::async_trait]
pub trait OrderRepository: Send + Sync {
    async fn fetch_order(
        &self,
        org_id: &str,
        order_id: i64,
    ) -> Result<Option<OrderRecord>, RepositoryError>;

    /// Returns the updated record, or `None` when the order does not
    /// exist in this org.
    async fn update_status(
        &self,
        org_id: &str,
        order_id: i64,
        status: &str,
    ) -> Result<Option<OrderRecord>, RepositoryError>;

    /// Inserts the order and all of its items atomically.
    async fn create_order(&self, order: NewOrder) -> Result<OrderRecord, RepositoryError>;
}

#[async_trait::async_trait]
pub trait ReorderRepository: Send + Sync {
    async fn create_reorder(&self, request: NewReorderRequest) -> Result<i64, RepositoryError>;
}

#[async_trait::async_trait]
pub trait StockRepository: Send + Sync {
    /// Sets the absolute stock quantity for a product at a warehouse,
    /// creating the row when it does not exist yet. Returns the
    /// previous quantity (zero for a new row).
    async fn upsert_stock(
        &self,
        org_id: &str,
        product_id: i64,
        warehouse_id: i64,
        quantity: i64,
    ) -> Result<i64, RepositoryError>;

    /// Moves `quantity` units between two warehouses atomically.
    /// Fails with [`RepositoryError::Conflict`] when the source holds
    /// fewer units than requested.
    async fn transfer_stock(
        &self,
        org_id: &str,
        product_id: i64,
        from_warehouse_id: i64,
        to_warehouse_id: i64,
        quantity: i64,
    ) -> Result<(), RepositoryError>;
}

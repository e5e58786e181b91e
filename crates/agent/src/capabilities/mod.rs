//! Concrete capabilities behind the propose/confirm/execute engine.
//! Each one owns its domain feasibility checks and writes; the engine
//! in `steward-core` owns role gating and field validation.

mod cancel_order;
mod create_order;
mod order_status;
mod reorder;
mod stock_levels;
mod transfer_stock;
mod update_stock;

pub use cancel_order::CancelOrder;
pub use create_order::CreateOrder;
pub use order_status::UpdateOrderStatus;
pub use reorder::CreateReorderRequest;
pub use stock_levels::StockLevels;
pub use transfer_stock::TransferStock;
pub use update_stock::UpdateStock;

use serde_json::Value;
use steward_core::{ActionParams, Capability, CapabilityError, CapabilitySpec};
use steward_db::repositories::{CatalogRepository, ProductRecord, RepositoryError, WarehouseRecord};

/// Lookup table the router consults by capability name.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<Capability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, capability: Capability) {
        self.capabilities.push(capability);
    }

    pub fn get(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|capability| capability.spec().name == name)
    }

    pub fn specs(&self) -> Vec<&CapabilitySpec> {
        self.capabilities.iter().map(Capability::spec).collect()
    }
}

pub(crate) fn storage_error(error: RepositoryError) -> CapabilityError {
    CapabilityError::Storage(error.to_string())
}

pub(crate) fn str_param<'a>(params: &'a ActionParams, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

pub(crate) fn int_param(params: &ActionParams, key: &str) -> Option<i64> {
    params.get(key).and_then(Value::as_i64)
}

pub(crate) fn format_cents(cents: i64) -> String {
    format!("${}.{:02}", cents / 100, (cents % 100).abs())
}

pub(crate) enum Resolved<T> {
    Found(T),
    /// User-facing failure message with up to three suggestions; the
    /// resolver never guesses on its own.
    NotFound(String),
}

/// Exact name match first, then substring fallback where the shortest
/// candidate wins (closest to what the user typed).
pub(crate) async fn resolve_product(
    catalog: &dyn CatalogRepository,
    org_id: &str,
    name: &str,
) -> Result<Resolved<ProductRecord>, CapabilityError> {
    if let Some(product) = catalog.find_product(org_id, name).await.map_err(storage_error)? {
        return Ok(Resolved::Found(product));
    }

    let candidates = catalog.search_products(org_id, name, 10).await.map_err(storage_error)?;
    if let Some(best) = candidates.into_iter().min_by_key(|p| p.name.len()) {
        return Ok(Resolved::Found(best));
    }

    let suggestions = catalog.search_products(org_id, "", 3).await.map_err(storage_error)?;
    let mut message = format!("Product '{name}' not found.");
    if !suggestions.is_empty() {
        let names: Vec<&str> = suggestions.iter().map(|p| p.name.as_str()).collect();
        message.push_str(&format!(" Did you mean: {}?", names.join(", ")));
    }
    Ok(Resolved::NotFound(message))
}

pub(crate) async fn resolve_warehouse(
    catalog: &dyn CatalogRepository,
    org_id: &str,
    name: &str,
) -> Result<Resolved<WarehouseRecord>, CapabilityError> {
    if let Some(warehouse) = catalog.find_warehouse(org_id, name).await.map_err(storage_error)? {
        return Ok(Resolved::Found(warehouse));
    }

    let candidates = catalog.search_warehouses(org_id, name, 10).await.map_err(storage_error)?;
    if let Some(best) = candidates.into_iter().min_by_key(|w| w.name.len()) {
        return Ok(Resolved::Found(best));
    }

    let suggestions = catalog.search_warehouses(org_id, "", 3).await.map_err(storage_error)?;
    let mut message = format!("Warehouse '{name}' not found.");
    if !suggestions.is_empty() {
        let names: Vec<&str> = suggestions.iter().map(|w| w.name.as_str()).collect();
        message.push_str(&format!(" Available warehouses: {}", names.join(", ")));
    }
    Ok(Resolved::NotFound(message))
}

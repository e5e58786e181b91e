use std::sync::Arc;

use serde_json::json;
use steward_core::{
    ActionParams, ActionResult, CapabilityError, CapabilitySpec, ExecutionContext,
    MutatingCapability, Role,
};
use steward_db::repositories::{
    CatalogRepository, ProductRecord, RepositoryError, StockRepository, WarehouseRecord,
};

use super::{int_param, resolve_product, resolve_warehouse, storage_error, str_param, Resolved};

static SPEC: CapabilitySpec = CapabilitySpec {
    name: "update_stock",
    description: "Set the stock quantity for a product at a warehouse",
    required_roles: &[Role::Admin, Role::Manager],
    required_fields: &["product_name", "warehouse_name", "quantity"],
    field_descriptions: &[
        ("product_name", "name of the product"),
        ("warehouse_name", "warehouse holding the stock"),
        ("quantity", "new stock quantity"),
    ],
};

pub struct UpdateStock {
    catalog: Arc<dyn CatalogRepository>,
    stock: Arc<dyn StockRepository>,
}

impl UpdateStock {
    pub fn new(catalog: Arc<dyn CatalogRepository>, stock: Arc<dyn StockRepository>) -> Self {
        Self { catalog, stock }
    }

    async fn resolve(
        &self,
        org_id: &str,
        params: &ActionParams,
    ) -> Result<Result<(ProductRecord, WarehouseRecord, i64), ActionResult>, CapabilityError> {
        // Zero is a legal target; only negatives are refused.
        let Some(quantity) = int_param(params, "quantity").filter(|q| *q >= 0) else {
            return Ok(Err(ActionResult::cancelled("Stock quantity cannot be negative")));
        };

        let product_name = str_param(params, "product_name").unwrap_or_default();
        let product = match resolve_product(self.catalog.as_ref(), org_id, product_name).await? {
            Resolved::Found(product) => product,
            Resolved::NotFound(message) => return Ok(Err(ActionResult::cancelled(message))),
        };

        let warehouse_name = str_param(params, "warehouse_name").unwrap_or_default();
        let warehouse =
            match resolve_warehouse(self.catalog.as_ref(), org_id, warehouse_name).await? {
                Resolved::Found(warehouse) => warehouse,
                Resolved::NotFound(message) => return Ok(Err(ActionResult::cancelled(message))),
            };

        Ok(Ok((product, warehouse, quantity)))
    }
}

#[async_trait::async_trait]
impl MutatingCapability for UpdateStock {
    fn spec(&self) -> &CapabilitySpec {
        &SPEC
    }

    async fn preview(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let (product, warehouse, quantity) = match self.resolve(&ctx.auth.org_id, params).await? {
            Ok(resolved) => resolved,
            Err(refusal) => return Ok(refusal),
        };

        let current = self
            .catalog
            .stock_levels(&ctx.auth.org_id, Some(product.product_id), Some(warehouse.warehouse_id))
            .await
            .map_err(storage_error)?
            .first()
            .map(|level| level.quantity)
            .unwrap_or(0);

        let change = quantity - current;
        let preview_data = json!({
            "product_id": product.product_id.to_string(),
            "product_name": product.name,
            "product_sku": product.sku,
            "warehouse_id": warehouse.warehouse_id.to_string(),
            "warehouse_name": warehouse.name,
            "current_quantity": current,
            "new_quantity": quantity,
            "change": change,
        });
        let confirmation = format!(
            "Set stock of **{}** ({}) at **{}** to **{quantity} units**?\n\n\
             Current: {current} units → New: {quantity} units ({change:+})",
            product.name, product.sku, warehouse.name,
        );

        Ok(ActionResult::pending(preview_data, confirmation))
    }

    async fn confirm(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let (product, warehouse, quantity) = match self.resolve(&ctx.auth.org_id, params).await? {
            Ok(resolved) => resolved,
            Err(refusal) => return Ok(refusal),
        };

        let previous = match self
            .stock
            .upsert_stock(&ctx.auth.org_id, product.product_id, warehouse.warehouse_id, quantity)
            .await
        {
            Ok(previous) => previous,
            Err(RepositoryError::Conflict(message)) => return Ok(ActionResult::cancelled(message)),
            Err(error) => return Err(storage_error(error)),
        };

        Ok(ActionResult::executed(
            format!(
                "Stock for {} at {} set to {quantity} units (was {previous})",
                product.name, warehouse.name
            ),
            None,
            Some(json!({
                "product_name": product.name,
                "warehouse_name": warehouse.name,
                "previous_quantity": previous,
                "new_quantity": quantity,
            })),
        ))
    }
}

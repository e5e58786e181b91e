use std::sync::Arc;

use serde_json::json;
use steward_core::{
    ActionParams, ActionResult, CapabilityError, CapabilitySpec, ExecutionContext,
    MutatingCapability, Role,
};
use steward_db::repositories::{
    CatalogRepository, NewReorderRequest, ProductRecord, ReorderRepository, WarehouseRecord,
};

use super::{int_param, resolve_product, resolve_warehouse, storage_error, str_param, Resolved};

static SPEC: CapabilitySpec = CapabilitySpec {
    name: "create_reorder_request",
    description: "Create a stock reorder request for products running low",
    required_roles: &[Role::Admin, Role::Manager],
    required_fields: &["product_name", "warehouse_name", "quantity"],
    field_descriptions: &[
        ("product_name", "name of the product to reorder"),
        ("warehouse_name", "name of the destination warehouse"),
        ("quantity", "quantity to order"),
        ("priority", "priority level (normal or urgent)"),
    ],
};

pub struct CreateReorderRequest {
    catalog: Arc<dyn CatalogRepository>,
    reorders: Arc<dyn ReorderRepository>,
}

impl CreateReorderRequest {
    pub fn new(catalog: Arc<dyn CatalogRepository>, reorders: Arc<dyn ReorderRepository>) -> Self {
        Self { catalog, reorders }
    }

    async fn resolve(
        &self,
        org_id: &str,
        params: &ActionParams,
    ) -> Result<Result<(ProductRecord, WarehouseRecord, i64, String), ActionResult>, CapabilityError>
    {
        let product_name = str_param(params, "product_name").unwrap_or_default();
        let warehouse_name = str_param(params, "warehouse_name").unwrap_or_default();

        let Some(quantity) = int_param(params, "quantity").filter(|q| *q > 0) else {
            return Ok(Err(ActionResult::cancelled("Quantity must be a positive number")));
        };

        let product = match resolve_product(self.catalog.as_ref(), org_id, product_name).await? {
            Resolved::Found(product) => product,
            Resolved::NotFound(message) => return Ok(Err(ActionResult::cancelled(message))),
        };
        let warehouse =
            match resolve_warehouse(self.catalog.as_ref(), org_id, warehouse_name).await? {
                Resolved::Found(warehouse) => warehouse,
                Resolved::NotFound(message) => return Ok(Err(ActionResult::cancelled(message))),
            };

        let priority = str_param(params, "priority").unwrap_or("normal").to_owned();
        Ok(Ok((product, warehouse, quantity, priority)))
    }
}

#[async_trait::async_trait]
impl MutatingCapability for CreateReorderRequest {
    fn spec(&self) -> &CapabilitySpec {
        &SPEC
    }

    async fn preview(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let (product, warehouse, quantity, priority) =
            match self.resolve(&ctx.auth.org_id, params).await? {
                Ok(resolved) => resolved,
                Err(refusal) => return Ok(refusal),
            };

        let current_stock = self
            .catalog
            .stock_levels(&ctx.auth.org_id, Some(product.product_id), Some(warehouse.warehouse_id))
            .await
            .map_err(storage_error)?
            .first()
            .map(|level| level.quantity)
            .unwrap_or(0);

        let preview_data = json!({
            "product_id": product.product_id.to_string(),
            "product_name": product.name,
            "product_sku": product.sku,
            "warehouse_id": warehouse.warehouse_id.to_string(),
            "warehouse_name": warehouse.name,
            "current_stock": current_stock,
            "quantity_to_order": quantity,
            "priority": priority,
        });
        let confirmation = format!(
            "Create reorder request for **{quantity} units** of **{}** ({}) \
             to be delivered to **{}**?\n\nCurrent stock: {current_stock} units\nPriority: {}",
            product.name,
            product.sku,
            warehouse.name,
            priority.to_uppercase(),
        );

        Ok(ActionResult::pending(preview_data, confirmation))
    }

    async fn confirm(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let (product, warehouse, quantity, priority) =
            match self.resolve(&ctx.auth.org_id, params).await? {
                Ok(resolved) => resolved,
                Err(refusal) => return Ok(refusal),
            };

        let request_id = self
            .reorders
            .create_reorder(NewReorderRequest {
                org_id: ctx.auth.org_id.clone(),
                product_id: product.product_id,
                warehouse_id: warehouse.warehouse_id,
                quantity,
                priority: priority.clone(),
                notes: str_param(params, "notes").map(str::to_owned),
                requested_by: ctx.auth.user_id.clone(),
            })
            .await
            .map_err(storage_error)?;

        Ok(ActionResult::executed(
            format!(
                "Reorder request #{request_id} created for {} → {}",
                product.name, warehouse.name
            ),
            Some(request_id.to_string()),
            Some(json!({
                "reorder_request_id": request_id.to_string(),
                "product_name": product.name,
                "warehouse_name": warehouse.name,
                "quantity": quantity,
                "priority": priority,
                "status": "pending",
            })),
        ))
    }
}

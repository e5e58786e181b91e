use std::sync::Arc;

use serde_json::json;
use steward_core::{
    ActionParams, CapabilityError, CapabilitySpec, ExecutionContext, ReadOnlyCapability,
    ToolResult,
};
use steward_db::repositories::CatalogRepository;

use super::{resolve_product, resolve_warehouse, storage_error, str_param, Resolved};

static SPEC: CapabilitySpec = CapabilitySpec {
    name: "stock_levels",
    description: "List current stock levels, optionally narrowed to a product or warehouse",
    required_roles: &[],
    required_fields: &[],
    field_descriptions: &[
        ("product_name", "limit to one product (optional)"),
        ("warehouse_name", "limit to one warehouse (optional)"),
    ],
};

pub struct StockLevels {
    catalog: Arc<dyn CatalogRepository>,
}

impl StockLevels {
    pub fn new(catalog: Arc<dyn CatalogRepository>) -> Self {
        Self { catalog }
    }
}

#[async_trait::async_trait]
impl ReadOnlyCapability for StockLevels {
    fn spec(&self) -> &CapabilitySpec {
        &SPEC
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ToolResult, CapabilityError> {
        let org_id = &ctx.auth.org_id;

        let product_id = match str_param(params, "product_name") {
            Some(name) => match resolve_product(self.catalog.as_ref(), org_id, name).await? {
                Resolved::Found(product) => Some(product.product_id),
                Resolved::NotFound(message) => return Ok(ToolResult::failed(message)),
            },
            None => None,
        };
        let warehouse_id = match str_param(params, "warehouse_name") {
            Some(name) => match resolve_warehouse(self.catalog.as_ref(), org_id, name).await? {
                Resolved::Found(warehouse) => Some(warehouse.warehouse_id),
                Resolved::NotFound(message) => return Ok(ToolResult::failed(message)),
            },
            None => None,
        };

        let levels = self
            .catalog
            .stock_levels(org_id, product_id, warehouse_id)
            .await
            .map_err(storage_error)?;

        let rows: Vec<serde_json::Value> = levels
            .iter()
            .map(|level| {
                json!({
                    "product": level.product_name,
                    "warehouse": level.warehouse_name,
                    "quantity": level.quantity,
                })
            })
            .collect();
        Ok(ToolResult::ok(json!({ "count": rows.len(), "stock": rows })))
    }
}

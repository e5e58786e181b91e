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
    name: "transfer_stock",
    description: "Move stock of a product between two warehouses",
    required_roles: &[Role::Admin, Role::Manager],
    required_fields: &["product_name", "quantity", "from_warehouse", "to_warehouse"],
    field_descriptions: &[
        ("product_name", "name of the product to move"),
        ("quantity", "number of units to move"),
        ("from_warehouse", "warehouse to take stock from"),
        ("to_warehouse", "warehouse to deliver stock to"),
    ],
};

pub struct TransferStock {
    catalog: Arc<dyn CatalogRepository>,
    stock: Arc<dyn StockRepository>,
}

impl TransferStock {
    pub fn new(catalog: Arc<dyn CatalogRepository>, stock: Arc<dyn StockRepository>) -> Self {
        Self { catalog, stock }
    }

    async fn resolve(
        &self,
        org_id: &str,
        params: &ActionParams,
    ) -> Result<
        Result<(ProductRecord, WarehouseRecord, WarehouseRecord, i64), ActionResult>,
        CapabilityError,
    > {
        let Some(quantity) = int_param(params, "quantity").filter(|q| *q > 0) else {
            return Ok(Err(ActionResult::cancelled("Quantity must be a positive number")));
        };

        let product_name = str_param(params, "product_name").unwrap_or_default();
        let product = match resolve_product(self.catalog.as_ref(), org_id, product_name).await? {
            Resolved::Found(product) => product,
            Resolved::NotFound(message) => return Ok(Err(ActionResult::cancelled(message))),
        };

        let from_name = str_param(params, "from_warehouse").unwrap_or_default();
        let from = match resolve_warehouse(self.catalog.as_ref(), org_id, from_name).await? {
            Resolved::Found(warehouse) => warehouse,
            Resolved::NotFound(message) => return Ok(Err(ActionResult::cancelled(message))),
        };
        let to_name = str_param(params, "to_warehouse").unwrap_or_default();
        let to = match resolve_warehouse(self.catalog.as_ref(), org_id, to_name).await? {
            Resolved::Found(warehouse) => warehouse,
            Resolved::NotFound(message) => return Ok(Err(ActionResult::cancelled(message))),
        };

        if from.warehouse_id == to.warehouse_id {
            return Ok(Err(ActionResult::cancelled(
                "Source and destination warehouses must be different",
            )));
        }

        Ok(Ok((product, from, to, quantity)))
    }

    async fn available_at(
        &self,
        org_id: &str,
        product_id: i64,
        warehouse_id: i64,
    ) -> Result<i64, CapabilityError> {
        Ok(self
            .catalog
            .stock_levels(org_id, Some(product_id), Some(warehouse_id))
            .await
            .map_err(storage_error)?
            .first()
            .map(|level| level.quantity)
            .unwrap_or(0))
    }
}

#[async_trait::async_trait]
impl MutatingCapability for TransferStock {
    fn spec(&self) -> &CapabilitySpec {
        &SPEC
    }

    async fn preview(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let (product, from, to, quantity) = match self.resolve(&ctx.auth.org_id, params).await? {
            Ok(resolved) => resolved,
            Err(refusal) => return Ok(refusal),
        };

        let available =
            self.available_at(&ctx.auth.org_id, product.product_id, from.warehouse_id).await?;
        if available < quantity {
            return Ok(ActionResult::cancelled(format!(
                "Insufficient stock. {} only has {available} units of {}",
                from.name, product.name
            )));
        }

        let preview_data = json!({
            "product_id": product.product_id.to_string(),
            "product_name": product.name,
            "product_sku": product.sku,
            "from_warehouse": from.name,
            "to_warehouse": to.name,
            "quantity": quantity,
            "available_at_source": available,
        });
        let confirmation = format!(
            "Transfer **{quantity} units** of **{}** ({}) from **{}** to **{}**?\n\n\
             Stock at {}: {available} units",
            product.name, product.sku, from.name, to.name, from.name,
        );

        Ok(ActionResult::pending(preview_data, confirmation))
    }

    async fn confirm(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let (product, from, to, quantity) = match self.resolve(&ctx.auth.org_id, params).await? {
            Ok(resolved) => resolved,
            Err(refusal) => return Ok(refusal),
        };

        // Feasibility is re-checked by the repository inside the
        // transaction; stock may have moved since the preview.
        match self
            .stock
            .transfer_stock(
                &ctx.auth.org_id,
                product.product_id,
                from.warehouse_id,
                to.warehouse_id,
                quantity,
            )
            .await
        {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                let available = self
                    .available_at(&ctx.auth.org_id, product.product_id, from.warehouse_id)
                    .await?;
                return Ok(ActionResult::cancelled(format!(
                    "Insufficient stock. {} only has {available} units of {}",
                    from.name, product.name
                )));
            }
            Err(error) => return Err(storage_error(error)),
        }

        Ok(ActionResult::executed(
            format!(
                "Transferred {quantity} units of {} from {} to {}",
                product.name, from.name, to.name
            ),
            None,
            Some(json!({
                "product_name": product.name,
                "from_warehouse": from.name,
                "to_warehouse": to.name,
                "quantity": quantity,
            })),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use steward_core::{ActionParams, ActionStatus, ActionWorkflow, AuthContext, ExecutionContext, Role};
    use steward_db::repositories::{CatalogRepository, InMemoryTenantStore};

    use super::TransferStock;

    fn ctx(role: Role) -> ExecutionContext {
        ExecutionContext::new(
            AuthContext { org_id: "org-1".to_owned(), user_id: "user-7".to_owned(), role },
            "sess-1",
            "msg-1",
        )
    }

    fn seeded_store() -> InMemoryTenantStore {
        let store = InMemoryTenantStore::default();
        let lamp = store.add_product("org-1", "Desk Lamp", "DL-01", 2_500);
        let east = store.add_warehouse("org-1", "East Coast");
        store.add_warehouse("org-1", "West Coast");
        store.set_stock(lamp, east, 40);
        store
    }

    fn capability(store: &InMemoryTenantStore) -> TransferStock {
        TransferStock::new(Arc::new(store.clone()), Arc::new(store.clone()))
    }

    fn params(value: serde_json::Value) -> ActionParams {
        value.as_object().expect("object literal").clone()
    }

    fn full_params() -> ActionParams {
        params(json!({
            "product_name": "Desk Lamp",
            "quantity": 10,
            "from_warehouse": "East Coast",
            "to_warehouse": "West Coast",
        }))
    }

    #[tokio::test]
    async fn proposal_then_confirmation_moves_the_stock() {
        let store = seeded_store();
        let action = capability(&store);
        let workflow = ActionWorkflow::new();
        let ctx = ctx(Role::Manager);

        let result = workflow.run(&ctx, &action, false, &full_params()).await;
        assert_eq!(result.status, ActionStatus::PendingConfirmation);
        let preview = result.preview_data.expect("preview");
        assert_eq!(preview["available_at_source"], 40);
        let levels = store.stock_levels("org-1", None, None).await.expect("query");
        assert_eq!(levels.len(), 1, "preview must not write");

        let result = workflow.run(&ctx, &action, true, &full_params()).await;
        assert_eq!(result.status, ActionStatus::Executed);
        let levels = store.stock_levels("org-1", None, None).await.expect("query");
        assert_eq!(levels[0].quantity, 30);
        assert_eq!(levels[1].quantity, 10);
    }

    #[tokio::test]
    async fn insufficient_source_stock_cancels_with_availability() {
        let store = seeded_store();
        let action = capability(&store);

        let mut short = full_params();
        short.insert("quantity".to_owned(), json!(500));
        let result = ActionWorkflow::new().run(&ctx(Role::Manager), &action, false, &short).await;

        assert_eq!(result.status, ActionStatus::Cancelled);
        let error = result.error.expect("error");
        assert!(error.contains("Insufficient stock"));
        assert!(error.contains("East Coast only has 40 units"));
    }

    #[tokio::test]
    async fn same_source_and_destination_are_refused() {
        let store = seeded_store();
        let action = capability(&store);

        let mut loops = full_params();
        loops.insert("to_warehouse".to_owned(), json!("East Coast"));
        let result = ActionWorkflow::new().run(&ctx(Role::Admin), &action, false, &loops).await;

        assert_eq!(result.status, ActionStatus::Cancelled);
        assert!(result.error.expect("error").contains("must be different"));
    }

    #[tokio::test]
    async fn non_positive_quantity_is_refused() {
        let store = seeded_store();
        let action = capability(&store);

        let mut zero = full_params();
        zero.insert("quantity".to_owned(), json!(0));
        let result = ActionWorkflow::new().run(&ctx(Role::Admin), &action, false, &zero).await;

        assert_eq!(result.status, ActionStatus::Cancelled);
        assert!(result.error.expect("error").contains("positive"));
    }
}

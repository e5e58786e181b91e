use std::sync::Arc;

use serde_json::json;
use steward_core::{
    ActionParams, ActionResult, CapabilityError, CapabilitySpec, ExecutionContext,
    MutatingCapability, Role,
};
use steward_db::repositories::{OrderRecord, OrderRepository};

use super::{format_cents, int_param, storage_error, str_param};

static SPEC: CapabilitySpec = CapabilitySpec {
    name: "cancel_order",
    description: "Cancel an order with an optional reason",
    required_roles: &[Role::Admin, Role::Manager],
    required_fields: &["order_id"],
    field_descriptions: &[
        ("order_id", "order to cancel"),
        ("reason", "optional reason for the cancellation"),
    ],
};

pub struct CancelOrder {
    orders: Arc<dyn OrderRepository>,
}

impl CancelOrder {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    /// Terminal orders cannot be cancelled; both ends of the workflow
    /// apply the same guard because state may change between them.
    fn refuse_terminal(order: &OrderRecord) -> Option<ActionResult> {
        match order.status.as_str() {
            "cancelled" => Some(ActionResult::cancelled(format!(
                "Order #{} is already cancelled",
                order.order_id
            ))),
            "delivered" => Some(ActionResult::cancelled(format!(
                "Order #{} has already been delivered and cannot be cancelled",
                order.order_id
            ))),
            _ => None,
        }
    }

    async fn fetch(
        &self,
        org_id: &str,
        params: &ActionParams,
    ) -> Result<Result<OrderRecord, ActionResult>, CapabilityError> {
        let Some(order_id) = int_param(params, "order_id").filter(|id| *id > 0) else {
            return Ok(Err(ActionResult::cancelled("Order id must be a positive number")));
        };
        let Some(order) = self.orders.fetch_order(org_id, order_id).await.map_err(storage_error)?
        else {
            return Ok(Err(ActionResult::cancelled(format!("Order #{order_id} not found"))));
        };
        if let Some(refusal) = Self::refuse_terminal(&order) {
            return Ok(Err(refusal));
        }
        Ok(Ok(order))
    }
}

#[async_trait::async_trait]
impl MutatingCapability for CancelOrder {
    fn spec(&self) -> &CapabilitySpec {
        &SPEC
    }

    async fn preview(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let order = match self.fetch(&ctx.auth.org_id, params).await? {
            Ok(order) => order,
            Err(refusal) => return Ok(refusal),
        };

        let reason = str_param(params, "reason");
        let preview_data = json!({
            "order_id": order.order_id.to_string(),
            "customer_name": order.customer_name,
            "customer_email": order.customer_email,
            "current_status": order.status,
            "total_amount_cents": order.total_amount_cents,
            "reason": reason,
        });

        let mut confirmation = format!(
            "Cancel order **#{}** for **{}**?\n\n\
             Current status: **{}**\nOrder total: {}",
            order.order_id,
            order.customer_name,
            order.status,
            format_cents(order.total_amount_cents),
        );
        if let Some(reason) = reason {
            confirmation.push_str(&format!("\nReason: {reason}"));
        }
        confirmation.push_str("\n\nThis action cannot be undone.");

        Ok(ActionResult::pending(preview_data, confirmation))
    }

    async fn confirm(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let order = match self.fetch(&ctx.auth.org_id, params).await? {
            Ok(order) => order,
            Err(refusal) => return Ok(refusal),
        };

        let Some(updated) = self
            .orders
            .update_status(&ctx.auth.org_id, order.order_id, "cancelled")
            .await
            .map_err(storage_error)?
        else {
            return Ok(ActionResult::cancelled(format!("Order #{} not found", order.order_id)));
        };

        let mut message = format!("Order #{} has been cancelled", updated.order_id);
        if let Some(reason) = str_param(params, "reason") {
            message.push_str(&format!(" ({reason})"));
        }
        Ok(ActionResult::executed(
            message,
            None,
            Some(json!({
                "order_id": updated.order_id.to_string(),
                "new_status": updated.status,
            })),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use steward_core::{
        ActionParams, ActionStatus, ActionWorkflow, AuthContext, ExecutionContext, Role,
    };
    use steward_db::repositories::{
        InMemoryTenantStore, NewOrder, NewOrderItem, OrderRepository,
    };

    use super::CancelOrder;

    fn ctx(role: Role) -> ExecutionContext {
        ExecutionContext::new(
            AuthContext { org_id: "org-1".to_owned(), user_id: "user-7".to_owned(), role },
            "sess-1",
            "msg-1",
        )
    }

    async fn store_with_order() -> (InMemoryTenantStore, i64) {
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
                items: vec![NewOrderItem { product_id: 1, quantity: 2, unit_price_cents: 5_000 }],
            })
            .await
            .expect("seed order");
        (store, record.order_id)
    }

    fn params(value: serde_json::Value) -> ActionParams {
        value.as_object().expect("object literal").clone()
    }

    #[tokio::test]
    async fn preview_warns_that_cancellation_is_final() {
        let (store, order_id) = store_with_order().await;
        let action = CancelOrder::new(Arc::new(store));

        let result = ActionWorkflow::new()
            .run(&ctx(Role::Manager), &action, false, &params(json!({
                "order_id": order_id,
                "reason": "customer changed their mind",
            })))
            .await;

        assert_eq!(result.status, ActionStatus::PendingConfirmation);
        let message = result.confirmation_message.expect("confirmation");
        assert!(message.contains("Cancel order **#1** for **Dana Smith**"));
        assert!(message.contains("$100.00"));
        assert!(message.contains("Reason: customer changed their mind"));
        assert!(message.contains("This action cannot be undone."));
    }

    #[tokio::test]
    async fn confirm_sets_the_status_to_cancelled() {
        let (store, order_id) = store_with_order().await;
        let action = CancelOrder::new(Arc::new(store.clone()));

        let result = ActionWorkflow::new()
            .run(&ctx(Role::Manager), &action, true, &params(json!({ "order_id": order_id })))
            .await;

        assert_eq!(result.status, ActionStatus::Executed);
        assert!(result.result_message.expect("message").contains("has been cancelled"));
        assert_eq!(store.orders()[0].status, "cancelled");
    }

    #[tokio::test]
    async fn terminal_orders_are_refused() {
        let (store, order_id) = store_with_order().await;
        let action = CancelOrder::new(Arc::new(store.clone()));
        let workflow = ActionWorkflow::new();

        store.update_status("org-1", order_id, "delivered").await.expect("seed status");
        let delivered = workflow
            .run(&ctx(Role::Manager), &action, false, &params(json!({ "order_id": order_id })))
            .await;
        assert_eq!(delivered.status, ActionStatus::Cancelled);
        assert!(delivered.error.expect("error").contains("already been delivered"));

        store.update_status("org-1", order_id, "cancelled").await.expect("seed status");
        let again = workflow
            .run(&ctx(Role::Manager), &action, true, &params(json!({ "order_id": order_id })))
            .await;
        assert_eq!(again.status, ActionStatus::Cancelled);
        assert!(again.error.expect("error").contains("already cancelled"));
    }

    #[tokio::test]
    async fn unknown_order_is_refused() {
        let (store, _) = store_with_order().await;
        let action = CancelOrder::new(Arc::new(store));

        let result = ActionWorkflow::new()
            .run(&ctx(Role::Admin), &action, false, &params(json!({ "order_id": 999 })))
            .await;

        assert_eq!(result.status, ActionStatus::Cancelled);
        assert!(result.error.expect("error").contains("#999 not found"));
    }
}

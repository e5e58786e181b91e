use std::sync::Arc;

use serde_json::json;
use steward_core::{
    ActionParams, ActionResult, CapabilityError, CapabilitySpec, ExecutionContext,
    MutatingCapability, Role,
};
use steward_db::repositories::OrderRepository;

use super::{format_cents, int_param, storage_error, str_param};

static SPEC: CapabilitySpec = CapabilitySpec {
    name: "update_order_status",
    description: "Update order status with optional notes",
    required_roles: &[Role::Admin, Role::Manager],
    required_fields: &["order_id", "new_status"],
    field_descriptions: &[
        ("order_id", "order to update"),
        ("new_status", "new status (pending, processing, shipped, delivered, cancelled)"),
        ("notes", "optional notes about the status change"),
    ],
};

const VALID_STATUSES: &[&str] = &["pending", "processing", "shipped", "delivered", "cancelled"];

pub struct UpdateOrderStatus {
    orders: Arc<dyn OrderRepository>,
}

impl UpdateOrderStatus {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self {
        Self { orders }
    }

    fn parse_params(params: &ActionParams) -> Result<(i64, String), ActionResult> {
        let Some(order_id) = int_param(params, "order_id").filter(|id| *id > 0) else {
            return Err(ActionResult::cancelled("Order id must be a positive number"));
        };
        let status = str_param(params, "new_status").unwrap_or_default().to_lowercase();
        if !VALID_STATUSES.contains(&status.as_str()) {
            return Err(ActionResult::cancelled(format!(
                "Invalid status. Must be one of: {}",
                VALID_STATUSES.join(", ")
            )));
        }
        Ok((order_id, status))
    }
}

#[async_trait::async_trait]
impl MutatingCapability for UpdateOrderStatus {
    fn spec(&self) -> &CapabilitySpec {
        &SPEC
    }

    async fn preview(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let (order_id, new_status) = match Self::parse_params(params) {
            Ok(parsed) => parsed,
            Err(refusal) => return Ok(refusal),
        };

        let Some(order) = self
            .orders
            .fetch_order(&ctx.auth.org_id, order_id)
            .await
            .map_err(storage_error)?
        else {
            return Ok(ActionResult::cancelled(format!("Order #{order_id} not found")));
        };

        if order.status == new_status {
            return Ok(ActionResult::cancelled(format!("Order is already '{}'", order.status)));
        }

        let mut warnings = Vec::new();
        if order.status == "cancelled" {
            warnings.push("Updating a cancelled order".to_owned());
        }
        if order.status == "delivered" && new_status != "cancelled" {
            warnings.push("Order already delivered".to_owned());
        }

        let preview_data = json!({
            "order_id": order_id.to_string(),
            "customer_name": order.customer_name,
            "customer_email": order.customer_email,
            "current_status": order.status,
            "new_status": new_status,
            "total_amount_cents": order.total_amount_cents,
            "warnings": warnings,
        });

        let warning_text = if warnings.is_empty() {
            String::new()
        } else {
            format!("{}\n\n", warnings.join("\n"))
        };
        let mut confirmation = format!(
            "{warning_text}Update order **#{order_id}** for **{}**?\n\n\
             Status change: **{}** → **{new_status}**\nOrder total: {}",
            order.customer_name,
            order.status,
            format_cents(order.total_amount_cents),
        );
        if let Some(notes) = str_param(params, "notes") {
            confirmation.push_str(&format!("\nNotes: {notes}"));
        }

        Ok(ActionResult::pending(preview_data, confirmation))
    }

    async fn confirm(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let (order_id, new_status) = match Self::parse_params(params) {
            Ok(parsed) => parsed,
            Err(refusal) => return Ok(refusal),
        };

        let Some(updated) = self
            .orders
            .update_status(&ctx.auth.org_id, order_id, &new_status)
            .await
            .map_err(storage_error)?
        else {
            return Ok(ActionResult::cancelled(format!("Order #{order_id} not found")));
        };

        Ok(ActionResult::executed(
            format!("Order #{order_id} status updated to '{new_status}'"),
            None,
            Some(json!({
                "order_id": order_id.to_string(),
                "new_status": updated.status,
            })),
        ))
    }
}

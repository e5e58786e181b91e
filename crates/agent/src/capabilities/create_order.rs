use std::sync::Arc;

use serde_json::{json, Value};
use steward_core::{
    ActionParams, ActionResult, CapabilityError, CapabilitySpec, ExecutionContext,
    MutatingCapability, Role,
};
use steward_db::repositories::{
    CatalogRepository, NewOrder, NewOrderItem, OrderRepository, ProductRecord,
};

use super::{format_cents, resolve_product, storage_error, str_param, Resolved};

static SPEC: CapabilitySpec = CapabilitySpec {
    name: "create_order",
    description: "Create a new customer order with products",
    required_roles: &[Role::Admin, Role::Manager],
    required_fields: &["customer_name", "customer_email", "items", "payment_method", "shipping_address"],
    field_descriptions: &[
        ("customer_name", "customer's full name"),
        ("customer_email", "customer's email address"),
        ("items", "products and quantities (e.g., 'Laptop Pro 15 x2, Desk Lamp x1')"),
        ("payment_method", "payment method (cash, card, bank_transfer, upi)"),
        ("shipping_address", "shipping address (street, city, state, zip code)"),
        ("customer_phone", "customer's phone number (optional)"),
        ("notes", "any special instructions (optional)"),
    ],
};

/// Requested line item before product resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RequestedItem {
    product_name: String,
    quantity: i64,
}

/// Accepts `"Widget x2, Gadget"`, a JSON array of such strings, or an
/// array of `{ product_name, quantity }` objects.
fn parse_items(value: &Value) -> Vec<RequestedItem> {
    match value {
        Value::String(text) => text.split(',').filter_map(parse_item_text).collect(),
        Value::Array(entries) => entries
            .iter()
            .filter_map(|entry| match entry {
                Value::String(text) => parse_item_text(text),
                Value::Object(object) => {
                    let name = object
                        .get("product_name")
                        .or_else(|| object.get("name"))
                        .or_else(|| object.get("product"))
                        .and_then(Value::as_str)?;
                    let quantity = object.get("quantity").and_then(Value::as_i64).unwrap_or(1);
                    (quantity > 0).then(|| RequestedItem {
                        product_name: name.trim().to_owned(),
                        quantity,
                    })
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_item_text(text: &str) -> Option<RequestedItem> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some((name, qty)) = text.rsplit_once(" x") {
        if let Ok(quantity) = qty.trim().parse::<i64>() {
            if quantity > 0 && !name.trim().is_empty() {
                return Some(RequestedItem {
                    product_name: name.trim().to_owned(),
                    quantity,
                });
            }
        }
    }
    Some(RequestedItem { product_name: text.to_owned(), quantity: 1 })
}

pub struct CreateOrder {
    catalog: Arc<dyn CatalogRepository>,
    orders: Arc<dyn OrderRepository>,
}

struct ResolvedItem {
    product: ProductRecord,
    quantity: i64,
}

impl CreateOrder {
    pub fn new(catalog: Arc<dyn CatalogRepository>, orders: Arc<dyn OrderRepository>) -> Self {
        Self { catalog, orders }
    }

    async fn resolve_items(
        &self,
        org_id: &str,
        params: &ActionParams,
    ) -> Result<Result<Vec<ResolvedItem>, ActionResult>, CapabilityError> {
        let requested = params.get("items").map(parse_items).unwrap_or_default();
        if requested.is_empty() {
            return Ok(Err(ActionResult::cancelled(
                "No valid items provided. Use format: 'Product Name x2, Another Product x1'",
            )));
        }

        let mut resolved = Vec::with_capacity(requested.len());
        for item in requested {
            match resolve_product(self.catalog.as_ref(), org_id, &item.product_name).await? {
                Resolved::Found(product) => {
                    resolved.push(ResolvedItem { product, quantity: item.quantity });
                }
                Resolved::NotFound(message) => return Ok(Err(ActionResult::cancelled(message))),
            }
        }
        Ok(Ok(resolved))
    }
}

fn total_cents(items: &[ResolvedItem]) -> i64 {
    items.iter().map(|item| item.product.unit_price_cents * item.quantity).sum()
}

#[async_trait::async_trait]
impl MutatingCapability for CreateOrder {
    fn spec(&self) -> &CapabilitySpec {
        &SPEC
    }

    async fn preview(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let items = match self.resolve_items(&ctx.auth.org_id, params).await? {
            Ok(items) => items,
            Err(refusal) => return Ok(refusal),
        };
        let total = total_cents(&items);
        let customer_name = str_param(params, "customer_name").unwrap_or_default();
        let customer_email = str_param(params, "customer_email").unwrap_or_default();

        let item_rows: Vec<Value> = items
            .iter()
            .map(|item| {
                json!({
                    "product_id": item.product.product_id,
                    "product_name": item.product.name,
                    "sku": item.product.sku,
                    "quantity": item.quantity,
                    "unit_price_cents": item.product.unit_price_cents,
                    "item_total_cents": item.product.unit_price_cents * item.quantity,
                })
            })
            .collect();
        let items_summary = items
            .iter()
            .map(|item| {
                format!(
                    "  - {} x{} @ {} = {}",
                    item.product.name,
                    item.quantity,
                    format_cents(item.product.unit_price_cents),
                    format_cents(item.product.unit_price_cents * item.quantity),
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let preview_data = json!({
            "customer_name": customer_name,
            "customer_email": customer_email,
            "items": item_rows,
            "item_count": items.len(),
            "total_units": items.iter().map(|i| i.quantity).sum::<i64>(),
            "total_amount_cents": total,
            "payment_method": str_param(params, "payment_method"),
            "shipping_address": str_param(params, "shipping_address"),
        });

        let mut confirmation = format!(
            "Create order for **{customer_name}** ({customer_email})?\n\n\
             **Order Items:**\n{items_summary}\n\n**Total: {}**",
            format_cents(total),
        );
        if let Some(payment) = str_param(params, "payment_method") {
            confirmation.push_str(&format!("\nPayment: {payment}"));
        }
        if let Some(shipping) = str_param(params, "shipping_address") {
            confirmation.push_str(&format!("\nShipping: {shipping}"));
        }

        Ok(ActionResult::pending(preview_data, confirmation))
    }

    async fn confirm(
        &self,
        ctx: &ExecutionContext,
        params: &ActionParams,
    ) -> Result<ActionResult, CapabilityError> {
        let items = match self.resolve_items(&ctx.auth.org_id, params).await? {
            Ok(items) => items,
            Err(refusal) => return Ok(refusal),
        };
        let total = total_cents(&items);
        let customer_name = str_param(params, "customer_name").unwrap_or_default().to_owned();

        let record = self
            .orders
            .create_order(NewOrder {
                org_id: ctx.auth.org_id.clone(),
                customer_name: customer_name.clone(),
                customer_email: str_param(params, "customer_email").unwrap_or_default().to_owned(),
                customer_phone: str_param(params, "customer_phone").map(str::to_owned),
                shipping_address: str_param(params, "shipping_address").map(str::to_owned),
                payment_method: str_param(params, "payment_method").map(str::to_owned),
                notes: str_param(params, "notes").map(str::to_owned),
                placed_by: ctx.auth.user_id.clone(),
                items: items
                    .iter()
                    .map(|item| NewOrderItem {
                        product_id: item.product.product_id,
                        quantity: item.quantity,
                        unit_price_cents: item.product.unit_price_cents,
                    })
                    .collect(),
            })
            .await
            .map_err(storage_error)?;

        Ok(ActionResult::executed(
            format!(
                "Order #{} created for {customer_name} - {}",
                record.order_id,
                format_cents(total)
            ),
            Some(record.order_id.to_string()),
            Some(json!({
                "order_id": record.order_id.to_string(),
                "customer_name": record.customer_name,
                "customer_email": record.customer_email,
                "total_amount_cents": record.total_amount_cents,
                "item_count": items.len(),
                "status": record.status,
            })),
        ))
    }
}

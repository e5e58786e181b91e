//! Keyword-level action detection and parameter extraction from free
//! text. Deliberately shallow: anything it cannot pull out of the
//! message is simply left absent, and the workflow engine turns absent
//! required fields into a conversational prompt.

use serde_json::{json, Value};
use steward_core::routing::IntentLabel;
use steward_core::ActionParams;

/// A capability invocation the router should run instead of a chat
/// handler, with whatever parameters the message yielded.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionRequest {
    pub capability: &'static str,
    pub intent: IntentLabel,
    pub params: ActionParams,
}

const ORDER_STATUSES: &[&str] = &["processing", "shipped", "delivered", "cancelled", "pending"];

pub fn detect_action(message: &str) -> Option<ActionRequest> {
    // ASCII lowercasing is length-preserving, so byte offsets found in
    // `lower` are valid char boundaries in `message`. Every marker and
    // stop word below is ASCII.
    let lower = message.to_ascii_lowercase();

    // "reorder" before the order checks: the word contains "order".
    if lower.contains("reorder") {
        return Some(ActionRequest {
            capability: "create_reorder_request",
            intent: IntentLabel::Inventory,
            params: reorder_params(message, &lower),
        });
    }

    if lower.contains("order")
        && (lower.contains("status")
            || lower.contains("update order")
            || lower.contains("change order")
            || lower.contains("mark order")
            || lower.starts_with("ship "))
    {
        return Some(ActionRequest {
            capability: "update_order_status",
            intent: IntentLabel::Orders,
            params: order_status_params(&lower),
        });
    }

    if lower.contains("order") && lower.contains("cancel") {
        return Some(ActionRequest {
            capability: "cancel_order",
            intent: IntentLabel::Orders,
            params: cancel_order_params(message, &lower),
        });
    }

    if lower.contains("order")
        && (lower.contains("create") || lower.contains("place") || lower.contains("new order"))
    {
        return Some(ActionRequest {
            capability: "create_order",
            intent: IntentLabel::Orders,
            params: create_order_params(message, &lower),
        });
    }

    // "bank transfer" is a payment method, not a stock movement.
    if lower.contains("transfer")
        && !lower.contains("bank transfer")
        && (lower.contains("stock") || lower.contains("unit") || lower.contains("warehouse"))
    {
        return Some(ActionRequest {
            capability: "transfer_stock",
            intent: IntentLabel::Inventory,
            params: transfer_stock_params(message, &lower),
        });
    }

    if lower.contains("set stock") || lower.contains("update stock") || lower.contains("adjust stock")
    {
        return Some(ActionRequest {
            capability: "update_stock",
            intent: IntentLabel::Inventory,
            params: update_stock_params(message, &lower),
        });
    }

    if lower.contains("stock")
        && (lower.contains("level")
            || lower.contains("how much")
            || lower.starts_with("show")
            || lower.starts_with("list")
            || lower.starts_with("check"))
    {
        return Some(ActionRequest {
            capability: "stock_levels",
            intent: IntentLabel::Inventory,
            params: stock_params(message, &lower),
        });
    }

    None
}

fn insert_str(params: &mut ActionParams, key: &str, value: &str) {
    let value = value.trim().trim_matches(['"', '\'']);
    if !value.is_empty() {
        params.insert(key.to_owned(), Value::String(value.to_owned()));
    }
}

/// Slice of the original-case message after the first `marker` hit in
/// the lowercased copy.
fn after<'a>(message: &'a str, lower: &str, marker: &str) -> Option<&'a str> {
    lower.find(marker).map(|idx| &message[idx + marker.len()..])
}

fn cut_at<'a>(text: &'a str, stops: &[&str]) -> &'a str {
    let lower = text.to_ascii_lowercase();
    let end = stops.iter().filter_map(|stop| lower.find(stop)).min().unwrap_or(text.len());
    text[..end].trim()
}

/// First "<number> units/items/pcs" pair in the message.
fn extract_quantity(lower: &str) -> Option<i64> {
    let words: Vec<&str> = lower.split_whitespace().collect();
    for pair in words.windows(2) {
        if let Ok(quantity) = pair[0].parse::<i64>() {
            let unit = pair[1].trim_matches(|c: char| !c.is_ascii_alphabetic());
            if unit.starts_with("unit") || unit.starts_with("item") || unit.starts_with("pc") {
                return (quantity > 0).then_some(quantity);
            }
        }
    }
    None
}

/// "#42" anywhere, or a bare number right after the word "order".
fn extract_order_id(lower: &str) -> Option<i64> {
    let mut previous = "";
    for token in lower.split_whitespace() {
        let stripped = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '#');
        if let Some(digits) = stripped.strip_prefix('#') {
            if let Ok(id) = digits.parse::<i64>() {
                return Some(id);
            }
        }
        if previous == "order" {
            if let Ok(id) = stripped.parse::<i64>() {
                return Some(id);
            }
        }
        previous = stripped;
    }
    None
}

fn extract_email(message: &str) -> Option<&str> {
    message
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| ",.;()<>".contains(c)))
        .find(|token| token.contains('@') && token.rsplit('@').next().is_some_and(|d| d.contains('.')))
}

fn reorder_params(message: &str, lower: &str) -> ActionParams {
    let mut params = ActionParams::new();

    if let Some(rest) = after(message, lower, " of ") {
        insert_str(&mut params, "product_name", cut_at(rest, &[" to ", " at ", " in ", ","]));
    }
    if let Some(rest) = after(message, lower, "warehouse ") {
        insert_str(&mut params, "warehouse_name", cut_at(rest, &[",", "."]));
    }
    if let Some(quantity) = extract_quantity(lower) {
        params.insert("quantity".to_owned(), json!(quantity));
    }
    if lower.contains("urgent") {
        insert_str(&mut params, "priority", "urgent");
    }
    params
}

fn order_status_params(lower: &str) -> ActionParams {
    let mut params = ActionParams::new();
    if let Some(id) = extract_order_id(lower) {
        params.insert("order_id".to_owned(), json!(id));
    }
    if let Some(status) = ORDER_STATUSES.iter().find(|status| lower.contains(**status)) {
        insert_str(&mut params, "new_status", status);
    }
    params
}

/// First bare number right after `marker`, e.g. "to 100" in
/// "set stock of Desk Lamp to 100".
fn extract_number_after(lower: &str, marker: &str) -> Option<i64> {
    let rest = &lower[lower.find(marker)? + marker.len()..];
    let token = rest.split_whitespace().next()?;
    token.trim_matches(|c: char| !c.is_ascii_digit()).parse().ok().filter(|n| *n >= 0)
}

/// Warehouse phrases arrive as "warehouse East Coast" or plain
/// "East Coast"; the noun is noise either way.
fn strip_warehouse_noun(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed.get(.."warehouse ".len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case("warehouse ") => {
            trimmed["warehouse ".len()..].trim()
        }
        _ => trimmed,
    }
}

fn cancel_order_params(message: &str, lower: &str) -> ActionParams {
    let mut params = ActionParams::new();
    if let Some(id) = extract_order_id(lower) {
        params.insert("order_id".to_owned(), json!(id));
    }
    if let Some(rest) = after(message, lower, "because ") {
        insert_str(&mut params, "reason", cut_at(rest, &["."]));
    }
    params
}

fn update_stock_params(message: &str, lower: &str) -> ActionParams {
    let mut params = ActionParams::new();
    if let Some(rest) = after(message, lower, " of ") {
        insert_str(&mut params, "product_name", cut_at(rest, &[" to ", " in ", " at ", ","]));
    }
    if let Some(rest) = after(message, lower, "warehouse ") {
        insert_str(&mut params, "warehouse_name", cut_at(rest, &[" to ", ",", "."]));
    }
    if let Some(quantity) = extract_number_after(lower, " to ") {
        params.insert("quantity".to_owned(), json!(quantity));
    }
    params
}

fn transfer_stock_params(message: &str, lower: &str) -> ActionParams {
    let mut params = ActionParams::new();
    if let Some(rest) = after(message, lower, " of ") {
        insert_str(&mut params, "product_name", cut_at(rest, &[" from ", " to ", ","]));
    }
    if let Some(quantity) = extract_quantity(lower) {
        params.insert("quantity".to_owned(), json!(quantity));
    }
    if let Some(rest) = after(message, lower, " from ") {
        insert_str(&mut params, "from_warehouse", strip_warehouse_noun(cut_at(rest, &[" to ", ","])));
    }
    if let Some(rest) = after(message, lower, " to ") {
        insert_str(
            &mut params,
            "to_warehouse",
            strip_warehouse_noun(cut_at(rest, &[" from ", ",", "."])),
        );
    }
    params
}

fn create_order_params(message: &str, lower: &str) -> ActionParams {
    let mut params = ActionParams::new();

    if let Some(rest) = after(message, lower, "for ") {
        let name: Vec<&str> = rest
            .split_whitespace()
            .take_while(|word| word.chars().next().is_some_and(char::is_uppercase))
            .collect();
        if !name.is_empty() {
            insert_str(&mut params, "customer_name", &name.join(" ").replace(',', ""));
        }
    }
    if let Some(email) = extract_email(message) {
        insert_str(&mut params, "customer_email", email);
    }
    if let (Some(quantity), Some(rest)) = (extract_quantity(lower), after(message, lower, " of "))
    {
        let product = cut_at(rest, &[",", " for ", " shipping", " payment"]);
        if !product.is_empty() {
            params.insert(
                "items".to_owned(),
                json!([{ "product_name": product, "quantity": quantity }]),
            );
        }
    }
    if let Some(rest) = after(message, lower, "shipping to ") {
        insert_str(&mut params, "shipping_address", cut_at(rest, &[" payment"]));
    }
    for (spoken, canonical) in
        [("bank transfer", "bank_transfer"), ("card", "card"), ("cash", "cash"), ("upi", "upi")]
    {
        if lower.contains(spoken) {
            insert_str(&mut params, "payment_method", canonical);
            break;
        }
    }
    params
}

fn stock_params(message: &str, lower: &str) -> ActionParams {
    let mut params = ActionParams::new();
    if let Some(rest) = after(message, lower, " of ") {
        insert_str(&mut params, "product_name", cut_at(rest, &[" in ", " at ", ","]));
    }
    if let Some(rest) = after(message, lower, "warehouse ") {
        insert_str(&mut params, "warehouse_name", cut_at(rest, &[",", "."]));
    }
    params
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use steward_core::routing::IntentLabel;

    use super::detect_action;

    #[test]
    fn reorder_phrasing_extracts_product_warehouse_and_quantity() {
        let request =
            detect_action("Create a reorder request for 50 units of Laptop Pro 15 to warehouse East Coast")
                .expect("action detected");
        assert_eq!(request.capability, "create_reorder_request");
        assert_eq!(request.intent, IntentLabel::Inventory);
        assert_eq!(request.params["product_name"], "Laptop Pro 15");
        assert_eq!(request.params["warehouse_name"], "East Coast");
        assert_eq!(request.params["quantity"], json!(50));
    }

    #[test]
    fn partial_reorder_phrasing_leaves_fields_absent() {
        let request = detect_action("I need to reorder 20 units of Desk Lamp")
            .expect("action detected");
        assert_eq!(request.params["product_name"], "Desk Lamp");
        assert_eq!(request.params["quantity"], json!(20));
        assert!(!request.params.contains_key("warehouse_name"));
    }

    #[test]
    fn order_status_phrasings_extract_id_and_status() {
        for message in
            ["Update order #12 to shipped", "mark order 12 as shipped", "change order 12 status to shipped"]
        {
            let request = detect_action(message).expect("action detected");
            assert_eq!(request.capability, "update_order_status", "{message}");
            assert_eq!(request.params["order_id"], json!(12), "{message}");
            assert_eq!(request.params["new_status"], "shipped", "{message}");
        }
    }

    #[test]
    fn create_order_phrasing_extracts_customer_and_items() {
        let request = detect_action(
            "Create an order for Dana Smith dana@example.com with 2 units of Laptop Pro 15, payment card",
        )
        .expect("action detected");
        assert_eq!(request.capability, "create_order");
        assert_eq!(request.params["customer_name"], "Dana Smith");
        assert_eq!(request.params["customer_email"], "dana@example.com");
        assert_eq!(request.params["items"][0]["product_name"], "Laptop Pro 15");
        assert_eq!(request.params["items"][0]["quantity"], json!(2));
        assert_eq!(request.params["payment_method"], "card");
    }

    #[test]
    fn stock_listing_phrasing_routes_to_the_read_only_capability() {
        let request = detect_action("show stock levels of Desk Lamp in warehouse East Coast")
            .expect("action detected");
        assert_eq!(request.capability, "stock_levels");
        assert_eq!(request.params["product_name"], "Desk Lamp");
        assert_eq!(request.params["warehouse_name"], "East Coast");
    }

    #[test]
    fn non_ascii_text_extracts_without_panicking() {
        // 'İ' lowercases to two chars; slicing must stay on the
        // boundaries of the original text.
        let request =
            detect_action("reorder 2 units of İİİİİ to İstanbul").expect("action detected");
        assert_eq!(request.capability, "create_reorder_request");
        assert_eq!(request.params["product_name"], "İİİİİ");
        assert_eq!(request.params["quantity"], json!(2));

        let request = detect_action("show stock levels of Çay Bardağı in warehouse İzmir")
            .expect("action detected");
        assert_eq!(request.params["product_name"], "Çay Bardağı");
        assert_eq!(request.params["warehouse_name"], "İzmir");
    }

    #[test]
    fn cancel_phrasing_routes_to_cancel_order_with_reason() {
        let request = detect_action("Cancel order #7 because the customer changed their mind")
            .expect("action detected");
        assert_eq!(request.capability, "cancel_order");
        assert_eq!(request.intent, IntentLabel::Orders);
        assert_eq!(request.params["order_id"], json!(7));
        assert_eq!(request.params["reason"], "the customer changed their mind");

        // Status-update phrasing keeps routing to update_order_status.
        let request = detect_action("change order 7 status to cancelled").expect("action detected");
        assert_eq!(request.capability, "update_order_status");
        assert_eq!(request.params["new_status"], "cancelled");
    }

    #[test]
    fn update_stock_phrasing_extracts_product_warehouse_and_quantity() {
        let request = detect_action("set stock of Desk Lamp to 100 in warehouse East Coast")
            .expect("action detected");
        assert_eq!(request.capability, "update_stock");
        assert_eq!(request.intent, IntentLabel::Inventory);
        assert_eq!(request.params["product_name"], "Desk Lamp");
        assert_eq!(request.params["warehouse_name"], "East Coast");
        assert_eq!(request.params["quantity"], json!(100));
    }

    #[test]
    fn transfer_phrasing_extracts_both_warehouses() {
        let request =
            detect_action("transfer 10 units of Desk Lamp from East Coast to warehouse West Coast")
                .expect("action detected");
        assert_eq!(request.capability, "transfer_stock");
        assert_eq!(request.params["product_name"], "Desk Lamp");
        assert_eq!(request.params["quantity"], json!(10));
        assert_eq!(request.params["from_warehouse"], "East Coast");
        assert_eq!(request.params["to_warehouse"], "West Coast");
    }

    #[test]
    fn bank_transfer_payment_is_not_a_stock_transfer() {
        let request = detect_action(
            "Create an order for Dana Smith with 2 units of Desk Lamp, payment bank transfer",
        )
        .expect("action detected");
        assert_eq!(request.capability, "create_order");
        assert_eq!(request.params["payment_method"], "bank_transfer");
    }

    #[test]
    fn plain_questions_are_not_actions() {
        assert!(detect_action("How's my business doing this month?").is_none());
        assert!(detect_action("hello there").is_none());
        assert!(detect_action("which products sell best?").is_none());
    }
}

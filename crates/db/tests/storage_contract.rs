//! End-to-end checks over one migrated pool: the SQL-backed quota
//! ledger path and the tenant repositories, exercised together the way
//! a live turn uses them.

use std::sync::Arc;

use steward_core::quota::{QuotaError, QuotaLedger, QuotaSettings, QuotaStore, TokenUsage};
use steward_db::repositories::{
    CatalogRepository, NewOrder, NewOrderItem, NewReorderRequest, OrderRepository,
    ReorderRepository, SqlCatalogRepository, SqlOrderRepository, SqlReorderRepository,
};
use steward_db::{connect_with_settings, migrations, DbPool, SqlQuotaStore, SqlUsageEventSink};

async fn migrated_pool() -> DbPool {
    // In-memory SQLite: one connection, otherwise each connection gets
    // its own empty database.
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrate");
    pool
}

fn usage(input: u64, output: u64) -> TokenUsage {
    TokenUsage {
        input_tokens: input,
        output_tokens: output,
        model: "llama-3.1-8b-instant".to_owned(),
        provider: "groq".to_owned(),
    }
}

async fn seed_product(pool: &DbPool, org_id: &str, name: &str, price_cents: i64) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO product (org_id, name, sku, unit_price_cents) VALUES (?, ?, ?, ?) \
         RETURNING product_id",
    )
    .bind(org_id)
    .bind(name)
    .bind(format!("SKU-{name}"))
    .bind(price_cents)
    .fetch_one(pool)
    .await
    .expect("seed product")
}

async fn seed_warehouse(pool: &DbPool, org_id: &str, name: &str) -> i64 {
    sqlx::query_scalar("INSERT INTO warehouse (org_id, name) VALUES (?, ?) RETURNING warehouse_id")
        .bind(org_id)
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("seed warehouse")
}

#[tokio::test]
async fn metering_path_checks_records_and_leaves_an_outbox_row() {
    let pool = migrated_pool().await;
    let store = Arc::new(SqlQuotaStore::new(pool.clone()));
    store.set_limit("org-1", 1_000).await.expect("set limit");
    let sink = Arc::new(SqlUsageEventSink::new(pool.clone()));
    let ledger = QuotaLedger::new(store, sink.clone(), QuotaSettings::default());

    // 950 used, 50 remaining: estimate 100 * 1.1 = 110 is refused,
    // estimate 40 * 1.1 = 44 is admitted.
    ledger.record("org-1", "user-7", &usage(900, 50)).await.expect("record");
    let denied = ledger.check("org-1", 100).await.expect_err("over budget");
    assert!(matches!(denied, QuotaError::Exceeded { remaining: 50, required: 110, .. }));
    ledger.check("org-1", 40).await.expect("within budget");

    let quota = ledger.quota("org-1").await.expect("quota");
    assert_eq!(quota.used, 950);
    assert_eq!(quota.remaining, 50);

    // The event publish runs off the turn path; poll until it lands.
    let mut pending = sink.pending(10).await.expect("pending events");
    for _ in 0..100 {
        if !pending.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        pending = sink.pending(10).await.expect("pending events");
    }
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].total_tokens, 950);
    assert_eq!(pending[0].user_id, "user-7");
}

#[tokio::test]
async fn repositories_cover_a_full_order_and_reorder_cycle() {
    let pool = migrated_pool().await;
    let laptop = seed_product(&pool, "org-1", "Laptop Pro 15", 149_900).await;
    seed_product(&pool, "org-2", "Laptop Pro 15", 999).await;
    let east = seed_warehouse(&pool, "org-1", "East Coast").await;

    let catalog = SqlCatalogRepository::new(pool.clone());
    let found = catalog
        .find_product("org-1", "laptop pro 15")
        .await
        .expect("lookup")
        .expect("case-insensitive match");
    assert_eq!(found.product_id, laptop);
    assert_eq!(found.unit_price_cents, 149_900, "org scoping must hold");

    let orders = SqlOrderRepository::new(pool.clone());
    let order = orders
        .create_order(NewOrder {
            org_id: "org-1".to_owned(),
            customer_name: "Dana Smith".to_owned(),
            customer_email: "dana@example.com".to_owned(),
            customer_phone: None,
            shipping_address: Some("12 Main St".to_owned()),
            payment_method: Some("card".to_owned()),
            notes: None,
            placed_by: "user-7".to_owned(),
            items: vec![NewOrderItem { product_id: laptop, quantity: 2, unit_price_cents: 149_900 }],
        })
        .await
        .expect("create order");
    assert_eq!(order.total_amount_cents, 299_800);
    assert_eq!(order.status, "pending");

    let updated = orders
        .update_status("org-1", order.order_id, "shipped")
        .await
        .expect("update")
        .expect("order exists");
    assert_eq!(updated.status, "shipped");
    assert!(
        orders.update_status("org-2", order.order_id, "cancelled").await.expect("query").is_none(),
        "another org must not reach the order"
    );

    let reorders = SqlReorderRepository::new(pool.clone());
    let reorder_id = reorders
        .create_reorder(NewReorderRequest {
            org_id: "org-1".to_owned(),
            product_id: laptop,
            warehouse_id: east,
            quantity: 25,
            priority: "urgent".to_owned(),
            notes: None,
            requested_by: "user-7".to_owned(),
        })
        .await
        .expect("create reorder");
    assert!(reorder_id > 0);

    let status: String =
        sqlx::query_scalar("SELECT status FROM reorder_request WHERE reorder_request_id = ?")
            .bind(reorder_id)
            .fetch_one(&pool)
            .await
            .expect("reorder row");
    assert_eq!(status, "pending");
}

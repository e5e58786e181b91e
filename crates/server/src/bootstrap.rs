use std::sync::Arc;

use anyhow::Context;
use steward_agent::capabilities::{
    CancelOrder, CapabilityRegistry, CreateOrder, CreateReorderRequest, StockLevels,
    TransferStock, UpdateOrderStatus, UpdateStock,
};
use steward_agent::{HttpLlmClient, InMemorySessionMemory, IntentClassifier, MeteredLlm, TurnRouter};
use steward_core::config::AppConfig;
use steward_core::quota::{QuotaLedger, QuotaSettings};
use steward_core::Capability;
use steward_db::repositories::{SqlCatalogRepository, SqlOrderRepository, SqlReorderRepository};
use steward_db::{connect_with_settings, DbPool, SqlQuotaStore, SqlUsageEventSink};
use tracing::info;

/// Everything the HTTP surface needs, fully wired. Construction is
/// explicit so the dependency graph is readable in one place.
pub struct App {
    pub router: Arc<TurnRouter>,
    pub ledger: Arc<QuotaLedger>,
    pub usage_outbox: SqlUsageEventSink,
    pub pool: DbPool,
}

pub async fn build(config: &AppConfig) -> anyhow::Result<App> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .with_context(|| format!("could not open database at `{}`", config.database.url))?;
    steward_db::migrations::run_pending(&pool).await.context("could not apply migrations")?;

    let usage_outbox = SqlUsageEventSink::new(pool.clone());
    let ledger = Arc::new(QuotaLedger::new(
        Arc::new(SqlQuotaStore::new(pool.clone())),
        Arc::new(usage_outbox.clone()),
        QuotaSettings {
            default_org_limit: config.quota.default_org_token_limit,
            reserve_buffer: config.quota.reserve_buffer,
        },
    ));

    let catalog = Arc::new(SqlCatalogRepository::new(pool.clone()));
    let orders = Arc::new(SqlOrderRepository::new(pool.clone()));
    let reorders = Arc::new(SqlReorderRepository::new(pool.clone()));

    let mut registry = CapabilityRegistry::new();
    registry.register(Capability::Mutating(Box::new(CreateReorderRequest::new(
        catalog.clone(),
        reorders,
    ))));
    registry.register(Capability::Mutating(Box::new(UpdateOrderStatus::new(orders.clone()))));
    registry.register(Capability::Mutating(Box::new(CreateOrder::new(
        catalog.clone(),
        orders.clone(),
    ))));
    registry.register(Capability::Mutating(Box::new(CancelOrder::new(orders))));
    registry.register(Capability::Mutating(Box::new(UpdateStock::new(
        catalog.clone(),
        catalog.clone(),
    ))));
    registry.register(Capability::Mutating(Box::new(TransferStock::new(
        catalog.clone(),
        catalog.clone(),
    ))));
    registry.register(Capability::ReadOnly(Box::new(StockLevels::new(catalog))));

    let client = Arc::new(
        HttpLlmClient::from_config(&config.llm)
            .map_err(|error| anyhow::anyhow!("could not build llm client: {error}"))?,
    );
    let router = TurnRouter::new(
        MeteredLlm::new(client, ledger.clone()),
        IntentClassifier::new(config.llm.routing_model.clone()),
        ledger.clone(),
        Arc::new(registry),
        Arc::new(InMemorySessionMemory::default()),
        config.llm.model.clone(),
    );

    info!(
        event_name = "bootstrap.ready",
        provider = %config.llm.provider,
        model = %config.llm.model,
        routing_model = %config.llm.routing_model,
        "application wired"
    );
    Ok(App { router: Arc::new(router), ledger, usage_outbox, pool })
}

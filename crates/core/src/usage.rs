use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Billing/observability record published after every metered inference
/// call. Consumed by a downstream drain; delivery is best-effort and
/// never blocks the turn that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub org_id: String,
    pub user_id: String,
    pub model: String,
    pub provider: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("usage event publish failed: {0}")]
pub struct PublishError(pub String);

#[async_trait::async_trait]
pub trait UsageEventSink: Send + Sync {
    async fn publish(&self, event: UsageEvent) -> Result<(), PublishError>;
}

/// Collects events in memory. Used in tests and as the sink of last
/// resort when no durable outbox is configured.
#[derive(Clone, Default)]
pub struct InMemoryUsageEventSink {
    events: Arc<Mutex<Vec<UsageEvent>>>,
}

impl InMemoryUsageEventSink {
    pub fn events(&self) -> Vec<UsageEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait::async_trait]
impl UsageEventSink for InMemoryUsageEventSink {
    async fn publish(&self, event: UsageEvent) -> Result<(), PublishError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        Ok(())
    }
}

/// Sink that refuses every publish. Tests use it to prove the success
/// path of usage recording survives a dead queue.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingUsageEventSink;

#[async_trait::async_trait]
impl UsageEventSink for FailingUsageEventSink {
    async fn publish(&self, _event: UsageEvent) -> Result<(), PublishError> {
        Err(PublishError("outbound queue unavailable".to_owned()))
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::usage::{UsageEvent, UsageEventSink};

/// Organization token quota status as exposed to operators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenQuota {
    pub org_id: String,
    pub used: u64,
    pub limit: u64,
    pub remaining: u64,
    pub percentage_used: f64,
}

/// Consumption of a single metered inference call, as reported by the
/// provider after the call returns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
    pub provider: String,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum QuotaError {
    #[error("token quota exceeded: used {used}/{limit}, remaining {remaining}, required {required}")]
    Exceeded { used: u64, limit: u64, remaining: u64, required: u64 },
    #[error("quota store failure: {0}")]
    Store(String),
}

/// Durable per-organization counter. `increment` must be atomic — many
/// sessions of the same org record usage concurrently and no update may
/// be lost. Reads never block other readers.
#[async_trait::async_trait]
pub trait QuotaStore: Send + Sync {
    async fn fetch(&self, org_id: &str) -> Result<(u64, Option<u64>), QuotaError>;
    async fn increment(&self, org_id: &str, amount: u64) -> Result<u64, QuotaError>;
    async fn set_limit(&self, org_id: &str, limit: u64) -> Result<(), QuotaError>;
    async fn reset_usage(&self, org_id: &str) -> Result<(), QuotaError>;
}

#[derive(Clone, Debug, Default)]
struct OrgCounter {
    used: u64,
    limit: Option<u64>,
}

/// Mutex-backed counter map. The lock makes increments race-free; the
/// SQL store achieves the same with a single-statement upsert.
#[derive(Clone, Default)]
pub struct InMemoryQuotaStore {
    counters: Arc<Mutex<HashMap<String, OrgCounter>>>,
}

impl InMemoryQuotaStore {
    fn with_counters<T>(&self, f: impl FnOnce(&mut HashMap<String, OrgCounter>) -> T) -> T {
        match self.counters.lock() {
            Ok(mut counters) => f(&mut counters),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait::async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn fetch(&self, org_id: &str) -> Result<(u64, Option<u64>), QuotaError> {
        Ok(self.with_counters(|counters| {
            counters.get(org_id).map(|c| (c.used, c.limit)).unwrap_or((0, None))
        }))
    }

    async fn increment(&self, org_id: &str, amount: u64) -> Result<u64, QuotaError> {
        Ok(self.with_counters(|counters| {
            let counter = counters.entry(org_id.to_owned()).or_default();
            counter.used = counter.used.saturating_add(amount);
            counter.used
        }))
    }

    async fn set_limit(&self, org_id: &str, limit: u64) -> Result<(), QuotaError> {
        self.with_counters(|counters| {
            counters.entry(org_id.to_owned()).or_default().limit = Some(limit);
        });
        Ok(())
    }

    async fn reset_usage(&self, org_id: &str) -> Result<(), QuotaError> {
        self.with_counters(|counters| {
            counters.entry(org_id.to_owned()).or_default().used = 0;
        });
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct QuotaSettings {
    pub default_org_limit: u64,
    /// Safety margin applied to pre-flight estimates. The true cost of
    /// an inference call is only known after it returns, so admission
    /// control reserves estimate * (1 + buffer).
    pub reserve_buffer: f64,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self { default_org_limit: 1_000_000, reserve_buffer: 0.1 }
    }
}

/// Approximate cost per 1M tokens by provider and model.
const COST_TABLE: &[(&str, &str, f64, f64)] = &[
    ("groq", "llama-3.3-70b-versatile", 0.59, 0.79),
    ("groq", "llama-3.1-8b-instant", 0.05, 0.08),
    ("groq", "mixtral-8x7b-32768", 0.24, 0.24),
    ("openrouter", "anthropic/claude-3-5-sonnet", 3.0, 15.0),
    ("openrouter", "openai/gpt-4o", 2.5, 10.0),
    ("openrouter", "google/gemini-pro-1.5", 1.25, 5.0),
];

pub fn estimate_cost(usage: &TokenUsage) -> f64 {
    let (input_rate, output_rate) = COST_TABLE
        .iter()
        .find(|(provider, model, _, _)| *provider == usage.provider && *model == usage.model)
        .map(|(_, _, input, output)| (*input, *output))
        .unwrap_or((1.0, 1.0));

    let input_cost = usage.input_tokens as f64 / 1_000_000.0 * input_rate;
    let output_cost = usage.output_tokens as f64 / 1_000_000.0 * output_rate;
    let cost = input_cost + output_cost;
    (cost * 1_000_000.0).round() / 1_000_000.0
}

/// Organization-level token accounting with hard limits.
///
/// Admission control and accounting are separate calls: `check` runs
/// before the metered call with an estimate, `record` runs after it
/// with the provider-reported true consumption.
pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
    sink: Arc<dyn UsageEventSink>,
    settings: QuotaSettings,
}

impl QuotaLedger {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        sink: Arc<dyn UsageEventSink>,
        settings: QuotaSettings,
    ) -> Self {
        Self { store, sink, settings }
    }

    pub async fn quota(&self, org_id: &str) -> Result<TokenQuota, QuotaError> {
        let (used, limit) = self.store.fetch(org_id).await?;
        let limit = limit.unwrap_or(self.settings.default_org_limit);
        let remaining = limit.saturating_sub(used);
        let percentage = if limit > 0 { used as f64 / limit as f64 * 100.0 } else { 100.0 };

        Ok(TokenQuota {
            org_id: org_id.to_owned(),
            used,
            limit,
            remaining,
            percentage_used: (percentage * 100.0).round() / 100.0,
        })
    }

    /// Pre-flight admission check. Must complete before the metered
    /// call is issued; failing aborts the whole turn.
    pub async fn check(&self, org_id: &str, estimated_tokens: u64) -> Result<(), QuotaError> {
        let quota = self.quota(org_id).await?;
        let required =
            (estimated_tokens as f64 * (1.0 + self.settings.reserve_buffer)).ceil() as u64;

        if required > quota.remaining {
            warn!(
                event_name = "quota.check_exceeded",
                org_id,
                remaining = quota.remaining,
                required,
                "token quota exceeded"
            );
            return Err(QuotaError::Exceeded {
                used: quota.used,
                limit: quota.limit,
                remaining: quota.remaining,
                required,
            });
        }
        Ok(())
    }

    /// Record true consumption after a metered call returns. Always
    /// called, even when downstream handler logic later fails — the
    /// resource was genuinely consumed. Returns the post-increment
    /// total.
    ///
    /// The counter increment is awaited; the usage event publish is
    /// best-effort and runs off the turn path.
    pub async fn record(
        &self,
        org_id: &str,
        user_id: &str,
        usage: &TokenUsage,
    ) -> Result<u64, QuotaError> {
        let total_tokens = usage.total();
        let new_total = self.store.increment(org_id, total_tokens).await?;

        info!(
            event_name = "quota.usage_recorded",
            org_id,
            tokens = total_tokens,
            total = new_total,
            model = %usage.model,
            "token usage recorded"
        );

        let event = UsageEvent {
            org_id: org_id.to_owned(),
            user_id: user_id.to_owned(),
            model: usage.model.clone(),
            provider: usage.provider.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens,
            estimated_cost: estimate_cost(usage),
            timestamp: Utc::now(),
        };
        let sink = Arc::clone(&self.sink);
        let org = org_id.to_owned();
        tokio::spawn(async move {
            if let Err(error) = sink.publish(event).await {
                warn!(
                    event_name = "quota.usage_event_dropped",
                    org_id = %org,
                    error = %error,
                    "usage event publish failed, continuing"
                );
            }
        });

        Ok(new_total)
    }

    pub async fn set_limit(&self, org_id: &str, limit: u64) -> Result<(), QuotaError> {
        self.store.set_limit(org_id, limit).await
    }

    pub async fn reset_usage(&self, org_id: &str) -> Result<(), QuotaError> {
        self.store.reset_usage(org_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::usage::{FailingUsageEventSink, InMemoryUsageEventSink};

    use super::{estimate_cost, InMemoryQuotaStore, QuotaError, QuotaLedger, QuotaSettings, QuotaStore, TokenUsage};

    fn ledger_with(store: Arc<InMemoryQuotaStore>) -> QuotaLedger {
        QuotaLedger::new(store, Arc::new(InMemoryUsageEventSink::default()), QuotaSettings::default())
    }

    fn usage(input: u64, output: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            model: "llama-3.1-8b-instant".to_owned(),
            provider: "groq".to_owned(),
        }
    }

    #[tokio::test]
    async fn quota_read_is_idempotent() {
        let store = Arc::new(InMemoryQuotaStore::default());
        store.increment("org-1", 300).await.expect("increment");
        let ledger = ledger_with(store);

        let first = ledger.quota("org-1").await.expect("first read");
        let second = ledger.quota("org-1").await.expect("second read");
        assert_eq!(first, second);
        assert_eq!(first.used, 300);
        assert_eq!(first.remaining, 1_000_000 - 300);
    }

    #[tokio::test]
    async fn check_applies_reserve_buffer_at_boundary() {
        let store = Arc::new(InMemoryQuotaStore::default());
        store.set_limit("org-1", 1_000).await.expect("set limit");
        store.increment("org-1", 950).await.expect("seed usage");
        let ledger = ledger_with(store);

        // 100 * 1.1 = 110 > 50 remaining
        let denied = ledger.check("org-1", 100).await.expect_err("must exceed");
        assert!(matches!(denied, QuotaError::Exceeded { remaining: 50, required: 110, .. }));

        // 40 * 1.1 = 44 <= 50 remaining
        ledger.check("org-1", 40).await.expect("must fit");
    }

    #[tokio::test]
    async fn check_succeeds_exactly_at_buffer_adjusted_threshold() {
        let store = Arc::new(InMemoryQuotaStore::default());
        store.set_limit("org-1", 1_000).await.expect("set limit");
        store.increment("org-1", 890).await.expect("seed usage");
        let ledger = ledger_with(store);

        // 100 * 1.1 = 110 == remaining
        ledger.check("org-1", 100).await.expect("exact threshold is admitted");
    }

    #[tokio::test]
    async fn concurrent_record_calls_lose_no_updates() {
        let store = Arc::new(InMemoryQuotaStore::default());
        let ledger = Arc::new(ledger_with(store));

        let mut handles = Vec::new();
        for i in 0..50u64 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.record("org-1", "user-1", &usage(i + 1, i + 1)).await.expect("record")
            }));
        }
        for handle in handles {
            handle.await.expect("task join");
        }

        // sum of 2*(1..=50) = 2 * 1275
        let quota = ledger.quota("org-1").await.expect("quota");
        assert_eq!(quota.used, 2 * 1275);
    }

    #[tokio::test]
    async fn record_survives_dead_event_sink() {
        let store = Arc::new(InMemoryQuotaStore::default());
        let ledger = QuotaLedger::new(
            store,
            Arc::new(FailingUsageEventSink),
            QuotaSettings::default(),
        );

        let new_total = ledger.record("org-1", "user-1", &usage(60, 40)).await.expect("record ok");
        assert_eq!(new_total, 100);
    }

    #[tokio::test]
    async fn record_emits_usage_event_with_cost() {
        let store = Arc::new(InMemoryQuotaStore::default());
        let sink = InMemoryUsageEventSink::default();
        let ledger = QuotaLedger::new(store, Arc::new(sink.clone()), QuotaSettings::default());

        ledger.record("org-1", "user-7", &usage(1_000_000, 0)).await.expect("record");

        // The publish runs on a spawned task; poll until it lands.
        let mut events = sink.events();
        for _ in 0..100 {
            if !events.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            events = sink.events();
        }
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "user-7");
        assert_eq!(events[0].total_tokens, 1_000_000);
        assert!((events[0].estimated_cost - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reset_and_set_limit_adjust_quota() {
        let store = Arc::new(InMemoryQuotaStore::default());
        let ledger = ledger_with(store);

        ledger.record("org-1", "user-1", &usage(500, 500)).await.expect("record");
        ledger.set_limit("org-1", 2_000).await.expect("set limit");

        let quota = ledger.quota("org-1").await.expect("quota");
        assert_eq!(quota.limit, 2_000);
        assert_eq!(quota.remaining, 1_000);
        assert!((quota.percentage_used - 50.0).abs() < f64::EPSILON);

        ledger.reset_usage("org-1").await.expect("reset");
        let quota = ledger.quota("org-1").await.expect("quota after reset");
        assert_eq!(quota.used, 0);
    }

    #[test]
    fn unknown_model_uses_default_rates() {
        let cost = estimate_cost(&TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            model: "mystery".to_owned(),
            provider: "unknown".to_owned(),
        });
        assert!((cost - 2.0).abs() < 1e-9);
    }
}

use chrono::{DateTime, Utc};
use sqlx::Row;
use steward_core::usage::{PublishError, UsageEvent, UsageEventSink};
use tracing::info;
use uuid::Uuid;

use crate::DbPool;

/// Durable usage-event sink backed by the `usage_event_outbox` table.
/// A downstream drain marks rows with `drained_at` once forwarded to
/// the billing pipeline.
#[derive(Clone)]
pub struct SqlUsageEventSink {
    pool: DbPool,
}

impl SqlUsageEventSink {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Events not yet picked up by the drain, oldest first.
    pub async fn pending(&self, limit: u32) -> Result<Vec<UsageEvent>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT org_id, user_id, model, provider, input_tokens, output_tokens, \
                    total_tokens, estimated_cost, occurred_at \
             FROM usage_event_outbox \
             WHERE drained_at IS NULL \
             ORDER BY occurred_at ASC, rowid ASC \
             LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let occurred_at: String = row.get("occurred_at");
                let timestamp = occurred_at
                    .parse::<DateTime<Utc>>()
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                Ok(UsageEvent {
                    org_id: row.get("org_id"),
                    user_id: row.get("user_id"),
                    model: row.get("model"),
                    provider: row.get("provider"),
                    input_tokens: row.get::<i64, _>("input_tokens").max(0) as u64,
                    output_tokens: row.get::<i64, _>("output_tokens").max(0) as u64,
                    total_tokens: row.get::<i64, _>("total_tokens").max(0) as u64,
                    estimated_cost: row.get("estimated_cost"),
                    timestamp,
                })
            })
            .collect()
    }

    /// One pass of the outbox drain: forwards pending events to the
    /// log and marks them drained. Returns the number forwarded.
    pub async fn drain_once(&self, limit: u32) -> Result<u64, sqlx::Error> {
        let events = self.pending(limit).await?;
        let Some(last) = events.last() else {
            return Ok(0);
        };
        let cutoff = last.timestamp;

        for event in &events {
            info!(
                event_name = "usage.exported",
                org_id = %event.org_id,
                user_id = %event.user_id,
                model = %event.model,
                total_tokens = event.total_tokens,
                estimated_cost = event.estimated_cost,
                "usage event exported"
            );
        }
        self.mark_drained(cutoff).await?;
        Ok(events.len() as u64)
    }

    pub async fn mark_drained(&self, before: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE usage_event_outbox SET drained_at = datetime('now') \
             WHERE drained_at IS NULL AND occurred_at <= ?",
        )
        .bind(before.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl UsageEventSink for SqlUsageEventSink {
    async fn publish(&self, event: UsageEvent) -> Result<(), PublishError> {
        sqlx::query(
            "INSERT INTO usage_event_outbox \
                 (event_id, org_id, user_id, model, provider, input_tokens, output_tokens, \
                  total_tokens, estimated_cost, occurred_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&event.org_id)
        .bind(&event.user_id)
        .bind(&event.model)
        .bind(&event.provider)
        .bind(event.input_tokens as i64)
        .bind(event.output_tokens as i64)
        .bind(event.total_tokens as i64)
        .bind(event.estimated_cost)
        .bind(event.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PublishError(e.to_string()))?;
        Ok(())
    }
}

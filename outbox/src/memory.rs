//! In-memory outbox store for tests and local development.
//!
//! Implements the same lease-based claiming contract as the Postgres
//! store, so dispatcher behavior (at-least-once, backoff, exhaustion) can
//! be exercised without a database.

use crate::store::{OutboxError, OutboxEvent, OutboxStore};
use chrono::{DateTime, Utc};
use lattice_core::event::EventEnvelope;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-memory [`OutboxStore`].
pub struct InMemoryOutboxStore {
    rows: Mutex<Vec<OutboxEvent>>,
    claim_lease: Duration,
}

impl Default for InMemoryOutboxStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOutboxStore {
    /// Create an empty store with a 60-second claim lease.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            claim_lease: Duration::from_secs(60),
        }
    }

    /// Override the claim lease.
    #[must_use]
    pub const fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Snapshot of all rows, for assertions.
    pub async fn rows(&self) -> Vec<OutboxEvent> {
        self.rows.lock().await.clone()
    }

    /// Number of undelivered rows.
    pub async fn pending_count(&self) -> usize {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|r| !r.is_processed())
            .count()
    }
}

impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(
        &self,
        envelope: &EventEnvelope,
        aggregate_id: Uuid,
    ) -> Result<Uuid, OutboxError> {
        let row = OutboxEvent::stage(envelope, aggregate_id, Utc::now())?;
        let id = row.id;
        self.rows.lock().await.push(row);
        Ok(id)
    }

    async fn claim_due(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let lease_until = now
            + chrono::Duration::from_std(self.claim_lease)
                .map_err(|e| OutboxError::Storage(e.to_string()))?;

        let mut rows = self.rows.lock().await;
        let mut claimed = Vec::new();

        for row in rows.iter_mut() {
            if claimed.len() >= batch_size {
                break;
            }
            let due = !row.is_processed()
                && row.can_retry()
                && row.next_retry_at.is_none_or(|at| at <= now);
            if due {
                row.next_retry_at = Some(lease_until);
                claimed.push(row.clone());
            }
        }

        Ok(claimed)
    }

    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), OutboxError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        row.processed_at = Some(now);
        row.error_message = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        row.retry_count += 1;
        row.error_message = Some(error.to_string());
        row.next_retry_at = Some(next_retry_at);
        Ok(())
    }

    async fn exhausted_count(&self) -> Result<u64, OutboxError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|r| !r.is_processed() && !r.can_retry())
            .count() as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use lattice_core::event::IntegrationEvent;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct PaymentCaptured {
        payment_id: Uuid,
    }

    impl IntegrationEvent for PaymentCaptured {
        const EVENT_TYPE: &'static str = "PaymentCaptured";
        const SOURCE_SERVICE: &'static str = "PaymentService";
    }

    fn envelope() -> EventEnvelope {
        EventEnvelope::encode(&PaymentCaptured {
            payment_id: Uuid::new_v4(),
        })
        .expect("encode should succeed")
    }

    #[tokio::test]
    async fn claim_applies_lease() {
        let store = InMemoryOutboxStore::new();
        store
            .enqueue(&envelope(), Uuid::new_v4())
            .await
            .expect("enqueue should succeed");

        let now = Utc::now();
        let first = store.claim_due(10, now).await.expect("claim should succeed");
        assert_eq!(first.len(), 1);

        // Same instant: the lease hides the row from a second claimer.
        let second = store.claim_due(10, now).await.expect("claim should succeed");
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn processed_rows_are_not_reclaimed() {
        let store = InMemoryOutboxStore::new();
        let id = store
            .enqueue(&envelope(), Uuid::new_v4())
            .await
            .expect("enqueue should succeed");

        let now = Utc::now();
        store
            .mark_processed(id, now)
            .await
            .expect("mark should succeed");

        let claimed = store
            .claim_due(10, now + chrono::Duration::hours(1))
            .await
            .expect("claim should succeed");
        assert!(claimed.is_empty());
        assert_eq!(store.pending_count().await, 0);
    }

    #[tokio::test]
    async fn exhausted_rows_stay_visible() {
        let store = InMemoryOutboxStore::new();
        let id = store
            .enqueue(&envelope(), Uuid::new_v4())
            .await
            .expect("enqueue should succeed");

        let now = Utc::now();
        for attempt in 0..OutboxEvent::DEFAULT_MAX_RETRIES {
            store
                .mark_failed(id, &format!("attempt {attempt}"), now)
                .await
                .expect("mark_failed should succeed");
        }

        assert_eq!(store.exhausted_count().await.expect("count"), 1);
        let claimed = store
            .claim_due(10, now + chrono::Duration::hours(1))
            .await
            .expect("claim should succeed");
        assert!(claimed.is_empty(), "exhausted rows are never redispatched");
    }

    #[tokio::test]
    async fn mark_unknown_row_is_not_found() {
        let store = InMemoryOutboxStore::new();
        assert!(matches!(
            store.mark_processed(Uuid::new_v4(), Utc::now()).await,
            Err(OutboxError::NotFound(_))
        ));
    }
}

//! Outbox row model and store abstraction.
//!
//! An outbox row is the durable link between a business state change and
//! the event announcing it: the row is written in the same transaction as
//! the state change, then relayed asynchronously by the
//! [`OutboxDispatcher`](crate::dispatcher::OutboxDispatcher).
//!
//! Row lifecycle:
//!
//! ```text
//! staged (processed_at = NULL)
//!   │  claimed by a dispatcher replica (lease on next_retry_at)
//!   ▼
//! publish attempt ──ok──► processed_at stamped
//!   │
//!   └─err──► retry_count += 1, error_message recorded,
//!            next_retry_at = now + backoff(retry_count)
//!            ...until retry_count reaches max_retry_count:
//!            the row stays visible for operators, never deleted.
//! ```

use chrono::{DateTime, Utc};
use lattice_core::event::{EventEnvelope, EventError};
use thiserror::Error;
use uuid::Uuid;

/// Errors from outbox store operations.
#[derive(Error, Debug, Clone)]
pub enum OutboxError {
    /// Underlying storage failure.
    #[error("Outbox storage error: {0}")]
    Storage(String),

    /// A stored payload could not be parsed back into an envelope.
    #[error("Corrupt outbox payload for row {id}: {reason}")]
    CorruptPayload {
        /// The affected row.
        id: Uuid,
        /// Parse failure detail.
        reason: String,
    },

    /// The referenced row does not exist.
    #[error("Outbox row not found: {0}")]
    NotFound(Uuid),
}

/// A pending or delivered outbox row.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    /// Row id.
    pub id: Uuid,
    /// Event-type name of the serialized envelope (routing key).
    pub event_type: String,
    /// The business aggregate this event originated from.
    pub aggregate_id: Uuid,
    /// The serialized envelope, exactly as it will go on the wire.
    pub payload: serde_json::Value,
    /// When the row was staged.
    pub created_at: DateTime<Utc>,
    /// When the event was delivered; `None` means undelivered.
    pub processed_at: Option<DateTime<Utc>>,
    /// Delivery attempts that have failed so far.
    pub retry_count: i32,
    /// Attempts allowed before the row is left for manual inspection.
    pub max_retry_count: i32,
    /// Earliest time of the next delivery attempt (also the claim lease).
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Last delivery error.
    pub error_message: Option<String>,
}

impl OutboxEvent {
    /// Default number of delivery attempts before a row is abandoned to
    /// operators.
    pub const DEFAULT_MAX_RETRIES: i32 = 5;

    /// Build a fresh row from an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the envelope cannot be
    /// serialized, which only happens for non-object payloads.
    pub fn stage(
        envelope: &EventEnvelope,
        aggregate_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Self, OutboxError> {
        let payload =
            serde_json::to_value(envelope).map_err(|e| OutboxError::Storage(e.to_string()))?;

        Ok(Self {
            id: Uuid::new_v4(),
            event_type: envelope.event_type.clone(),
            aggregate_id,
            payload,
            created_at: now,
            processed_at: None,
            retry_count: 0,
            max_retry_count: Self::DEFAULT_MAX_RETRIES,
            next_retry_at: None,
            error_message: None,
        })
    }

    /// Whether the event has been delivered.
    #[must_use]
    pub const fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Whether another delivery attempt is allowed.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.retry_count < self.max_retry_count
    }

    /// Parse the stored payload back into a wire envelope.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::CorruptPayload`] if the stored JSON no longer
    /// parses as an envelope.
    pub fn envelope(&self) -> Result<EventEnvelope, OutboxError> {
        serde_json::from_value(self.payload.clone()).map_err(|e: serde_json::Error| {
            OutboxError::CorruptPayload {
                id: self.id,
                reason: e.to_string(),
            }
        })
    }
}

impl From<EventError> for OutboxError {
    fn from(err: EventError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Store abstraction for the dispatcher side of the outbox.
///
/// Staging inside a business transaction is store-specific (the Postgres
/// store exposes an inherent
/// [`stage_in`](crate::postgres::PostgresOutboxStore::stage_in) taking the
/// caller's transaction); this trait covers the operations the background
/// dispatcher and orchestrators need.
///
/// Claiming must be safe under concurrent dispatcher replicas: a row
/// returned by `claim_due` on one replica must not be returned to another
/// until its lease expires.
pub trait OutboxStore: Send + Sync + 'static {
    /// Append a row outside any business transaction.
    ///
    /// Used by orchestration code whose state store already persisted
    /// atomically, and by tests.
    fn enqueue(
        &self,
        envelope: &EventEnvelope,
        aggregate_id: Uuid,
    ) -> impl Future<Output = Result<Uuid, OutboxError>> + Send;

    /// Claim up to `batch_size` due rows for delivery.
    ///
    /// A due row is unprocessed, still retryable, and not under another
    /// replica's lease (`next_retry_at IS NULL OR next_retry_at <= now`).
    /// Claiming extends the lease so no other replica dispatches the same
    /// row concurrently.
    fn claim_due(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<OutboxEvent>, OutboxError>> + Send;

    /// Stamp a row as delivered.
    fn mark_processed(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), OutboxError>> + Send;

    /// Record a failed delivery attempt and schedule the next one.
    fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), OutboxError>> + Send;

    /// Rows that exhausted their retries and await manual intervention.
    fn exhausted_count(&self) -> impl Future<Output = Result<u64, OutboxError>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use lattice_core::event::IntegrationEvent;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct ContentPublished {
        content_id: Uuid,
    }

    impl IntegrationEvent for ContentPublished {
        const EVENT_TYPE: &'static str = "ContentPublished";
        const SOURCE_SERVICE: &'static str = "ContentService";
    }

    #[test]
    fn staged_row_roundtrips_envelope() {
        let envelope = EventEnvelope::encode(&ContentPublished {
            content_id: Uuid::new_v4(),
        })
        .expect("encode should succeed");

        let row = OutboxEvent::stage(&envelope, Uuid::new_v4(), Utc::now())
            .expect("stage should succeed");

        assert_eq!(row.event_type, "ContentPublished");
        assert!(!row.is_processed());
        assert!(row.can_retry());

        let restored = row.envelope().expect("payload should parse");
        assert_eq!(restored.id, envelope.id);
        assert_eq!(restored.event_type, envelope.event_type);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let envelope = EventEnvelope::encode(&ContentPublished {
            content_id: Uuid::new_v4(),
        })
        .expect("encode should succeed");

        let mut row = OutboxEvent::stage(&envelope, Uuid::new_v4(), Utc::now())
            .expect("stage should succeed");

        row.retry_count = row.max_retry_count;
        assert!(!row.can_retry());
    }

    #[test]
    fn corrupt_payload_is_reported() {
        let envelope = EventEnvelope::encode(&ContentPublished {
            content_id: Uuid::new_v4(),
        })
        .expect("encode should succeed");

        let mut row = OutboxEvent::stage(&envelope, Uuid::new_v4(), Utc::now())
            .expect("stage should succeed");
        row.payload = serde_json::json!("not an envelope");

        assert!(matches!(
            row.envelope(),
            Err(OutboxError::CorruptPayload { .. })
        ));
    }
}

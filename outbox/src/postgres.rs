//! `PostgreSQL`-backed outbox store.
//!
//! Staging happens inside the caller's transaction via
//! [`PostgresOutboxStore::stage_in`] — committing that transaction is the
//! only sanctioned way to "publish" from transactional business code.
//! The background dispatcher then claims rows with a single
//! `FOR UPDATE SKIP LOCKED` statement that doubles as a lease: claiming
//! bumps `next_retry_at`, so a replica that claims a row hides it from
//! every other replica until the lease expires or the row is finalized.
//! No database transaction stays open across a broker publish.

use crate::store::{OutboxError, OutboxEvent, OutboxStore};
use chrono::{DateTime, Utc};
use lattice_core::event::EventEnvelope;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use uuid::Uuid;

/// Outbox store on the service's `PostgreSQL` pool.
///
/// # Example
///
/// ```no_run
/// use lattice_outbox::PostgresOutboxStore;
/// use lattice_core::event::EventEnvelope;
/// # use uuid::Uuid;
///
/// # async fn example(
/// #     pool: sqlx::PgPool,
/// #     envelope: EventEnvelope,
/// #     aggregate_id: Uuid,
/// # ) -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresOutboxStore::new(pool.clone());
/// store.ensure_schema().await?;
///
/// // Business mutation and outbox row commit atomically.
/// let mut tx = pool.begin().await?;
/// sqlx::query("UPDATE user_profiles SET status = $1 WHERE id = $2")
///     .bind("Active")
///     .bind(aggregate_id)
///     .execute(&mut *tx)
///     .await?;
/// PostgresOutboxStore::stage_in(&mut tx, &envelope, aggregate_id).await?;
/// tx.commit().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
    claim_lease: Duration,
}

impl PostgresOutboxStore {
    /// Create a store with the default 60-second claim lease.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claim_lease: Duration::from_secs(60),
        }
    }

    /// Override how long a claimed row stays hidden from other replicas.
    ///
    /// The lease must comfortably exceed one publish attempt including its
    /// retries, otherwise a slow publish can be double-dispatched.
    #[must_use]
    pub const fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Create the outbox table and its dispatch index if missing.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if DDL execution fails.
    pub async fn ensure_schema(&self) -> Result<(), OutboxError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS outbox_events (
                id UUID PRIMARY KEY,
                event_type TEXT NOT NULL,
                aggregate_id UUID NOT NULL,
                payload JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                processed_at TIMESTAMPTZ,
                retry_count INT NOT NULL DEFAULT 0,
                max_retry_count INT NOT NULL,
                next_retry_at TIMESTAMPTZ,
                error_message TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Storage(e.to_string()))?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS outbox_events_pending_idx
            ON outbox_events (created_at)
            WHERE processed_at IS NULL
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Stage an outbox row inside the caller's active transaction.
    ///
    /// The row commits or rolls back together with the business mutation,
    /// so a rolled-back change leaves no orphaned event behind.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the insert fails.
    pub async fn stage_in(
        tx: &mut Transaction<'_, Postgres>,
        envelope: &EventEnvelope,
        aggregate_id: Uuid,
    ) -> Result<Uuid, OutboxError> {
        let row = OutboxEvent::stage(envelope, aggregate_id, Utc::now())?;
        Self::insert_row(&mut **tx, &row).await?;

        tracing::debug!(
            outbox_id = %row.id,
            event_type = %row.event_type,
            aggregate_id = %aggregate_id,
            "Outbox row staged in transaction"
        );

        Ok(row.id)
    }

    async fn insert_row<'e, E>(executor: E, row: &OutboxEvent) -> Result<(), OutboxError>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r"
            INSERT INTO outbox_events (
                id, event_type, aggregate_id, payload, created_at,
                processed_at, retry_count, max_retry_count, next_retry_at, error_message
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(row.id)
        .bind(&row.event_type)
        .bind(row.aggregate_id)
        .bind(&row.payload)
        .bind(row.created_at)
        .bind(row.processed_at)
        .bind(row.retry_count)
        .bind(row.max_retry_count)
        .bind(row.next_retry_at)
        .bind(&row.error_message)
        .execute(executor)
        .await
        .map_err(|e| OutboxError::Storage(e.to_string()))?;

        Ok(())
    }

    fn row_to_event(row: &PgRow) -> OutboxEvent {
        OutboxEvent {
            id: row.get("id"),
            event_type: row.get("event_type"),
            aggregate_id: row.get("aggregate_id"),
            payload: row.get("payload"),
            created_at: row.get("created_at"),
            processed_at: row.get("processed_at"),
            retry_count: row.get("retry_count"),
            max_retry_count: row.get("max_retry_count"),
            next_retry_at: row.get("next_retry_at"),
            error_message: row.get("error_message"),
        }
    }
}

impl OutboxStore for PostgresOutboxStore {
    async fn enqueue(
        &self,
        envelope: &EventEnvelope,
        aggregate_id: Uuid,
    ) -> Result<Uuid, OutboxError> {
        let row = OutboxEvent::stage(envelope, aggregate_id, Utc::now())?;
        Self::insert_row(&self.pool, &row).await?;

        tracing::debug!(
            outbox_id = %row.id,
            event_type = %row.event_type,
            "Outbox row enqueued"
        );

        Ok(row.id)
    }

    async fn claim_due(
        &self,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let lease_until = now
            + chrono::Duration::from_std(self.claim_lease)
                .map_err(|e| OutboxError::Storage(e.to_string()))?;

        #[allow(clippy::cast_possible_wrap)] // batch sizes are small
        let rows = sqlx::query(
            r"
            WITH due AS (
                SELECT id FROM outbox_events
                WHERE processed_at IS NULL
                  AND retry_count < max_retry_count
                  AND (next_retry_at IS NULL OR next_retry_at <= $1)
                ORDER BY created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE outbox_events o
            SET next_retry_at = $3
            FROM due
            WHERE o.id = due.id
            RETURNING o.id, o.event_type, o.aggregate_id, o.payload, o.created_at,
                      o.processed_at, o.retry_count, o.max_retry_count,
                      o.next_retry_at, o.error_message
            ",
        )
        .bind(now)
        .bind(batch_size as i64)
        .bind(lease_until)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OutboxError::Storage(e.to_string()))?;

        Ok(rows.iter().map(Self::row_to_event).collect())
    }

    async fn mark_processed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r"
            UPDATE outbox_events
            SET processed_at = $2, error_message = NULL
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }

        metrics::counter!("lattice.outbox.delivered").increment(1);
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r"
            UPDATE outbox_events
            SET retry_count = retry_count + 1,
                error_message = $2,
                next_retry_at = $3
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(error)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(|e| OutboxError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }

        metrics::counter!("lattice.outbox.delivery_failed").increment(1);
        Ok(())
    }

    async fn exhausted_count(&self) -> Result<u64, OutboxError> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM outbox_events
            WHERE processed_at IS NULL
              AND retry_count >= max_retry_count
            ",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| OutboxError::Storage(e.to_string()))?;

        #[allow(clippy::cast_sign_loss)] // COUNT(*) is non-negative
        Ok(count as u64)
    }
}

//! Saga persistence abstraction.
//!
//! [`SagaStore::persist`] writes the state row *and* stages the decision's
//! follow-up commands as outbox rows in one atomic unit, so a transition
//! and the commands it announces can never be observed apart. Commands
//! then reach the bus through the ordinary outbox dispatcher, inheriting
//! its retry discipline — including compensating commands.

use chrono::{DateTime, Utc};
use lattice_core::event::{EventEnvelope, EventError};
use lattice_outbox::{InMemoryOutboxStore, OutboxError, OutboxStore};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Errors from saga orchestration and persistence.
#[derive(Error, Debug, Clone)]
pub enum SagaError {
    /// Underlying storage failure.
    #[error("Saga storage error: {0}")]
    Storage(String),

    /// A command could not be encoded into an envelope.
    #[error("Saga command encoding failed: {0}")]
    Encoding(#[from] EventError),

    /// A stored row could not be mapped back into its state type.
    #[error("Corrupt saga row {correlation_id}: {reason}")]
    CorruptRow {
        /// The affected instance.
        correlation_id: Uuid,
        /// Mapping failure detail.
        reason: String,
    },
}

impl From<OutboxError> for SagaError {
    fn from(err: OutboxError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Minimal surface the orchestration layer needs from a persisted saga row.
pub trait SagaRow: Clone + Send + Sync + 'static {
    /// The workflow correlation id, the row's primary key.
    fn correlation_id(&self) -> Uuid;

    /// Whether the row is in a terminal state and ignores further events.
    fn is_terminal(&self) -> bool;

    /// The armed timeout, if any: `(token_id, due_at)`.
    fn timeout_token(&self) -> Option<(Uuid, DateTime<Utc>)>;
}

/// Persistence for one workflow's saga rows.
pub trait SagaStore<S: SagaRow>: Send + Sync + 'static {
    /// Load the row for a correlation id.
    fn load(
        &self,
        correlation_id: Uuid,
    ) -> impl Future<Output = Result<Option<S>, SagaError>> + Send;

    /// Atomically upsert the row and stage the follow-up commands.
    fn persist(
        &self,
        state: &S,
        commands: &[EventEnvelope],
    ) -> impl Future<Output = Result<(), SagaError>> + Send;

    /// Non-terminal rows whose armed timeout is due.
    fn due_timeouts(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<S>, SagaError>> + Send;
}

/// In-memory saga store for tests and local development.
///
/// Commands are staged into the shared [`InMemoryOutboxStore`], mirroring
/// the Postgres store's row-plus-outbox atomicity.
pub struct InMemorySagaStore<S: SagaRow> {
    rows: Mutex<HashMap<Uuid, S>>,
    outbox: Arc<InMemoryOutboxStore>,
}

impl<S: SagaRow> InMemorySagaStore<S> {
    /// Create a store staging commands into the given outbox.
    #[must_use]
    pub fn new(outbox: Arc<InMemoryOutboxStore>) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            outbox,
        }
    }

    /// The outbox commands are staged into.
    #[must_use]
    pub fn outbox(&self) -> Arc<InMemoryOutboxStore> {
        Arc::clone(&self.outbox)
    }

    /// Number of saga rows held.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    /// Whether the store holds no rows.
    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

impl<S: SagaRow> SagaStore<S> for InMemorySagaStore<S> {
    async fn load(&self, correlation_id: Uuid) -> Result<Option<S>, SagaError> {
        Ok(self.rows.lock().await.get(&correlation_id).cloned())
    }

    async fn persist(&self, state: &S, commands: &[EventEnvelope]) -> Result<(), SagaError> {
        let mut rows = self.rows.lock().await;
        for command in commands {
            self.outbox.enqueue(command, state.correlation_id()).await?;
        }
        rows.insert(state.correlation_id(), state.clone());
        Ok(())
    }

    async fn due_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<S>, SagaError> {
        let rows = self.rows.lock().await;
        Ok(rows
            .values()
            .filter(|row| {
                !row.is_terminal()
                    && row.timeout_token().is_some_and(|(_, due_at)| due_at <= now)
            })
            .cloned()
            .collect())
    }
}

//! Workflow-agnostic saga orchestration.
//!
//! A [`Workflow`] is a pure, enum-keyed transition function:
//! `(current row, incoming event, now) → Decision`. The
//! [`SagaOrchestrator`] wraps it with the load/decide/persist cycle and
//! the two idempotency rules every workflow shares:
//!
//! - a row in a terminal state ignores all further events for its
//!   correlation id, and
//! - an ignored event is a logged no-op acknowledgment, never an error —
//!   duplicates and reordering are expected under at-least-once delivery.
//!
//! Follow-up commands from a decision are persisted with the row in one
//! atomic unit (see [`SagaStore::persist`]) and relayed through the
//! outbox, so a transition and its announced commands never diverge.

use crate::store::{SagaError, SagaRow, SagaStore};
use chrono::{DateTime, Utc};
use lattice_core::environment::Clock;
use lattice_core::event::EventEnvelope;
use std::sync::Arc;
use uuid::Uuid;

/// Result of applying one event to a workflow instance.
pub enum Decision<S> {
    /// Move to `state` and announce `commands`.
    Transition {
        /// The new row, including re-armed or disarmed timeout fields.
        state: S,
        /// Commands staged through the outbox with the row.
        commands: Vec<EventEnvelope>,
    },
    /// The event does not apply; acknowledge and drop it.
    Ignore {
        /// Why the event was ignored, for the log line.
        reason: &'static str,
    },
}

/// A saga as a pure transition function over its persisted state.
pub trait Workflow: Send + Sync + 'static {
    /// The workflow's event alphabet.
    type Event: Send + 'static;
    /// The persisted row type.
    type State: SagaRow;

    /// Workflow name for logs and metrics.
    const NAME: &'static str;

    /// The correlation id carried by an event.
    fn correlation_id(event: &Self::Event) -> Uuid;

    /// Event name for logs.
    fn event_name(event: &Self::Event) -> &'static str;

    /// Build the timeout event the sweeper redelivers for a due instance.
    fn timeout_event(correlation_id: Uuid, timeout_token_id: Uuid) -> Self::Event;

    /// Decide the transition for an event.
    ///
    /// `state` is `None` when no row exists for the correlation id yet.
    /// The orchestrator has already filtered events for terminal rows.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Encoding`] if a follow-up command cannot be
    /// encoded.
    fn decide(
        &self,
        state: Option<&Self::State>,
        event: Self::Event,
        now: DateTime<Utc>,
    ) -> Result<Decision<Self::State>, SagaError>;
}

/// Drives a [`Workflow`] against its [`SagaStore`].
pub struct SagaOrchestrator<W, S>
where
    W: Workflow,
    S: SagaStore<W::State>,
{
    workflow: W,
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<W, S> SagaOrchestrator<W, S>
where
    W: Workflow,
    S: SagaStore<W::State>,
{
    /// Create an orchestrator.
    #[must_use]
    pub fn new(workflow: W, store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            workflow,
            store,
            clock,
        }
    }

    /// The store this orchestrator persists through.
    #[must_use]
    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    /// Apply one event to its workflow instance.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError`] on storage or command-encoding failures.
    /// Events that do not apply (duplicates, reordering, terminal rows,
    /// stale timeouts) are logged and acknowledged as `Ok`.
    pub async fn handle(&self, event: W::Event) -> Result<(), SagaError> {
        let correlation_id = W::correlation_id(&event);
        let event_name = W::event_name(&event);
        let existing = self.store.load(correlation_id).await?;

        if existing.as_ref().is_some_and(SagaRow::is_terminal) {
            tracing::info!(
                workflow = W::NAME,
                %correlation_id,
                event = event_name,
                "Saga is terminal, ignoring event"
            );
            return Ok(());
        }

        let now = self.clock.now();
        match self.workflow.decide(existing.as_ref(), event, now)? {
            Decision::Transition { state, commands } => {
                tracing::info!(
                    workflow = W::NAME,
                    %correlation_id,
                    event = event_name,
                    commands = commands.len(),
                    terminal = state.is_terminal(),
                    "Saga transition"
                );
                self.store.persist(&state, &commands).await?;
                metrics::counter!("lattice.saga.transitions", "workflow" => W::NAME).increment(1);
                if state.is_terminal() {
                    metrics::counter!("lattice.saga.finished", "workflow" => W::NAME).increment(1);
                }
                Ok(())
            },
            Decision::Ignore { reason } => {
                tracing::warn!(
                    workflow = W::NAME,
                    %correlation_id,
                    event = event_name,
                    reason,
                    "Saga event ignored"
                );
                metrics::counter!("lattice.saga.ignored", "workflow" => W::NAME).increment(1);
                Ok(())
            },
        }
    }
}

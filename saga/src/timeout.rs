//! Durable timeout sweeper.
//!
//! Saga timeouts are not in-process timers: arming a timeout stamps a
//! token and a due time on the durable saga row, and this sweeper
//! periodically redelivers a timeout event for every non-terminal row
//! whose deadline passed. Instances therefore survive process restarts
//! mid-wait, and no thread is suspended while a saga spends minutes in a
//! waiting state.
//!
//! Cancellation is token-based: the event that advances a saga re-arms a
//! fresh token, so a timeout firing that lost the race carries a stale
//! token and the transition function ignores it.

use crate::orchestrator::{SagaOrchestrator, Workflow};
use crate::store::{SagaError, SagaRow, SagaStore};
use lattice_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodic scanner feeding due timeouts back through the orchestrator.
pub struct TimeoutSweeper<W, S>
where
    W: Workflow,
    S: SagaStore<W::State>,
{
    orchestrator: Arc<SagaOrchestrator<W, S>>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
}

impl<W, S> TimeoutSweeper<W, S>
where
    W: Workflow,
    S: SagaStore<W::State>,
{
    /// Create a sweeper with the default 30-second sweep interval.
    #[must_use]
    pub fn new(orchestrator: Arc<SagaOrchestrator<W, S>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            orchestrator,
            clock,
            sweep_interval: Duration::from_secs(30),
        }
    }

    /// Override the sweep interval.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Fire timeout events for every due instance.
    ///
    /// Returns how many timeouts fired. A failure on one instance is
    /// logged and does not block the rest of the sweep.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError`] only if the due-timeout scan itself fails.
    pub async fn run_once(&self) -> Result<usize, SagaError> {
        let now = self.clock.now();
        let due = self.orchestrator.store().due_timeouts(now).await?;
        let mut fired = 0usize;

        for row in due {
            let Some((token_id, due_at)) = row.timeout_token() else {
                continue;
            };

            tracing::info!(
                workflow = W::NAME,
                correlation_id = %row.correlation_id(),
                %due_at,
                "Saga timeout due, redelivering"
            );

            let event = W::timeout_event(row.correlation_id(), token_id);
            match self.orchestrator.handle(event).await {
                Ok(()) => fired += 1,
                Err(err) => {
                    tracing::error!(
                        workflow = W::NAME,
                        correlation_id = %row.correlation_id(),
                        error = %err,
                        "Timeout redelivery failed, will retry next sweep"
                    );
                },
            }
        }

        if fired > 0 {
            metrics::counter!("lattice.saga.timeouts_fired", "workflow" => W::NAME)
                .increment(fired as u64);
        }

        Ok(fired)
    }

    /// Spawn the periodic sweep loop.
    #[must_use]
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let sweep_interval = self.sweep_interval;

        let task = tokio::spawn(async move {
            tracing::info!(
                workflow = W::NAME,
                sweep_interval_secs = sweep_interval.as_secs(),
                "Timeout sweeper started"
            );

            loop {
                if let Err(err) = self.run_once().await {
                    tracing::error!(
                        workflow = W::NAME,
                        error = %err,
                        "Timeout sweep failed"
                    );
                }

                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!(workflow = W::NAME, "Timeout sweeper stopped");
                        break;
                    },
                    () = tokio::time::sleep(sweep_interval) => {},
                }
            }
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle controlling a running sweeper loop.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the loop to stop and wait for the current sweep to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "Timeout sweeper did not shut down cleanly");
        }
    }
}

//! Background relay from the outbox table to the event bus.
//!
//! One dispatcher runs inside each service process. Every poll it claims a
//! batch of due rows, attempts to publish each through the
//! [`EventBus`], and finalizes the row: `processed_at` on success,
//! incremented `retry_count` + exponential `next_retry_at` on failure.
//! Rows that exhaust their retry budget are left in place and surface
//! through a gauge and a warning — never deleted automatically.
//!
//! Multiple replicas may run dispatchers concurrently; the store's
//! lease-based claiming guarantees a row is never dispatched twice at the
//! same time.

use crate::store::{OutboxError, OutboxStore};
use lattice_core::backoff::BackoffPolicy;
use lattice_core::environment::Clock;
use lattice_core::event_bus::EventBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Pause between polls when the previous pass found work or none.
    pub poll_interval: Duration,
    /// Maximum rows claimed per pass.
    pub batch_size: usize,
    /// Redelivery backoff applied per row on failure.
    pub backoff: BackoffPolicy,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            batch_size: 50,
            backoff: BackoffPolicy::default()
                .with_initial_delay(Duration::from_secs(60))
                .with_max_delay(Duration::from_secs(3600)),
        }
    }
}

/// Result of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Rows claimed this pass.
    pub claimed: usize,
    /// Rows delivered and stamped.
    pub delivered: usize,
    /// Rows whose publish failed and were rescheduled.
    pub failed: usize,
}

/// Background relay between an [`OutboxStore`] and the [`EventBus`].
pub struct OutboxDispatcher<S: OutboxStore> {
    store: Arc<S>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    config: OutboxConfig,
}

impl<S: OutboxStore> OutboxDispatcher<S> {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            bus,
            clock,
            config,
        }
    }

    /// Run a single claim-publish-finalize pass.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError`] only when the store itself fails; individual
    /// publish failures are absorbed into the rows' retry bookkeeping.
    pub async fn run_once(&self) -> Result<DispatchStats, OutboxError> {
        let now = self.clock.now();
        let batch = self.store.claim_due(self.config.batch_size, now).await?;

        let mut stats = DispatchStats {
            claimed: batch.len(),
            ..DispatchStats::default()
        };

        if batch.is_empty() {
            return Ok(stats);
        }

        tracing::info!(count = batch.len(), "Dispatching outbox batch");

        for row in batch {
            let envelope = match row.envelope() {
                Ok(envelope) => envelope,
                Err(err) => {
                    // A row that no longer parses burns its retries like
                    // any failing row, then stays visible for operators.
                    stats.failed += 1;
                    self.reschedule(row.id, row.retry_count, &err.to_string())
                        .await?;
                    continue;
                },
            };

            match self.bus.publish(&envelope).await {
                Ok(()) => {
                    self.store.mark_processed(row.id, self.clock.now()).await?;
                    stats.delivered += 1;
                    tracing::debug!(
                        outbox_id = %row.id,
                        event_type = %row.event_type,
                        "Outbox row delivered"
                    );
                },
                Err(err) => {
                    stats.failed += 1;
                    tracing::warn!(
                        outbox_id = %row.id,
                        event_type = %row.event_type,
                        retry_count = row.retry_count,
                        error = %err,
                        "Outbox delivery failed, rescheduling"
                    );
                    self.reschedule(row.id, row.retry_count, &err.to_string())
                        .await?;
                },
            }
        }

        let exhausted = self.store.exhausted_count().await?;
        #[allow(clippy::cast_precision_loss)] // gauge precision is adequate
        metrics::gauge!("lattice.outbox.exhausted").set(exhausted as f64);
        if exhausted > 0 {
            tracing::warn!(
                exhausted,
                "Outbox rows exhausted their retries and need manual intervention"
            );
        }

        Ok(stats)
    }

    async fn reschedule(
        &self,
        id: uuid::Uuid,
        retry_count: i32,
        error: &str,
    ) -> Result<(), OutboxError> {
        #[allow(clippy::cast_sign_loss)] // retry_count is never negative
        let delay = self.config.backoff.delay_for_attempt(retry_count as u32);
        let next_retry_at = self.clock.now()
            + chrono::Duration::from_std(delay)
                .map_err(|e| OutboxError::Storage(e.to_string()))?;
        self.store.mark_failed(id, error, next_retry_at).await
    }

    /// Spawn the periodic dispatch loop.
    ///
    /// Runs one pass immediately, then every `poll_interval` until the
    /// returned handle is stopped. Store errors are logged and the loop
    /// keeps going — a broken pass must not kill the relay.
    #[must_use]
    pub fn spawn(self) -> DispatcherHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let poll_interval = self.config.poll_interval;

        let task = tokio::spawn(async move {
            tracing::info!(
                poll_interval_secs = poll_interval.as_secs(),
                "Outbox dispatcher started"
            );

            loop {
                match self.run_once().await {
                    Ok(stats) if stats.claimed > 0 => {
                        tracing::info!(
                            claimed = stats.claimed,
                            delivered = stats.delivered,
                            failed = stats.failed,
                            "Outbox pass completed"
                        );
                    },
                    Ok(_) => {},
                    Err(err) => {
                        tracing::error!(error = %err, "Outbox pass failed");
                    },
                }

                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Outbox dispatcher stopped");
                        break;
                    },
                    () = tokio::time::sleep(poll_interval) => {},
                }
            }
        });

        DispatcherHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle controlling a running dispatcher loop.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    /// Signal the loop to stop and wait for the current pass to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "Outbox dispatcher did not shut down cleanly");
        }
    }
}

//! Periodic sweep of stale refresh tokens.
//!
//! Cache entries have no automatic expiry for live sessions, so tokens
//! that expired without an explicit logout are cleared by this background
//! task instead.

use crate::store::UserStateCache;
use lattice_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Background task clearing expired refresh tokens.
pub struct TokenSweeper<C: UserStateCache> {
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    sweep_interval: Duration,
}

impl<C: UserStateCache> TokenSweeper<C> {
    /// Create a sweeper with the default 15-minute interval.
    #[must_use]
    pub fn new(cache: Arc<C>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache,
            clock,
            sweep_interval: Duration::from_secs(15 * 60),
        }
    }

    /// Override the sweep interval.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Spawn the periodic sweep loop.
    #[must_use]
    pub fn spawn(self) -> TokenSweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let sweep_interval = self.sweep_interval;

        let task = tokio::spawn(async move {
            tracing::info!(
                sweep_interval_secs = sweep_interval.as_secs(),
                "Token sweeper started"
            );

            loop {
                match self.cache.cleanup_expired_tokens(self.clock.now()).await {
                    Ok(swept) if swept > 0 => {
                        metrics::counter!("lattice.cache.tokens_swept").increment(swept as u64);
                    },
                    Ok(_) => {},
                    Err(err) => {
                        tracing::error!(error = %err, "Token sweep failed");
                    },
                }

                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Token sweeper stopped");
                        break;
                    },
                    () = tokio::time::sleep(sweep_interval) => {},
                }
            }
        });

        TokenSweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle controlling a running token sweeper.
pub struct TokenSweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TokenSweeperHandle {
    /// Signal the loop to stop and wait for the current sweep to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "Token sweeper did not shut down cleanly");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::memory::InMemoryUserStateCache;
    use crate::state::{UserState, UserStatus};
    use lattice_testing::test_clock;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    #[tokio::test]
    async fn spawned_sweeper_clears_expired_tokens() {
        let cache = Arc::new(InMemoryUserStateCache::new());
        let clock = Arc::new(test_clock());
        let now = clock.now();

        let user_id = Uuid::new_v4();
        cache
            .set_user_state(&UserState {
                user_id,
                user_profile_id: None,
                email: "a@b.com".to_string(),
                roles: BTreeSet::from(["User".to_string()]),
                status: UserStatus::Active,
                refresh_token: Some("tok".to_string()),
                refresh_token_expires_at: Some(now - chrono::Duration::minutes(1)),
                last_login_at: Some(now),
                subscription: None,
                cache_updated_at: now,
            })
            .await
            .unwrap();

        let sweeper = TokenSweeper::new(Arc::clone(&cache), clock)
            .with_sweep_interval(Duration::from_millis(10));
        let handle = sweeper.spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        let entry = cache.get_user_state(user_id).await.unwrap().unwrap();
        assert!(entry.refresh_token.is_none());
    }
}

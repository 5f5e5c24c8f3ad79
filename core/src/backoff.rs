//! Exponential backoff shared by publish retry and the outbox dispatcher.
//!
//! Two consumers, one policy type: the broker wraps each publish attempt in
//! [`retry`] for transient transport errors, and the outbox dispatcher uses
//! [`BackoffPolicy::delay_for_attempt`] to compute `next_retry_at` when a
//! relay attempt fails.
//!
//! # Example
//!
//! ```
//! use lattice_core::backoff::{BackoffPolicy, retry};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), &'static str> {
//! let policy = BackoffPolicy::default()
//!     .with_max_retries(5)
//!     .with_initial_delay(Duration::from_millis(100));
//!
//! let value = retry(&policy, |_err: &&str| true, || async {
//!     Ok::<_, &str>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use tokio::time::sleep;

/// Exponential backoff configuration.
///
/// Delay for attempt `n` is `initial_delay * multiplier^n`, capped at
/// `max_delay`. Attempt numbering starts at zero (the delay before the
/// first retry).
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap applied to the computed delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Set the maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to wait before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let delay_ms =
            (self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32)) as u64;

        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Whether another retry is allowed after `attempt` retries so far.
    #[must_use]
    pub const fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Retry an async operation with exponential backoff.
///
/// `is_transient` decides whether an error is worth retrying; a
/// non-transient error is returned immediately. Every retry is logged with
/// the attempt number and computed delay.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-transient error.
pub async fn retry<F, Fut, T, E, P>(
    policy: &BackoffPolicy,
    is_transient: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            },
            Err(err) => {
                if !is_transient(&err) {
                    tracing::warn!(error = %err, "Error is not transient, failing immediately");
                    return Err(err);
                }

                if !policy.allows_retry(attempt) {
                    tracing::error!(attempt, error = %err, "Retries exhausted");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

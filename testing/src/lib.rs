//! # Lattice Testing
//!
//! Testing utilities and mocks for the Lattice coordination substrate:
//!
//! - Deterministic clocks ([`FixedClock`], [`MutableClock`])
//! - An in-memory [`EventBus`](lattice_core::event_bus::EventBus) that
//!   records published envelopes and can be scripted to fail, for
//!   at-least-once delivery tests
//!
//! ## Example
//!
//! ```
//! use lattice_testing::{InMemoryEventBus, test_clock};
//! use lattice_core::environment::Clock;
//!
//! let clock = test_clock();
//! assert_eq!(clock.now(), clock.now());
//!
//! let bus = InMemoryEventBus::new();
//! bus.fail_next_publishes(2); // first two publishes error
//! ```

use chrono::{DateTime, Utc};
use lattice_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use lattice_core::event::EventEnvelope;
    use lattice_core::event_bus::{EventBus, EventBusError};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, RwLock};

    /// Fixed clock for deterministic tests.
    ///
    /// Always returns the same time, making tests reproducible.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that tests can advance manually.
    ///
    /// Useful for exercising backoff schedules and saga timeouts without
    /// sleeping.
    #[derive(Debug, Default)]
    pub struct MutableClock {
        time: RwLock<DateTime<Utc>>,
    }

    impl MutableClock {
        /// Create a clock starting at the given time.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: RwLock::new(time),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut guard) = self.time.write() {
                *guard += by;
            }
        }

        /// Set the clock to an absolute time.
        pub fn set(&self, time: DateTime<Utc>) {
            if let Ok(mut guard) = self.time.write() {
                *guard = time;
            }
        }
    }

    impl Clock for MutableClock {
        fn now(&self) -> DateTime<Utc> {
            self.time.read().map(|guard| *guard).unwrap_or_else(|_| Utc::now())
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC).
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which never
    /// happens in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// In-memory event bus recording every published envelope.
    ///
    /// Publishes succeed synchronously unless failures are scripted with
    /// [`fail_next_publishes`](Self::fail_next_publishes), which makes the
    /// next N publishes return a transient transport error — the shape
    /// needed to assert at-least-once redelivery.
    #[derive(Default)]
    pub struct InMemoryEventBus {
        published: Mutex<Vec<EventEnvelope>>,
        failures_remaining: AtomicUsize,
    }

    impl InMemoryEventBus {
        /// Create an empty bus.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `count` publishes fail with a transport error.
        pub fn fail_next_publishes(&self, count: usize) {
            self.failures_remaining.store(count, Ordering::SeqCst);
        }

        /// Snapshot of everything published so far, in publish order.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned, which only happens if
        /// a previous test thread panicked mid-publish.
        #[must_use]
        #[allow(clippy::expect_used)]
        pub fn published(&self) -> Vec<EventEnvelope> {
            self.published
                .lock()
                .expect("publish log lock should not be poisoned")
                .clone()
        }

        /// Published envelopes of one event type.
        #[must_use]
        pub fn published_of_type(&self, event_type: &str) -> Vec<EventEnvelope> {
            self.published()
                .into_iter()
                .filter(|e| e.event_type == event_type)
                .collect()
        }

        /// Drop everything recorded so far.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned.
        #[allow(clippy::expect_used)]
        pub fn clear(&self) {
            self.published
                .lock()
                .expect("publish log lock should not be poisoned")
                .clear();
        }
    }

    impl EventBus for InMemoryEventBus {
        fn publish(
            &self,
            envelope: &EventEnvelope,
        ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
            let envelope = envelope.clone();

            Box::pin(async move {
                let scripted_failure = self
                    .failures_remaining
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();

                if scripted_failure {
                    return Err(EventBusError::TransportError(
                        "scripted broker outage".to_string(),
                    ));
                }

                if let Ok(mut published) = self.published.lock() {
                    published.push(envelope);
                }
                Ok(())
            })
        }
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, InMemoryEventBus, MutableClock, test_clock};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use lattice_core::event::{EventEnvelope, IntegrationEvent};
    use lattice_core::event_bus::{EventBus, EventBusError};
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Probe {
        seq: u32,
    }

    impl IntegrationEvent for Probe {
        const EVENT_TYPE: &'static str = "Probe";
        const SOURCE_SERVICE: &'static str = "TestService";
    }

    #[test]
    fn fixed_clock_is_frozen() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn mutable_clock_advances() {
        let clock = MutableClock::new(test_clock().now());
        let before = clock.now();
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), before + chrono::Duration::minutes(5));
    }

    #[tokio::test]
    async fn bus_records_in_order() {
        let bus = InMemoryEventBus::new();
        for seq in 0..3 {
            let envelope = EventEnvelope::encode(&Probe { seq }).unwrap();
            bus.publish(&envelope).await.unwrap();
        }

        let published = bus.published_of_type("Probe");
        assert_eq!(published.len(), 3);
    }

    #[tokio::test]
    async fn scripted_failures_then_success() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(2);

        let envelope = EventEnvelope::encode(&Probe { seq: 0 }).unwrap();
        assert!(matches!(
            bus.publish(&envelope).await,
            Err(EventBusError::TransportError(_))
        ));
        assert!(bus.publish(&envelope).await.is_err());
        assert!(bus.publish(&envelope).await.is_ok());
        assert_eq!(bus.published().len(), 1);
    }
}

//! # Lattice Core
//!
//! Core traits and types for the Lattice coordination substrate.
//!
//! Lattice lets independently deployed services complete cross-service
//! business workflows — registration, admin user creation, subscription
//! activation — as all-or-nothing sequences coordinated purely through
//! asynchronous messages. This crate holds the pieces every other crate in
//! the workspace builds on:
//!
//! - [`event`]: the [`IntegrationEvent`](event::IntegrationEvent) trait and
//!   the JSON [`EventEnvelope`](event::EventEnvelope) wire format
//! - [`event_bus`]: the [`EventBus`](event_bus::EventBus) publish seam and
//!   error taxonomy
//! - [`registry`]: the compile-time
//!   [`HandlerRegistry`](registry::HandlerRegistry) mapping event-type
//!   names to typed handlers
//! - [`backoff`]: the exponential
//!   [`BackoffPolicy`](backoff::BackoffPolicy) shared by publish retry and
//!   outbox redelivery
//! - [`environment`]: the [`Clock`](environment::Clock) dependency trait
//!
//! ## Delivery model
//!
//! The substrate targets at-least-once delivery with idempotent consumers:
//! the envelope id is the idempotency key, sagas additionally key on their
//! business correlation id, and terminal saga states ignore all further
//! events.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;

pub mod backoff;
pub mod event;
pub mod event_bus;
pub mod registry;

/// Dependency-injection traits shared across the workspace.
///
/// External effects are abstracted behind traits so orchestration logic
/// stays deterministic under test.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait — abstracts time for testability.
    ///
    /// Production code injects [`SystemClock`]; tests inject a fixed clock
    /// so timeout and milestone timestamps are deterministic.
    pub trait Clock: Send + Sync {
        /// Get the current time.
        fn now(&self) -> DateTime<Utc>;
    }

    /// System clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

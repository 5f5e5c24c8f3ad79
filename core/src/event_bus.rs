//! Event bus abstraction for cross-service communication.
//!
//! The [`EventBus`] trait is the publish seam between the coordination
//! substrate and the broker transport. Events flow from a service's
//! transactional outbox through the bus to every service subscribed to the
//! event type:
//!
//! ```text
//! ┌──────────────────┐
//! │ Business handler │
//! └────────┬─────────┘
//!          │ same transaction
//!          ▼
//! ┌──────────────────┐
//! │   Outbox row     │◄─── durable intent to publish
//! └────────┬─────────┘
//!          │ background relay
//!          ▼
//! ┌──────────────────┐
//! │    Event Bus     │◄─── at-least-once delivery
//! └────────┬─────────┘
//!     ┌────┴─────┐
//!     ▼          ▼
//! ┌───────┐  ┌───────┐
//! │ Saga  │  │ Cache │
//! └───────┘  └───────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: subscribers may see duplicates and must be
//!   idempotent (the envelope id is the idempotency key).
//! - **Ordered per routing key**: deliveries for one event type reach a
//!   given consumer in order; no ordering holds across event types.
//! - **Containment**: consume-side failures are logged and contained, never
//!   thrown back to a request path.
//!
//! Subscription, consume-loop control, and dispatch live on the concrete
//! bus implementation together with the [`HandlerRegistry`]; only the
//! publish seam is a trait so the outbox dispatcher and orchestrators can
//! hold an `Arc<dyn EventBus>`.
//!
//! [`HandlerRegistry`]: crate::registry::HandlerRegistry

use crate::event::EventEnvelope;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// No broker connection is available after a reconnect attempt.
    #[error("No broker connection available: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to its routing key.
    #[error("Publish failed for '{routing_key}': {reason}")]
    PublishFailed {
        /// Routing key (event-type name) the publish targeted.
        routing_key: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe the consumer to its topics.
    #[error("Subscription failed for {topics:?}: {reason}")]
    SubscriptionFailed {
        /// Topics that failed to subscribe.
        topics: Vec<String>,
        /// The reason for failure.
        reason: String,
    },

    /// A received message could not be parsed as an envelope.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Network or transport error.
    #[error("Transport error: {0}")]
    TransportError(String),
}

impl EventBusError {
    /// Whether the error is transient and a retry may succeed.
    ///
    /// Connection and transport failures are retried with backoff; a
    /// malformed message or a failed subscription will not heal by
    /// retrying the same call.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::TransportError(_) | Self::PublishFailed { .. }
        )
    }
}

/// Publish seam for event bus implementations.
///
/// Publishing serializes the canonical JSON envelope and hands it to the
/// broker with persistent delivery, using the envelope's `event_type` as
/// the routing key. Implementations wrap the send in a retry policy for
/// transient transport errors and fail loudly once retries are exhausted —
/// the caller decides whether that failure reaches its own transaction.
///
/// # Dyn Compatibility
///
/// Uses an explicit `Pin<Box<dyn Future>>` return instead of `async fn` so
/// the bus can be held as `Arc<dyn EventBus>` by the outbox dispatcher and
/// the saga orchestrator.
pub trait EventBus: Send + Sync {
    /// Publish an envelope to its event-type routing key.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] or
    /// [`EventBusError::ConnectionFailed`] once the implementation's retry
    /// policy is exhausted.
    fn publish(
        &self,
        envelope: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EventBusError::ConnectionFailed("down".into()).is_transient());
        assert!(EventBusError::TransportError("reset".into()).is_transient());
        assert!(
            EventBusError::PublishFailed {
                routing_key: "OtpSent".into(),
                reason: "timeout".into(),
            }
            .is_transient()
        );
        assert!(!EventBusError::MalformedMessage("bad json".into()).is_transient());
        assert!(
            !EventBusError::SubscriptionFailed {
                topics: vec!["OtpSent".into()],
                reason: "unauthorized".into(),
            }
            .is_transient()
        );
    }
}

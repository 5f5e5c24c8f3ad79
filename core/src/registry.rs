//! Compile-time handler registry: event-type name → decode + handlers.
//!
//! Each service builds one [`HandlerRegistry`] at startup, registering a
//! typed handler closure per event type it consumes. The registry replaces
//! runtime type lookup with an explicit mapping: the decode function is
//! monomorphized at registration, and a missing handler is a startup
//! validation error ([`HandlerRegistry::require`]) instead of a silent
//! runtime log line.
//!
//! The consume loop dispatches every delivery through
//! [`HandlerRegistry::dispatch`]: all handlers registered for the routing
//! key run in registration order, each failure is logged independently, and
//! one handler's error never prevents the others from running.
//!
//! # Example
//!
//! ```
//! use lattice_core::registry::HandlerRegistry;
//! # use lattice_core::event::{EventEnvelope, IntegrationEvent};
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Clone, Debug, Serialize, Deserialize)]
//! # struct UserLoggedIn { user_id: uuid::Uuid }
//! # impl IntegrationEvent for UserLoggedIn {
//! #     const EVENT_TYPE: &'static str = "UserLoggedIn";
//! #     const SOURCE_SERVICE: &'static str = "AuthService";
//! # }
//!
//! let mut registry = HandlerRegistry::new();
//! registry.subscribe::<UserLoggedIn, _, _>("cache-login", |event| async move {
//!     // update the user-state cache
//!     let _ = event.user_id;
//!     Ok(())
//! });
//!
//! assert_eq!(registry.event_types(), vec!["UserLoggedIn".to_string()]);
//! ```

use crate::event::{EventEnvelope, EventError, IntegrationEvent};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error produced by a handler invocation.
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    /// The envelope payload could not be decoded into the registered type.
    #[error("Failed to decode '{event_type}': {reason}")]
    Decode {
        /// Event type that failed to decode.
        event_type: String,
        /// The underlying decode error.
        reason: String,
    },

    /// The handler itself failed.
    #[error("{0}")]
    Handler(String),
}

impl HandlerError {
    /// Build a handler failure from any displayable error.
    pub fn handler(reason: impl Into<String>) -> Self {
        Self::Handler(reason.into())
    }
}

impl From<EventError> for HandlerError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Deserialization { event_type, reason }
            | EventError::Serialization { event_type, reason } => {
                Self::Decode { event_type, reason }
            },
            EventError::TypeMismatch { expected, actual } => Self::Decode {
                event_type: expected,
                reason: format!("envelope carries '{actual}'"),
            },
        }
    }
}

/// Boxed future returned by an erased handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

type HandlerFn = Box<dyn Fn(EventEnvelope) -> HandlerFuture + Send + Sync>;

struct Subscription {
    handler_name: String,
    run: HandlerFn,
}

/// Outcome of dispatching one delivery through the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No handler is registered for the routing key.
    Unhandled,
    /// The payload could not be decoded by any registered handler — a
    /// poison message.
    Poison {
        /// The decode failure reported by the registered type.
        reason: String,
    },
    /// Handlers ran; per-handler failures were logged.
    Completed {
        /// Handlers that returned `Ok`.
        succeeded: usize,
        /// Handlers that returned `Err` (already logged).
        failed: usize,
    },
}

/// Missing-handler configuration error from [`HandlerRegistry::require`].
#[derive(Error, Debug, Clone)]
#[error("No handler registered for event types: {missing:?}")]
pub struct MissingHandlers {
    /// Event types that were expected but not registered.
    pub missing: Vec<String>,
}

/// Per-service mapping of event-type name → typed decode + handlers.
///
/// Built once at startup, then shared read-only with the consume loop.
/// Registration order is dispatch order.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Vec<Subscription>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type.
    ///
    /// The decode step is fixed at registration: the closure receives an
    /// already-typed event. `handler_name` identifies the handler in logs
    /// and for [`unsubscribe`](Self::unsubscribe).
    pub fn subscribe<E, F, Fut>(&mut self, handler_name: impl Into<String>, handler: F)
    where
        E: IntegrationEvent,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler_name = handler_name.into();
        tracing::info!(
            event_type = E::EVENT_TYPE,
            handler = %handler_name,
            "Subscribing handler"
        );

        let run: HandlerFn = Box::new(move |envelope: EventEnvelope| -> HandlerFuture {
            match envelope.decode::<E>() {
                Ok(event) => Box::pin(handler(event)),
                Err(err) => {
                    let err = HandlerError::from(err);
                    Box::pin(async move { Err(err) })
                },
            }
        });

        self.handlers
            .entry(E::EVENT_TYPE.to_string())
            .or_default()
            .push(Subscription { handler_name, run });
    }

    /// Remove a named handler for an event type.
    ///
    /// Only the in-memory mapping is removed; the transport binding for the
    /// event type is left in place so no message is lost to an
    /// unbind/in-flight race. Returns `true` if a handler was removed.
    pub fn unsubscribe(&mut self, event_type: &str, handler_name: &str) -> bool {
        let Some(subscriptions) = self.handlers.get_mut(event_type) else {
            return false;
        };

        let before = subscriptions.len();
        subscriptions.retain(|s| s.handler_name != handler_name);
        let removed = subscriptions.len() < before;

        if subscriptions.is_empty() {
            self.handlers.remove(event_type);
        }

        if removed {
            tracing::info!(
                event_type,
                handler = handler_name,
                "Unsubscribed handler"
            );
        }
        removed
    }

    /// Event types with at least one registered handler, sorted.
    ///
    /// The consume loop derives its topic subscriptions from this list.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Number of handlers registered for an event type.
    #[must_use]
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }

    /// Whether no handlers are registered at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Startup validation: every listed event type must have a handler.
    ///
    /// # Errors
    ///
    /// Returns [`MissingHandlers`] naming the unregistered types.
    pub fn require(&self, event_types: &[&str]) -> Result<(), MissingHandlers> {
        let missing: Vec<String> = event_types
            .iter()
            .filter(|t| !self.handlers.contains_key(**t))
            .map(|t| (*t).to_string())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(MissingHandlers { missing })
        }
    }

    /// Dispatch a delivery to every handler registered for its routing key.
    ///
    /// Handlers run inline, in registration order. Each failure is logged
    /// with the handler's name and does not stop the remaining handlers.
    /// If every handler failed to even decode the payload, the delivery is
    /// reported as [`DispatchOutcome::Poison`] so the consume loop can
    /// dead-letter it.
    pub async fn dispatch(&self, envelope: &EventEnvelope) -> DispatchOutcome {
        let Some(subscriptions) = self.handlers.get(&envelope.event_type) else {
            tracing::warn!(
                event_type = %envelope.event_type,
                event_id = %envelope.id,
                "No handler registered for event"
            );
            return DispatchOutcome::Unhandled;
        };

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut decode_failure: Option<String> = None;

        for subscription in subscriptions {
            match (subscription.run)(envelope.clone()).await {
                Ok(()) => {
                    succeeded += 1;
                    tracing::debug!(
                        event_type = %envelope.event_type,
                        event_id = %envelope.id,
                        handler = %subscription.handler_name,
                        "Handler completed"
                    );
                },
                Err(HandlerError::Decode { reason, .. }) => {
                    failed += 1;
                    tracing::error!(
                        event_type = %envelope.event_type,
                        event_id = %envelope.id,
                        handler = %subscription.handler_name,
                        reason = %reason,
                        "Handler could not decode payload"
                    );
                    decode_failure = Some(reason);
                },
                Err(HandlerError::Handler(reason)) => {
                    failed += 1;
                    tracing::error!(
                        event_type = %envelope.event_type,
                        event_id = %envelope.id,
                        handler = %subscription.handler_name,
                        reason = %reason,
                        "Handler failed"
                    );
                },
            }
        }

        if succeeded == 0 {
            if let Some(reason) = decode_failure {
                if failed == subscriptions.len() {
                    return DispatchOutcome::Poison { reason };
                }
            }
        }

        DispatchOutcome::Completed { succeeded, failed }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct RoleGranted {
        user_id: uuid::Uuid,
        role: String,
    }

    impl IntegrationEvent for RoleGranted {
        const EVENT_TYPE: &'static str = "RoleGranted";
        const SOURCE_SERVICE: &'static str = "AuthService";
    }

    fn envelope() -> EventEnvelope {
        EventEnvelope::encode(&RoleGranted {
            user_id: uuid::Uuid::new_v4(),
            role: "Admin".to_string(),
        })
        .expect("encode should succeed")
    }

    #[tokio::test]
    async fn dispatches_to_all_handlers_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();

        for name in ["first", "second"] {
            let calls = Arc::clone(&calls);
            registry.subscribe::<RoleGranted, _, _>(name, move |_event| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        let outcome = registry.dispatch(&envelope()).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Completed {
                succeeded: 2,
                failed: 0
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_failing_handler_does_not_block_others() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();

        registry.subscribe::<RoleGranted, _, _>("failing", |_event| async {
            Err(HandlerError::handler("boom"))
        });

        let calls_clone = Arc::clone(&calls);
        registry.subscribe::<RoleGranted, _, _>("healthy", move |_event| {
            let calls = Arc::clone(&calls_clone);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let outcome = registry.dispatch(&envelope()).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Completed {
                succeeded: 1,
                failed: 1
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_event_is_unhandled() {
        let registry = HandlerRegistry::new();
        assert_eq!(registry.dispatch(&envelope()).await, DispatchOutcome::Unhandled);
    }

    #[tokio::test]
    async fn undecodable_payload_is_poison() {
        let mut registry = HandlerRegistry::new();
        registry.subscribe::<RoleGranted, _, _>("cache", |_event| async { Ok(()) });

        let mut bad = envelope();
        bad.payload = serde_json::json!({ "unexpected": true });

        assert!(matches!(
            registry.dispatch(&bad).await,
            DispatchOutcome::Poison { .. }
        ));
    }

    #[test]
    fn unsubscribe_removes_mapping() {
        let mut registry = HandlerRegistry::new();
        registry.subscribe::<RoleGranted, _, _>("cache", |_event| async { Ok(()) });

        assert!(registry.unsubscribe("RoleGranted", "cache"));
        assert!(registry.is_empty());
        assert!(!registry.unsubscribe("RoleGranted", "cache"));
    }

    #[test]
    fn require_reports_missing_types() {
        let mut registry = HandlerRegistry::new();
        registry.subscribe::<RoleGranted, _, _>("cache", |_event| async { Ok(()) });

        assert!(registry.require(&["RoleGranted"]).is_ok());
        let err = registry
            .require(&["RoleGranted", "OtpSent"])
            .expect_err("OtpSent has no handler");
        assert_eq!(err.missing, vec!["OtpSent".to_string()]);
    }
}

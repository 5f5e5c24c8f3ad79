//! Integration events and the wire envelope shared by every service.
//!
//! An integration event is an immutable fact announced across service
//! boundaries. On the wire it travels as a flat JSON object carrying four
//! header fields plus the event-specific payload:
//!
//! ```json
//! {
//!   "id": "9f0f7dc0-...",
//!   "creation_date": "2025-06-01T12:00:00Z",
//!   "event_type": "OtpVerified",
//!   "source_service": "AuthService",
//!   "correlation_id": "...",
//!   "email": "a@b.com"
//! }
//! ```
//!
//! `event_type` equals the concrete type's name and doubles as the routing
//! key: consumers agree on event-type names out of band, the transport does
//! not enforce the contract.
//!
//! # Example
//!
//! ```
//! use lattice_core::event::{EventEnvelope, IntegrationEvent};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct UserLoggedIn {
//!     user_id: uuid::Uuid,
//! }
//!
//! impl IntegrationEvent for UserLoggedIn {
//!     const EVENT_TYPE: &'static str = "UserLoggedIn";
//!     const SOURCE_SERVICE: &'static str = "AuthService";
//! }
//!
//! let envelope = EventEnvelope::encode(&UserLoggedIn {
//!     user_id: uuid::Uuid::new_v4(),
//! })?;
//! assert_eq!(envelope.event_type, "UserLoggedIn");
//! # Ok::<(), lattice_core::event::EventError>(())
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error types for envelope encoding and decoding.
#[derive(Error, Debug, Clone)]
pub enum EventError {
    /// Failed to serialize an event into an envelope payload.
    #[error("Failed to serialize event '{event_type}': {reason}")]
    Serialization {
        /// The event type being serialized.
        event_type: String,
        /// The underlying serde error.
        reason: String,
    },

    /// Failed to deserialize an envelope payload into the target type.
    #[error("Failed to deserialize event '{event_type}': {reason}")]
    Deserialization {
        /// The event type being deserialized.
        event_type: String,
        /// The underlying serde error.
        reason: String,
    },

    /// The envelope's `event_type` does not match the requested type.
    #[error("Event type mismatch: expected '{expected}', got '{actual}'")]
    TypeMismatch {
        /// The type the caller asked for.
        expected: String,
        /// The type recorded in the envelope.
        actual: String,
    },
}

/// An event that can be published across service boundaries.
///
/// Every concrete event declares a stable `EVENT_TYPE` (its own name, used
/// as the routing key) and the `SOURCE_SERVICE` that authoritatively emits
/// it. Events serialize to a flat JSON object; field names are part of the
/// cross-service contract and must stay additive.
///
/// # Idempotency
///
/// The envelope's `id` is globally unique and is the idempotency key for
/// downstream consumers: at-least-once delivery means the same event may
/// arrive more than once.
pub trait IntegrationEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable event-type name, equal to the concrete type's name.
    const EVENT_TYPE: &'static str;

    /// Name of the service that publishes this event.
    const SOURCE_SERVICE: &'static str;
}

/// The wire envelope for an integration event.
///
/// Header fields are fixed; everything event-specific lives in `payload`
/// and is flattened into the same JSON object on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Globally unique event id, set at creation. Idempotency key downstream.
    pub id: Uuid,

    /// When the event was created, UTC.
    pub creation_date: DateTime<Utc>,

    /// The concrete event type's name; also the routing key.
    pub event_type: String,

    /// The service that published the event.
    pub source_service: String,

    /// Event-specific fields, flattened into the wire object.
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Encode an event into an envelope, stamping a fresh id and the
    /// current time.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the event does not
    /// serialize to a JSON object.
    pub fn encode<E: IntegrationEvent>(event: &E) -> Result<Self, EventError> {
        Self::encode_at(event, Utc::now())
    }

    /// Encode an event with an explicit creation timestamp.
    ///
    /// Used wherever time is injected through a clock (orchestrators,
    /// deterministic tests).
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the event does not
    /// serialize to a JSON object.
    pub fn encode_at<E: IntegrationEvent>(
        event: &E,
        creation_date: DateTime<Utc>,
    ) -> Result<Self, EventError> {
        let payload = serde_json::to_value(event).map_err(|e| EventError::Serialization {
            event_type: E::EVENT_TYPE.to_string(),
            reason: e.to_string(),
        })?;

        if !payload.is_object() {
            return Err(EventError::Serialization {
                event_type: E::EVENT_TYPE.to_string(),
                reason: "event must serialize to a JSON object".to_string(),
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            creation_date,
            event_type: E::EVENT_TYPE.to_string(),
            source_service: E::SOURCE_SERVICE.to_string(),
            payload,
        })
    }

    /// Decode the payload into a concrete event type.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::TypeMismatch`] if the envelope carries a
    /// different event type, or [`EventError::Deserialization`] if the
    /// payload does not match the target type's schema.
    pub fn decode<E: IntegrationEvent>(&self) -> Result<E, EventError> {
        if self.event_type != E::EVENT_TYPE {
            return Err(EventError::TypeMismatch {
                expected: E::EVENT_TYPE.to_string(),
                actual: self.event_type.clone(),
            });
        }

        serde_json::from_value(self.payload.clone()).map_err(|e| EventError::Deserialization {
            event_type: self.event_type.clone(),
            reason: e.to_string(),
        })
    }

    /// Serialize the envelope to wire bytes (canonical JSON).
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if JSON serialization fails,
    /// which only happens for non-object payloads.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Serialization {
            event_type: self.event_type.clone(),
            reason: e.to_string(),
        })
    }

    /// Deserialize an envelope from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the bytes are not a valid
    /// envelope object.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::Deserialization {
            event_type: "<unknown>".to_string(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} from {}",
            self.event_type, self.id, self.source_service
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct OrderShipped {
        order_id: Uuid,
        tracking: String,
    }

    impl IntegrationEvent for OrderShipped {
        const EVENT_TYPE: &'static str = "OrderShipped";
        const SOURCE_SERVICE: &'static str = "ContentService";
    }

    #[test]
    fn encode_stamps_headers() {
        let event = OrderShipped {
            order_id: Uuid::new_v4(),
            tracking: "TRK-1".to_string(),
        };

        let envelope = EventEnvelope::encode(&event).expect("encode should succeed");
        assert_eq!(envelope.event_type, "OrderShipped");
        assert_eq!(envelope.source_service, "ContentService");
        assert!(!envelope.id.is_nil());
    }

    #[test]
    fn decode_roundtrip() {
        let event = OrderShipped {
            order_id: Uuid::new_v4(),
            tracking: "TRK-2".to_string(),
        };

        let envelope = EventEnvelope::encode(&event).expect("encode should succeed");
        let decoded: OrderShipped = envelope.decode().expect("decode should succeed");
        assert_eq!(event, decoded);
    }

    #[test]
    fn decode_rejects_wrong_type() {
        #[derive(Clone, Debug, Serialize, Deserialize)]
        struct OrderCancelled {
            order_id: Uuid,
        }

        impl IntegrationEvent for OrderCancelled {
            const EVENT_TYPE: &'static str = "OrderCancelled";
            const SOURCE_SERVICE: &'static str = "ContentService";
        }

        let envelope = EventEnvelope::encode(&OrderShipped {
            order_id: Uuid::new_v4(),
            tracking: "TRK-3".to_string(),
        })
        .expect("encode should succeed");

        let result: Result<OrderCancelled, _> = envelope.decode();
        assert!(matches!(result, Err(EventError::TypeMismatch { .. })));
    }

    #[test]
    fn wire_format_is_flat_json() {
        let event = OrderShipped {
            order_id: Uuid::new_v4(),
            tracking: "TRK-4".to_string(),
        };

        let envelope = EventEnvelope::encode(&event).expect("encode should succeed");
        let bytes = envelope.to_bytes().expect("to_bytes should succeed");
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        // Header and payload fields sit side by side in one object.
        assert!(value.get("id").is_some());
        assert!(value.get("creation_date").is_some());
        assert_eq!(value["event_type"], "OrderShipped");
        assert_eq!(value["source_service"], "ContentService");
        assert_eq!(value["tracking"], "TRK-4");
    }

    #[test]
    fn from_bytes_roundtrip() {
        let envelope = EventEnvelope::encode(&OrderShipped {
            order_id: Uuid::new_v4(),
            tracking: "TRK-5".to_string(),
        })
        .expect("encode should succeed");

        let bytes = envelope.to_bytes().expect("to_bytes should succeed");
        let parsed = EventEnvelope::from_bytes(&bytes).expect("from_bytes should succeed");

        assert_eq!(parsed.id, envelope.id);
        assert_eq!(parsed.event_type, envelope.event_type);
        assert_eq!(parsed.payload, envelope.payload);
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        assert!(matches!(
            EventEnvelope::from_bytes(b"not json"),
            Err(EventError::Deserialization { .. })
        ));
    }
}

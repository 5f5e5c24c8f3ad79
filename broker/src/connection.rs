//! Broker connection manager.
//!
//! Holds exactly one live producer handle per process and hides reconnect
//! churn from everything above it. The handle sits behind a single mutex,
//! so reconnecting is idempotent and safe to attempt concurrently: whoever
//! wins the lock reconnects, everyone else sees the fresh handle.
//!
//! Connection loss is never fatal to the process. Every publish path goes
//! through [`BrokerConnection::producer`], which re-validates the handle
//! and attempts one implicit reconnect before failing with an explicit
//! "no broker connection available" error. A fatal send error should be
//! followed by [`BrokerConnection::reset`] so the next caller reconnects.

use lattice_core::event_bus::EventBusError;
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use std::time::Duration;
use tokio::sync::Mutex;

/// Broker connection settings shared by producer and consumer.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Comma-separated bootstrap broker addresses.
    pub brokers: String,
    /// Deployed service identity, used to derive the consumer group name.
    pub service_name: String,
    /// Explicit consumer group; derived from `service_name` when absent.
    pub consumer_group: Option<String>,
    /// Producer acknowledgment mode. `all` gives persistent delivery.
    pub producer_acks: String,
    /// Compression codec for published messages.
    pub compression: String,
    /// Producer send timeout.
    pub send_timeout: Duration,
    /// Where a new consumer group starts reading.
    pub auto_offset_reset: String,
}

impl BrokerConfig {
    /// Create a config with defaults for the given brokers and service.
    #[must_use]
    pub fn new(brokers: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            service_name: service_name.into(),
            consumer_group: None,
            producer_acks: "all".to_string(),
            compression: "none".to_string(),
            send_timeout: Duration::from_secs(5),
            auto_offset_reset: "latest".to_string(),
        }
    }

    /// The consumer group this service consumes under.
    ///
    /// Explicit group if configured, otherwise derived from the service
    /// identity (`<service>_workers`). Every replica of a service shares
    /// this group, giving competing-consumer load distribution.
    #[must_use]
    pub fn group_id(&self) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| format!("{}_workers", self.service_name))
    }

    /// Topic receiving poison messages for this service's group.
    #[must_use]
    pub fn dead_letter_topic(&self) -> String {
        format!("{}.dead-letter", self.group_id())
    }
}

/// Mutex-guarded lazy producer handle.
///
/// Created at process startup, torn down at shutdown. The handle is
/// process-scoped; [`FutureProducer`] is internally reference-counted, so
/// [`producer`](Self::producer) hands out cheap clones of the one live
/// handle.
pub struct BrokerConnection {
    config: BrokerConfig,
    producer: Mutex<Option<FutureProducer>>,
}

impl BrokerConnection {
    /// Create a connection manager. No connection is attempted until
    /// [`connect`](Self::connect) or the first [`producer`](Self::producer)
    /// call.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            producer: Mutex::new(None),
        }
    }

    /// The configuration this connection was built with.
    #[must_use]
    pub const fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Attempt to establish the producer connection.
    ///
    /// Returns `true` on success. On failure the error is logged and
    /// `false` is returned without propagating, so callers can poll.
    /// Safe to call concurrently; an already-live handle is kept.
    pub async fn connect(&self) -> bool {
        let mut guard = self.producer.lock().await;
        if guard.is_some() {
            return true;
        }

        match self.create_producer() {
            Ok(producer) => {
                tracing::info!(
                    brokers = %self.config.brokers,
                    acks = %self.config.producer_acks,
                    "Broker connection established"
                );
                *guard = Some(producer);
                true
            },
            Err(err) => {
                tracing::error!(
                    brokers = %self.config.brokers,
                    error = %err,
                    "Broker connection could not be established"
                );
                false
            },
        }
    }

    /// Whether a live producer handle is currently held.
    pub async fn is_connected(&self) -> bool {
        self.producer.lock().await.is_some()
    }

    /// Get the producer handle, reconnecting implicitly if needed.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if no connection is
    /// available after the implicit reconnect attempt.
    pub async fn producer(&self) -> Result<FutureProducer, EventBusError> {
        let mut guard = self.producer.lock().await;

        if guard.is_none() {
            match self.create_producer() {
                Ok(producer) => {
                    tracing::info!(brokers = %self.config.brokers, "Broker reconnected");
                    *guard = Some(producer);
                },
                Err(err) => {
                    return Err(EventBusError::ConnectionFailed(format!(
                        "no broker connection available: {err}"
                    )));
                },
            }
        }

        guard.as_ref().cloned().ok_or_else(|| {
            EventBusError::ConnectionFailed("no broker connection available".to_string())
        })
    }

    /// Drop the current handle so the next caller reconnects.
    ///
    /// Called after a fatal publish error; the client library handles
    /// transient broker hiccups internally, a reset forces a fresh handle
    /// for everything else.
    pub async fn reset(&self) {
        let mut guard = self.producer.lock().await;
        if guard.take().is_some() {
            tracing::warn!(
                brokers = %self.config.brokers,
                "Broker connection reset, will reconnect on next use"
            );
        }
    }

    fn create_producer(&self) -> Result<FutureProducer, rdkafka::error::KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &self.config.brokers)
            .set(
                "message.timeout.ms",
                self.config.send_timeout.as_millis().to_string(),
            )
            .set("acks", &self.config.producer_acks)
            .set("compression.type", &self.config.compression);

        client_config.create()
    }
}

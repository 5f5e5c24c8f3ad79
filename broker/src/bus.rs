//! Kafka-compatible event bus: typed publish/subscribe over the broker.
//!
//! # Delivery semantics
//!
//! **At-least-once** with manual offset commits:
//! - Publishes go to the event-type topic (`event_type` is the routing
//!   key) with persistent delivery (`acks=all` by default), wrapped in an
//!   exponential-backoff retry for transient transport errors. Exhausting
//!   retries fails loudly — the caller decides what that means for its own
//!   transaction.
//! - The consume loop commits an offset only after the message has been
//!   fully processed or intentionally dead-lettered. A crash before commit
//!   means redelivery; consumers are idempotent.
//! - Handlers run inline on the consume task: a slow handler delays
//!   acknowledgment of subsequent messages, which is the intended
//!   backpressure. Replicas of a service share one consumer group and
//!   compete for deliveries.
//!
//! # Poison messages
//!
//! A delivery that cannot be parsed as an envelope, decoded into its
//! registered type, or matched to any handler is routed to the service's
//! dead-letter topic and then committed. If the dead-letter publish itself
//! fails the offset is *not* committed, so the broker redelivers rather
//! than silently dropping data.
//!
//! # Example
//!
//! ```no_run
//! use lattice_broker::{BrokerConfig, BrokerConnection, KafkaEventBus};
//! use lattice_core::registry::HandlerRegistry;
//! use std::sync::Arc;
//!
//! # async fn example(registry: HandlerRegistry) -> Result<(), Box<dyn std::error::Error>> {
//! let config = BrokerConfig::new("localhost:9092", "user-service");
//! let connection = Arc::new(BrokerConnection::new(config));
//! let bus = KafkaEventBus::new(Arc::clone(&connection));
//!
//! let handle = bus.start_consuming(Arc::new(registry))?;
//! // ... run until shutdown ...
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

use crate::connection::BrokerConnection;
use futures::StreamExt;
use lattice_core::backoff::{BackoffPolicy, retry};
use lattice_core::event::EventEnvelope;
use lattice_core::event_bus::{EventBus, EventBusError};
use lattice_core::registry::{DispatchOutcome, HandlerRegistry};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Production event bus over the Kafka-compatible broker.
///
/// One instance per process, sharing the process's [`BrokerConnection`].
/// Publishing is available immediately; consumption starts when
/// [`start_consuming`](Self::start_consuming) is called with the service's
/// populated [`HandlerRegistry`].
pub struct KafkaEventBus {
    connection: Arc<BrokerConnection>,
    retry_policy: BackoffPolicy,
}

impl KafkaEventBus {
    /// Create an event bus with the default publish retry policy.
    #[must_use]
    pub fn new(connection: Arc<BrokerConnection>) -> Self {
        Self {
            connection,
            retry_policy: BackoffPolicy::default()
                .with_max_retries(5)
                .with_initial_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(30)),
        }
    }

    /// Override the publish retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: BackoffPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Start the process's consume loop.
    ///
    /// Subscribes the service's consumer group to one topic per event type
    /// registered in `registry` — the first registration of a type is what
    /// binds its routing key to this service's queue. Returns a
    /// [`ConsumerHandle`] used to stop the loop.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the registry is
    /// empty, the consumer cannot be created, or the subscription is
    /// rejected by the broker.
    pub fn start_consuming(
        &self,
        registry: Arc<HandlerRegistry>,
    ) -> Result<ConsumerHandle, EventBusError> {
        let topics = registry.event_types();
        if topics.is_empty() {
            return Err(EventBusError::SubscriptionFailed {
                topics,
                reason: "no event handlers registered".to_string(),
            });
        }

        let config = self.connection.config().clone();
        let group_id = config.group_id();

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| EventBusError::SubscriptionFailed {
                topics: topics.clone(),
                reason: format!("failed to create consumer: {e}"),
            })?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| EventBusError::SubscriptionFailed {
                topics: topics.clone(),
                reason: format!("failed to subscribe: {e}"),
            })?;

        tracing::info!(
            topics = ?topics,
            consumer_group = %group_id,
            "Consume loop starting"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connection = Arc::clone(&self.connection);
        let dead_letter_topic = config.dead_letter_topic();
        let send_timeout = config.send_timeout;

        let task = tokio::spawn(consume_loop(
            consumer,
            registry,
            connection,
            dead_letter_topic,
            send_timeout,
            shutdown_rx,
        ));

        Ok(ConsumerHandle {
            shutdown: shutdown_tx,
            task,
        })
    }
}

impl EventBus for KafkaEventBus {
    fn publish(
        &self,
        envelope: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let envelope = envelope.clone();

        Box::pin(async move {
            let bytes = envelope
                .to_bytes()
                .map_err(|e| EventBusError::MalformedMessage(e.to_string()))?;

            let connection = Arc::clone(&self.connection);
            let routing_key = envelope.event_type.clone();
            let event_id = envelope.id;
            let send_timeout = self.connection.config().send_timeout;

            retry(&self.retry_policy, EventBusError::is_transient, || {
                let connection = Arc::clone(&connection);
                let routing_key = routing_key.clone();
                let bytes = bytes.clone();
                async move {
                    let producer = connection.producer().await?;
                    let record = FutureRecord::to(&routing_key)
                        .payload(&bytes)
                        .key(routing_key.as_bytes());

                    match producer.send(record, Timeout::After(send_timeout)).await {
                        Ok((partition, offset)) => {
                            tracing::debug!(
                                routing_key = %routing_key,
                                event_id = %event_id,
                                partition,
                                offset,
                                "Event published"
                            );
                            metrics::counter!("lattice.broker.published").increment(1);
                            Ok(())
                        },
                        Err((kafka_error, _)) => {
                            connection.reset().await;
                            Err(EventBusError::PublishFailed {
                                routing_key,
                                reason: kafka_error.to_string(),
                            })
                        },
                    }
                }
            })
            .await
        })
    }
}

/// Handle controlling a running consume loop.
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Signal the loop to stop and wait for it to drain.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            tracing::warn!(error = %err, "Consume loop did not shut down cleanly");
        }
    }
}

async fn consume_loop(
    consumer: StreamConsumer,
    registry: Arc<HandlerRegistry>,
    connection: Arc<BrokerConnection>,
    dead_letter_topic: String,
    send_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut stream = consumer.stream();

    loop {
        let message = tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("Consume loop shutting down");
                break;
            },
            next = stream.next() => match next {
                Some(Ok(message)) => message,
                Some(Err(err)) => {
                    tracing::error!(error = %err, "Transport error while consuming");
                    continue;
                },
                None => {
                    tracing::info!("Consumer stream ended");
                    break;
                },
            },
        };

        let Some(payload) = message.payload() else {
            tracing::warn!(
                topic = message.topic(),
                offset = message.offset(),
                "Dropping message with no payload"
            );
            commit(&consumer, &message);
            continue;
        };

        metrics::counter!("lattice.broker.consumed").increment(1);

        let acknowledged = match EventEnvelope::from_bytes(payload) {
            Ok(envelope) => {
                tracing::debug!(
                    event_type = %envelope.event_type,
                    event_id = %envelope.id,
                    topic = message.topic(),
                    offset = message.offset(),
                    "Delivery received"
                );

                match registry.dispatch(&envelope).await {
                    DispatchOutcome::Completed { succeeded, failed } => {
                        if failed > 0 {
                            tracing::warn!(
                                event_type = %envelope.event_type,
                                event_id = %envelope.id,
                                succeeded,
                                failed,
                                "Delivery processed with handler failures"
                            );
                        }
                        // Handler failures are contained and logged; the
                        // message is still acknowledged. Retry belongs to
                        // the publish side (outbox), not the consume side.
                        true
                    },
                    DispatchOutcome::Unhandled => {
                        dead_letter(
                            &connection,
                            &dead_letter_topic,
                            payload,
                            &envelope.event_type,
                            send_timeout,
                            "no handler registered",
                        )
                        .await
                    },
                    DispatchOutcome::Poison { reason } => {
                        dead_letter(
                            &connection,
                            &dead_letter_topic,
                            payload,
                            &envelope.event_type,
                            send_timeout,
                            &reason,
                        )
                        .await
                    },
                }
            },
            Err(err) => {
                dead_letter(
                    &connection,
                    &dead_letter_topic,
                    payload,
                    message.topic(),
                    send_timeout,
                    &err.to_string(),
                )
                .await
            },
        };

        if acknowledged {
            commit(&consumer, &message);
        }
    }
}

fn commit(consumer: &StreamConsumer, message: &rdkafka::message::BorrowedMessage<'_>) {
    if let Err(err) = consumer.commit_message(message, CommitMode::Async) {
        tracing::warn!(
            topic = message.topic(),
            offset = message.offset(),
            error = %err,
            "Failed to commit offset, message may be redelivered"
        );
    }
}

/// Route a poison message to the dead-letter topic.
///
/// Returns `true` if the message may be acknowledged: either it reached
/// the dead-letter topic, or dead-lettering is impossible and the message
/// should stay on the queue for redelivery (`false`).
async fn dead_letter(
    connection: &BrokerConnection,
    dead_letter_topic: &str,
    payload: &[u8],
    original_key: &str,
    send_timeout: Duration,
    reason: &str,
) -> bool {
    tracing::error!(
        dead_letter_topic,
        original_key,
        reason,
        "Routing poison message to dead-letter topic"
    );

    let producer: FutureProducer = match connection.producer().await {
        Ok(producer) => producer,
        Err(err) => {
            tracing::error!(error = %err, "Cannot dead-letter without a connection, keeping message");
            return false;
        },
    };

    let record = FutureRecord::to(dead_letter_topic)
        .payload(payload)
        .key(original_key.as_bytes());

    match producer.send(record, Timeout::After(send_timeout)).await {
        Ok(_) => {
            metrics::counter!("lattice.broker.dead_lettered").increment(1);
            true
        },
        Err((err, _)) => {
            tracing::error!(error = %err, "Dead-letter publish failed, keeping message");
            false
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::connection::BrokerConfig;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Ping {
        seq: u64,
    }

    impl lattice_core::event::IntegrationEvent for Ping {
        const EVENT_TYPE: &'static str = "Ping";
        const SOURCE_SERVICE: &'static str = "TestService";
    }

    #[test]
    fn bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<KafkaEventBus>();
        assert_sync::<KafkaEventBus>();
    }

    #[test]
    fn start_consuming_requires_registrations() {
        let connection = Arc::new(BrokerConnection::new(BrokerConfig::new(
            "localhost:9092",
            "user-service",
        )));
        let bus = KafkaEventBus::new(connection);

        let result = bus.start_consuming(Arc::new(HandlerRegistry::new()));
        assert!(matches!(
            result,
            Err(EventBusError::SubscriptionFailed { .. })
        ));
    }

    #[test]
    fn topics_derive_from_registry() {
        let mut registry = HandlerRegistry::new();
        registry.subscribe::<Ping, _, _>("pong", |_event| async { Ok(()) });
        assert_eq!(registry.event_types(), vec!["Ping".to_string()]);
    }
}

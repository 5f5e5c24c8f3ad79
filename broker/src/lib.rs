//! # Lattice Broker
//!
//! Kafka-compatible transport for the Lattice coordination substrate.
//!
//! The platform's broker topology maps onto the Kafka protocol as
//! follows: the event-type name is both routing key and topic; the durable
//! per-service queue is the service's consumer group; binding a routing
//! key to the queue is adding the event-type topic to the group's
//! subscription; persistent delivery is `acks=all`; acknowledging a
//! message is committing its offset after processing.
//!
//! Two pieces:
//!
//! - [`BrokerConnection`]: the process-scoped, mutex-guarded connection
//!   manager ([`connection`] module)
//! - [`KafkaEventBus`]: publish-with-retry plus the manual-commit consume
//!   loop dispatching through the service's
//!   [`HandlerRegistry`](lattice_core::registry::HandlerRegistry)
//!   ([`bus`] module)

pub mod bus;
pub mod connection;

pub use bus::{ConsumerHandle, KafkaEventBus};
pub use connection::{BrokerConfig, BrokerConnection};

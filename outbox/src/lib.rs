//! # Lattice Outbox
//!
//! Transactional outbox for the Lattice coordination substrate: a business
//! state change and the event announcing it are written in one local
//! transaction, then a background dispatcher relays the event through the
//! bus with at-least-once delivery. This closes the dual-write gap between
//! the database and the broker — a committed change is never silently
//! missing its announcement, and a rolled-back change leaves no orphaned
//! event.
//!
//! - [`store`]: the [`OutboxEvent`] row model and [`OutboxStore`] trait
//! - [`postgres`]: [`PostgresOutboxStore`] with transactional staging and
//!   `FOR UPDATE SKIP LOCKED` lease-based claiming
//! - [`memory`]: [`InMemoryOutboxStore`] for tests and local development
//! - [`dispatcher`]: the [`OutboxDispatcher`] background relay

pub mod dispatcher;
pub mod memory;
pub mod postgres;
pub mod store;

pub use dispatcher::{DispatchStats, DispatcherHandle, OutboxConfig, OutboxDispatcher};
pub use memory::InMemoryOutboxStore;
pub use postgres::PostgresOutboxStore;
pub use store::{OutboxError, OutboxEvent, OutboxStore};

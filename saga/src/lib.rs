//! # Lattice Saga
//!
//! Saga orchestration for the Lattice coordination substrate: persistent
//! state machines keyed by a business correlation id, driven by
//! integration events, with durable timeouts and event-driven
//! compensation.
//!
//! Two workflows ship with the platform:
//!
//! - **User registration** ([`machine`]): `Started → OtpSent → OtpVerified
//!   → AuthUserCreated → UserProfileCreated`, compensating a created auth
//!   account when a later step fails.
//! - **Admin-initiated user creation** ([`admin`]): `Started →
//!   AuthUserCreated → ProfileBound`, binding a pre-created pending
//!   profile to the new account.
//!
//! Both are pure, enum-keyed transition functions run by the shared
//! [`SagaOrchestrator`](orchestrator::SagaOrchestrator). Transitions and
//! the commands they announce persist atomically
//! ([`SagaStore`](store::SagaStore)), commands travel through the
//! transactional outbox, and timeouts are durable rows redelivered by the
//! [`TimeoutSweeper`](timeout::TimeoutSweeper) — never in-process timers,
//! so instances survive restarts mid-wait.
//!
//! Idempotency rules, everywhere: one row per correlation id, strictly
//! forward transitions, terminal rows ignore all further events, stale
//! timeout tokens are no-ops, and compensation commands are safe to apply
//! twice.

pub mod admin;
pub mod events;
pub mod handlers;
pub mod machine;
pub mod orchestrator;
pub mod postgres;
pub mod state;
pub mod store;
pub mod timeout;

pub use admin::{AdminCreationEvent, AdminCreationWorkflow};
pub use handlers::{
    ADMIN_CREATION_EVENT_TYPES, REGISTRATION_EVENT_TYPES, register_admin_creation_saga,
    register_registration_saga,
};
pub use machine::{RegistrationEvent, RegistrationWorkflow};
pub use orchestrator::{Decision, SagaOrchestrator, Workflow};
pub use postgres::{PostgresAdminSagaStore, PostgresRegistrationSagaStore};
pub use state::{
    AdminCreationSagaState, AdminCreationState, RegistrationSagaState, RegistrationState,
};
pub use store::{InMemorySagaStore, SagaError, SagaRow, SagaStore};
pub use timeout::{SweeperHandle, TimeoutSweeper};

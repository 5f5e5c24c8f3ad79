//! Registry wiring for the saga consumers.
//!
//! Each workflow subscribes one handler per advancing event type; the
//! handler decodes the typed event and feeds it to the orchestrator.
//! Timeout events are not subscribed here — they come from the durable
//! sweeper, not from the bus.

use crate::admin::{AdminCreationEvent, AdminCreationWorkflow};
use crate::events::{
    AdminUserCreationStarted, AuthUserCreated, AuthUserCreatedByAdmin, OtpSent, OtpVerified,
    RegistrationStarted, UserProfileBound, UserProfileCreated,
};
use crate::machine::{RegistrationEvent, RegistrationWorkflow};
use crate::orchestrator::SagaOrchestrator;
use crate::state::{AdminCreationSagaState, RegistrationSagaState};
use crate::store::SagaStore;
use lattice_core::registry::{HandlerError, HandlerRegistry};
use std::sync::Arc;

/// Event types the registration saga consumes from the bus.
pub const REGISTRATION_EVENT_TYPES: &[&str] = &[
    "RegistrationStarted",
    "OtpSent",
    "OtpVerified",
    "AuthUserCreated",
    "UserProfileCreated",
];

/// Event types the admin-creation saga consumes from the bus.
pub const ADMIN_CREATION_EVENT_TYPES: &[&str] = &[
    "AdminUserCreationStarted",
    "AuthUserCreatedByAdmin",
    "UserProfileBound",
];

/// Subscribe the registration saga's handlers.
pub fn register_registration_saga<S>(
    registry: &mut HandlerRegistry,
    orchestrator: Arc<SagaOrchestrator<RegistrationWorkflow, S>>,
) where
    S: SagaStore<RegistrationSagaState>,
{
    const HANDLER: &str = "registration-saga";

    let orch = Arc::clone(&orchestrator);
    registry.subscribe::<RegistrationStarted, _, _>(HANDLER, move |event| {
        let orch = Arc::clone(&orch);
        async move {
            orch.handle(RegistrationEvent::Started(event))
                .await
                .map_err(|e| HandlerError::handler(e.to_string()))
        }
    });

    let orch = Arc::clone(&orchestrator);
    registry.subscribe::<OtpSent, _, _>(HANDLER, move |event| {
        let orch = Arc::clone(&orch);
        async move {
            orch.handle(RegistrationEvent::OtpSent(event))
                .await
                .map_err(|e| HandlerError::handler(e.to_string()))
        }
    });

    let orch = Arc::clone(&orchestrator);
    registry.subscribe::<OtpVerified, _, _>(HANDLER, move |event| {
        let orch = Arc::clone(&orch);
        async move {
            orch.handle(RegistrationEvent::OtpVerified(event))
                .await
                .map_err(|e| HandlerError::handler(e.to_string()))
        }
    });

    let orch = Arc::clone(&orchestrator);
    registry.subscribe::<AuthUserCreated, _, _>(HANDLER, move |event| {
        let orch = Arc::clone(&orch);
        async move {
            orch.handle(RegistrationEvent::AuthUserCreated(event))
                .await
                .map_err(|e| HandlerError::handler(e.to_string()))
        }
    });

    let orch = Arc::clone(&orchestrator);
    registry.subscribe::<UserProfileCreated, _, _>(HANDLER, move |event| {
        let orch = Arc::clone(&orch);
        async move {
            orch.handle(RegistrationEvent::UserProfileCreated(event))
                .await
                .map_err(|e| HandlerError::handler(e.to_string()))
        }
    });
}

/// Subscribe the admin-creation saga's handlers.
pub fn register_admin_creation_saga<S>(
    registry: &mut HandlerRegistry,
    orchestrator: Arc<SagaOrchestrator<AdminCreationWorkflow, S>>,
) where
    S: SagaStore<AdminCreationSagaState>,
{
    const HANDLER: &str = "admin-creation-saga";

    let orch = Arc::clone(&orchestrator);
    registry.subscribe::<AdminUserCreationStarted, _, _>(HANDLER, move |event| {
        let orch = Arc::clone(&orch);
        async move {
            orch.handle(AdminCreationEvent::Started(event))
                .await
                .map_err(|e| HandlerError::handler(e.to_string()))
        }
    });

    let orch = Arc::clone(&orchestrator);
    registry.subscribe::<AuthUserCreatedByAdmin, _, _>(HANDLER, move |event| {
        let orch = Arc::clone(&orch);
        async move {
            orch.handle(AdminCreationEvent::AuthUserCreated(event))
                .await
                .map_err(|e| HandlerError::handler(e.to_string()))
        }
    });

    let orch = Arc::clone(&orchestrator);
    registry.subscribe::<UserProfileBound, _, _>(HANDLER, move |event| {
        let orch = Arc::clone(&orch);
        async move {
            orch.handle(AdminCreationEvent::ProfileBound(event))
                .await
                .map_err(|e| HandlerError::handler(e.to_string()))
        }
    });
}

//! End-to-end registration workflow over the in-memory stores: the full
//! happy path through the outbox relay, duplicate-delivery idempotency,
//! timeout handling, and compensation.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code uses expect for clear failure messages

use lattice_core::environment::Clock;
use lattice_outbox::{InMemoryOutboxStore, OutboxConfig, OutboxDispatcher};
use lattice_saga::events::{
    AuthUserCreated, OtpSent, OtpVerified, RegistrationStarted, UserProfileCreated,
};
use lattice_saga::{
    InMemorySagaStore, RegistrationEvent, RegistrationSagaState, RegistrationState,
    RegistrationWorkflow, SagaOrchestrator, SagaStore, TimeoutSweeper,
};
use lattice_testing::{InMemoryEventBus, MutableClock, test_clock};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct Fixture {
    outbox: Arc<InMemoryOutboxStore>,
    saga_store: Arc<InMemorySagaStore<RegistrationSagaState>>,
    clock: Arc<MutableClock>,
    orchestrator: Arc<SagaOrchestrator<RegistrationWorkflow, InMemorySagaStore<RegistrationSagaState>>>,
    bus: Arc<InMemoryEventBus>,
    dispatcher: OutboxDispatcher<InMemoryOutboxStore>,
}

fn fixture() -> Fixture {
    let outbox = Arc::new(InMemoryOutboxStore::new());
    let saga_store = Arc::new(InMemorySagaStore::new(Arc::clone(&outbox)));
    let clock = Arc::new(MutableClock::new(test_clock().now()));
    let bus = Arc::new(InMemoryEventBus::new());

    let orchestrator = Arc::new(SagaOrchestrator::new(
        RegistrationWorkflow::default(),
        Arc::clone(&saga_store),
        Arc::clone(&clock) as Arc<dyn Clock>,
    ));

    let dispatcher = OutboxDispatcher::new(
        Arc::clone(&outbox),
        Arc::clone(&bus) as _,
        Arc::clone(&clock) as _,
        OutboxConfig::default(),
    );

    Fixture {
        outbox,
        saga_store,
        clock,
        orchestrator,
        bus,
        dispatcher,
    }
}

fn started(correlation_id: Uuid) -> RegistrationEvent {
    RegistrationEvent::Started(RegistrationStarted {
        correlation_id,
        email: "a@b.com".to_string(),
        encrypted_password: "enc".to_string(),
        full_name: "Ada".to_string(),
        phone_number: "+100".to_string(),
    })
}

fn otp_sent(correlation_id: Uuid) -> RegistrationEvent {
    RegistrationEvent::OtpSent(OtpSent {
        correlation_id,
        success: true,
        error_message: None,
    })
}

async fn saga_state(fixture: &Fixture, correlation_id: Uuid) -> RegistrationSagaState {
    fixture
        .saga_store
        .load(correlation_id)
        .await
        .expect("load should succeed")
        .expect("saga row should exist")
}

#[tokio::test]
async fn registration_happy_path_end_to_end() {
    let fx = fixture();
    let correlation_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let profile_id = Uuid::new_v4();

    // RegistrationStarted creates the saga row in Started.
    fx.orchestrator.handle(started(correlation_id)).await.unwrap();
    let row = saga_state(&fx, correlation_id).await;
    assert_eq!(row.current_state, RegistrationState::Started);

    // The staged OTP command flows through the outbox relay to the bus.
    fx.dispatcher.run_once().await.unwrap();
    assert_eq!(fx.bus.published_of_type("SendOtpNotification").len(), 1);

    // OtpSent advances the saga.
    fx.orchestrator.handle(otp_sent(correlation_id)).await.unwrap();
    assert_eq!(
        saga_state(&fx, correlation_id).await.current_state,
        RegistrationState::OtpSent
    );

    // OtpVerified publishes the CreateAuthUser command.
    fx.orchestrator
        .handle(RegistrationEvent::OtpVerified(OtpVerified { correlation_id }))
        .await
        .unwrap();
    fx.dispatcher.run_once().await.unwrap();
    assert_eq!(fx.bus.published_of_type("CreateAuthUser").len(), 1);

    // AuthUserCreated records the id and requests the profile.
    fx.orchestrator
        .handle(RegistrationEvent::AuthUserCreated(AuthUserCreated {
            correlation_id,
            user_id,
            success: true,
            error_message: None,
        }))
        .await
        .unwrap();
    let row = saga_state(&fx, correlation_id).await;
    assert_eq!(row.current_state, RegistrationState::AuthUserCreated);
    assert_eq!(row.auth_user_id, Some(user_id));
    fx.dispatcher.run_once().await.unwrap();
    assert_eq!(fx.bus.published_of_type("CreateUserProfile").len(), 1);

    // UserProfileCreated completes the workflow.
    fx.orchestrator
        .handle(RegistrationEvent::UserProfileCreated(UserProfileCreated {
            correlation_id,
            user_profile_id: profile_id,
            user_id,
            success: true,
            error_message: None,
        }))
        .await
        .unwrap();
    let row = saga_state(&fx, correlation_id).await;
    assert_eq!(row.current_state, RegistrationState::UserProfileCreated);
    assert!(row.is_completed);
    assert!(row.completed_at.is_some());
    assert_eq!(row.user_profile_id, Some(profile_id));

    fx.dispatcher.run_once().await.unwrap();
    assert_eq!(fx.bus.published_of_type("RegistrationCompleted").len(), 1);
    assert_eq!(fx.outbox.pending_count().await, 0);
}

#[tokio::test]
async fn duplicate_advancing_event_transitions_once() {
    let fx = fixture();
    let correlation_id = Uuid::new_v4();

    fx.orchestrator.handle(started(correlation_id)).await.unwrap();
    fx.orchestrator.handle(otp_sent(correlation_id)).await.unwrap();
    fx.orchestrator
        .handle(RegistrationEvent::OtpVerified(OtpVerified { correlation_id }))
        .await
        .unwrap();

    // Redelivery of the same advancing event: state unchanged, no second
    // CreateAuthUser command staged.
    fx.orchestrator
        .handle(RegistrationEvent::OtpVerified(OtpVerified { correlation_id }))
        .await
        .unwrap();

    let row = saga_state(&fx, correlation_id).await;
    assert_eq!(row.current_state, RegistrationState::OtpVerified);

    let create_auth_commands = fx
        .outbox
        .rows()
        .await
        .into_iter()
        .filter(|r| r.event_type == "CreateAuthUser")
        .count();
    assert_eq!(create_auth_commands, 1);
}

#[tokio::test]
async fn duplicate_start_is_a_noop() {
    let fx = fixture();
    let correlation_id = Uuid::new_v4();

    fx.orchestrator.handle(started(correlation_id)).await.unwrap();
    fx.orchestrator.handle(otp_sent(correlation_id)).await.unwrap();

    // A repeat start for the same correlation id must not reset progress.
    fx.orchestrator.handle(started(correlation_id)).await.unwrap();

    let row = saga_state(&fx, correlation_id).await;
    assert_eq!(row.current_state, RegistrationState::OtpSent);
    assert_eq!(
        fx.outbox
            .rows()
            .await
            .iter()
            .filter(|r| r.event_type == "SendOtpNotification")
            .count(),
        1
    );
}

#[tokio::test]
async fn timeout_fails_the_saga_exactly_once_and_late_events_are_ignored() {
    let fx = fixture();
    let correlation_id = Uuid::new_v4();

    fx.orchestrator.handle(started(correlation_id)).await.unwrap();

    let sweeper = TimeoutSweeper::new(
        Arc::clone(&fx.orchestrator),
        Arc::clone(&fx.clock) as Arc<dyn Clock>,
    );

    // Before the deadline nothing fires.
    assert_eq!(sweeper.run_once().await.unwrap(), 0);

    // Past the deadline the timeout fires exactly once.
    fx.clock.advance(chrono::Duration::minutes(6));
    assert_eq!(sweeper.run_once().await.unwrap(), 1);

    let row = saga_state(&fx, correlation_id).await;
    assert_eq!(row.current_state, RegistrationState::Failed);
    assert!(row.is_failed);
    assert!(row.error_message.is_some());

    // Terminal rows drop out of the due scan: no second firing.
    assert_eq!(sweeper.run_once().await.unwrap(), 0);

    // A late-arriving follow-up does not resurrect the saga.
    fx.orchestrator.handle(otp_sent(correlation_id)).await.unwrap();
    let row = saga_state(&fx, correlation_id).await;
    assert_eq!(row.current_state, RegistrationState::Failed);

    assert_eq!(
        fx.outbox
            .rows()
            .await
            .iter()
            .filter(|r| r.event_type == "RegistrationFailed")
            .count(),
        1
    );
}

#[tokio::test]
async fn late_failure_compensates_exactly_once() {
    let fx = fixture();
    let correlation_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();

    fx.orchestrator.handle(started(correlation_id)).await.unwrap();
    fx.orchestrator.handle(otp_sent(correlation_id)).await.unwrap();
    fx.orchestrator
        .handle(RegistrationEvent::OtpVerified(OtpVerified { correlation_id }))
        .await
        .unwrap();
    fx.orchestrator
        .handle(RegistrationEvent::AuthUserCreated(AuthUserCreated {
            correlation_id,
            user_id,
            success: true,
            error_message: None,
        }))
        .await
        .unwrap();

    let profile_failed = RegistrationEvent::UserProfileCreated(UserProfileCreated {
        correlation_id,
        user_profile_id: Uuid::new_v4(),
        user_id,
        success: false,
        error_message: Some("profile store unavailable".to_string()),
    });

    fx.orchestrator.handle(profile_failed.clone()).await.unwrap();
    // Duplicate delivery of the failure event hits a terminal saga.
    fx.orchestrator.handle(profile_failed).await.unwrap();

    let row = saga_state(&fx, correlation_id).await;
    assert_eq!(row.current_state, RegistrationState::Failed);

    // The compensating delete was staged exactly once even though the
    // failure event arrived twice.
    assert_eq!(
        fx.outbox
            .rows()
            .await
            .iter()
            .filter(|r| r.event_type == "DeleteAuthUser")
            .count(),
        1
    );

    // And it reaches the bus through the same at-least-once relay.
    fx.dispatcher.run_once().await.unwrap();
    assert_eq!(fx.bus.published_of_type("DeleteAuthUser").len(), 1);
}

#[tokio::test]
async fn spawned_sweeper_times_out_stalled_sagas() {
    let fx = fixture();
    let correlation_id = Uuid::new_v4();

    fx.orchestrator.handle(started(correlation_id)).await.unwrap();
    fx.clock.advance(chrono::Duration::minutes(6));

    let sweeper = TimeoutSweeper::new(
        Arc::clone(&fx.orchestrator),
        Arc::clone(&fx.clock) as Arc<dyn Clock>,
    )
    .with_sweep_interval(Duration::from_millis(10));

    let handle = sweeper.spawn();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop().await;

    let row = saga_state(&fx, correlation_id).await;
    assert_eq!(row.current_state, RegistrationState::Failed);
}

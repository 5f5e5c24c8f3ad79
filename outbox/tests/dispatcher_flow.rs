//! Dispatcher behavior against the in-memory store and a scriptable bus:
//! at-least-once delivery through transient broker failures, backoff
//! bookkeeping, and exhausted-row visibility.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code uses expect for clear failure messages

use lattice_core::backoff::BackoffPolicy;
use lattice_core::environment::Clock;
use lattice_core::event::{EventEnvelope, IntegrationEvent};
use lattice_outbox::{InMemoryOutboxStore, OutboxConfig, OutboxDispatcher, OutboxStore};
use lattice_testing::{InMemoryEventBus, MutableClock, test_clock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SubscriptionActivated {
    subscription_id: Uuid,
    user_id: Uuid,
}

impl IntegrationEvent for SubscriptionActivated {
    const EVENT_TYPE: &'static str = "SubscriptionActivated";
    const SOURCE_SERVICE: &'static str = "SubscriptionService";
}

fn fixture() -> (
    Arc<InMemoryOutboxStore>,
    Arc<InMemoryEventBus>,
    Arc<MutableClock>,
    OutboxDispatcher<InMemoryOutboxStore>,
) {
    let store = Arc::new(InMemoryOutboxStore::new().with_claim_lease(Duration::from_secs(1)));
    let bus = Arc::new(InMemoryEventBus::new());
    let clock = Arc::new(MutableClock::new(test_clock().now()));

    let config = OutboxConfig {
        poll_interval: Duration::from_millis(10),
        batch_size: 10,
        backoff: BackoffPolicy::default()
            .with_initial_delay(Duration::from_secs(60))
            .with_max_delay(Duration::from_secs(3600)),
    };

    let dispatcher = OutboxDispatcher::new(
        Arc::clone(&store),
        Arc::clone(&bus) as _,
        Arc::clone(&clock) as _,
        config,
    );

    (store, bus, clock, dispatcher)
}

fn envelope() -> EventEnvelope {
    EventEnvelope::encode(&SubscriptionActivated {
        subscription_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
    })
    .expect("encode should succeed")
}

#[tokio::test]
async fn delivers_committed_rows() {
    let (store, bus, clock, dispatcher) = fixture();
    store
        .enqueue(&envelope(), Uuid::new_v4())
        .await
        .expect("enqueue should succeed");

    let stats = dispatcher.run_once().await.expect("pass should succeed");
    assert_eq!(stats.claimed, 1);
    assert_eq!(stats.delivered, 1);

    let rows = store.rows().await;
    assert!(rows[0].is_processed());
    assert_eq!(rows[0].processed_at, Some(clock.now()));
    assert_eq!(bus.published_of_type("SubscriptionActivated").len(), 1);
}

#[tokio::test]
async fn redelivers_until_broker_recovers() {
    let (store, bus, clock, dispatcher) = fixture();
    store
        .enqueue(&envelope(), Uuid::new_v4())
        .await
        .expect("enqueue should succeed");

    // Two passes hit a down broker; each reschedules with backoff.
    bus.fail_next_publishes(2);
    for expected_retries in 1..=2 {
        let stats = dispatcher.run_once().await.expect("pass should succeed");
        assert_eq!(stats.failed, 1);

        let row = &store.rows().await[0];
        assert_eq!(row.retry_count, expected_retries);
        assert!(row.error_message.is_some());
        assert!(row.next_retry_at.expect("backoff scheduled") > clock.now());

        // Not due again until the backoff elapses.
        clock.advance(chrono::Duration::hours(2));
    }

    // Broker is back: the row is eventually delivered.
    let stats = dispatcher.run_once().await.expect("pass should succeed");
    assert_eq!(stats.delivered, 1);
    assert!(store.rows().await[0].is_processed());
    assert_eq!(bus.published_of_type("SubscriptionActivated").len(), 1);
}

#[tokio::test]
async fn backoff_delays_redelivery() {
    let (store, bus, clock, dispatcher) = fixture();
    store
        .enqueue(&envelope(), Uuid::new_v4())
        .await
        .expect("enqueue should succeed");

    bus.fail_next_publishes(1);
    dispatcher.run_once().await.expect("pass should succeed");

    // Before the backoff elapses nothing is due.
    clock.advance(chrono::Duration::seconds(30));
    let stats = dispatcher.run_once().await.expect("pass should succeed");
    assert_eq!(stats.claimed, 0);

    // After it elapses the row is retried and delivered.
    clock.advance(chrono::Duration::seconds(31));
    let stats = dispatcher.run_once().await.expect("pass should succeed");
    assert_eq!(stats.delivered, 1);
}

#[tokio::test]
async fn exhausted_rows_are_kept_for_operators() {
    let (store, bus, clock, dispatcher) = fixture();
    store
        .enqueue(&envelope(), Uuid::new_v4())
        .await
        .expect("enqueue should succeed");

    let max_retries = store.rows().await[0].max_retry_count;
    bus.fail_next_publishes(usize::try_from(max_retries).expect("small count"));

    for _ in 0..max_retries {
        dispatcher.run_once().await.expect("pass should succeed");
        clock.advance(chrono::Duration::hours(2));
    }

    // The retry budget is spent: the row is never claimed again but stays
    // visible in the store.
    let stats = dispatcher.run_once().await.expect("pass should succeed");
    assert_eq!(stats.claimed, 0);
    assert_eq!(store.exhausted_count().await.expect("count"), 1);
    assert_eq!(store.pending_count().await, 1);
    assert!(bus.published().is_empty());
}

#[tokio::test]
async fn spawned_loop_drains_and_stops() {
    let (store, bus, _clock, dispatcher) = fixture();
    store
        .enqueue(&envelope(), Uuid::new_v4())
        .await
        .expect("enqueue should succeed");

    let handle = dispatcher.spawn();

    // The first pass runs immediately on spawn.
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop().await;

    assert_eq!(store.pending_count().await, 0);
    assert_eq!(bus.published_of_type("SubscriptionActivated").len(), 1);
}

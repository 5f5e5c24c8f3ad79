//! Cache-update handlers.
//!
//! One dedicated handler per authorization-relevant event, each touching
//! only its own field group via read-modify-write — a role change arriving
//! while a subscription change is being processed must not erase the
//! other's write. No other code path writes the cache.

use crate::events::{
    RefreshTokenRevoked, UserLoggedIn, UserLoggedOut, UserRolesChanged, UserStatusChanged,
    UserSubscriptionChanged,
};
use crate::state::UserState;
use crate::store::UserStateCache;
use lattice_core::environment::Clock;
use lattice_core::registry::{HandlerError, HandlerRegistry};
use std::sync::Arc;

/// Event types the cache consumes from the bus.
pub const USER_STATE_EVENT_TYPES: &[&str] = &[
    "UserLoggedIn",
    "UserLoggedOut",
    "UserRolesChanged",
    "UserStatusChanged",
    "RefreshTokenRevoked",
    "UserSubscriptionChanged",
];

fn to_handler_error(err: crate::store::CacheError) -> HandlerError {
    HandlerError::handler(err.to_string())
}

/// Subscribe the user-state cache handlers.
#[allow(clippy::too_many_lines)] // One subscription per event type, uniform shape
pub fn register_user_state_handlers<C>(
    registry: &mut HandlerRegistry,
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
) where
    C: UserStateCache,
{
    const HANDLER: &str = "user-state-cache";

    let c = Arc::clone(&cache);
    let clk = Arc::clone(&clock);
    registry.subscribe::<UserLoggedIn, _, _>(HANDLER, move |event| {
        let cache = Arc::clone(&c);
        let clock = Arc::clone(&clk);
        async move {
            let now = clock.now();

            // Login replaces the identity fields but must preserve the
            // subscription snapshot a concurrent handler may own.
            let subscription = cache
                .get_user_state(event.user_id)
                .await
                .map_err(to_handler_error)?
                .and_then(|existing| existing.subscription);

            let entry = UserState {
                user_id: event.user_id,
                user_profile_id: event.user_profile_id,
                email: event.email,
                roles: event.roles,
                status: event.status,
                refresh_token: Some(event.refresh_token),
                refresh_token_expires_at: Some(event.refresh_token_expires_at),
                last_login_at: Some(now),
                subscription,
                cache_updated_at: now,
            };

            cache.set_user_state(&entry).await.map_err(to_handler_error)
        }
    });

    let c = Arc::clone(&cache);
    registry.subscribe::<UserLoggedOut, _, _>(HANDLER, move |event| {
        let cache = Arc::clone(&c);
        async move {
            cache
                .remove_user_state(event.user_id)
                .await
                .map_err(to_handler_error)
        }
    });

    let c = Arc::clone(&cache);
    let clk = Arc::clone(&clock);
    registry.subscribe::<UserRolesChanged, _, _>(HANDLER, move |event| {
        let cache = Arc::clone(&c);
        let clock = Arc::clone(&clk);
        async move {
            cache
                .update_roles(event.user_id, event.roles, clock.now())
                .await
                .map_err(to_handler_error)
        }
    });

    let c = Arc::clone(&cache);
    let clk = Arc::clone(&clock);
    registry.subscribe::<UserStatusChanged, _, _>(HANDLER, move |event| {
        let cache = Arc::clone(&c);
        let clock = Arc::clone(&clk);
        async move {
            cache
                .update_status(event.user_id, event.status, clock.now())
                .await
                .map_err(to_handler_error)
        }
    });

    let c = Arc::clone(&cache);
    let clk = Arc::clone(&clock);
    registry.subscribe::<RefreshTokenRevoked, _, _>(HANDLER, move |event| {
        let cache = Arc::clone(&c);
        let clock = Arc::clone(&clk);
        async move {
            cache
                .revoke_refresh_token(event.user_id, clock.now())
                .await
                .map_err(to_handler_error)
        }
    });

    let c = Arc::clone(&cache);
    let clk = Arc::clone(&clock);
    registry.subscribe::<UserSubscriptionChanged, _, _>(HANDLER, move |event| {
        let cache = Arc::clone(&c);
        let clock = Arc::clone(&clk);
        async move {
            cache
                .update_subscription(event.user_id, event.subscription, clock.now())
                .await
                .map_err(to_handler_error)
        }
    });
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::memory::InMemoryUserStateCache;
    use crate::state::{SubscriptionStatus, UserStatus, UserSubscription};
    use lattice_core::event::EventEnvelope;
    use lattice_testing::test_clock;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn fixture() -> (HandlerRegistry, Arc<InMemoryUserStateCache>) {
        let cache = Arc::new(InMemoryUserStateCache::new());
        let mut registry = HandlerRegistry::new();
        register_user_state_handlers(&mut registry, Arc::clone(&cache), Arc::new(test_clock()));
        (registry, cache)
    }

    fn login_event(user_id: Uuid) -> UserLoggedIn {
        UserLoggedIn {
            user_id,
            user_profile_id: Some(Uuid::new_v4()),
            email: "a@b.com".to_string(),
            roles: BTreeSet::from(["User".to_string(), "Creator".to_string()]),
            status: UserStatus::Active,
            refresh_token: "tok-1".to_string(),
            refresh_token_expires_at: test_clock().now() + chrono::Duration::days(7),
        }
    }

    fn subscription() -> UserSubscription {
        UserSubscription {
            subscription_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            plan_name: "premium".to_string(),
            status: SubscriptionStatus::Active,
            current_period_start: Some(test_clock().now()),
            current_period_end: Some(test_clock().now() + chrono::Duration::days(30)),
        }
    }

    async fn deliver<E: lattice_core::event::IntegrationEvent>(
        registry: &HandlerRegistry,
        event: &E,
    ) {
        let envelope = EventEnvelope::encode(event).unwrap();
        let outcome = registry.dispatch(&envelope).await;
        assert!(matches!(
            outcome,
            lattice_core::registry::DispatchOutcome::Completed { failed: 0, .. }
        ));
    }

    #[tokio::test]
    async fn all_cache_event_types_are_wired() {
        let (registry, _cache) = fixture();
        registry
            .require(USER_STATE_EVENT_TYPES)
            .expect("all cache events should be wired");
    }

    #[tokio::test]
    async fn login_populates_the_snapshot() {
        let (registry, cache) = fixture();
        let user_id = Uuid::new_v4();

        deliver(&registry, &login_event(user_id)).await;

        assert!(cache.is_user_active(user_id).await.unwrap());
        assert!(cache.has_role(user_id, "creator").await.unwrap());
        assert!(
            cache
                .is_refresh_token_valid(user_id, "tok-1", test_clock().now())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn role_change_preserves_concurrent_subscription_write() {
        let (registry, cache) = fixture();
        let user_id = Uuid::new_v4();
        let now = test_clock().now();

        deliver(&registry, &login_event(user_id)).await;

        // Subscription handler writes its field group...
        deliver(
            &registry,
            &UserSubscriptionChanged {
                user_id,
                subscription: Some(subscription()),
            },
        )
        .await;

        // ...then a role change must not clobber it.
        deliver(
            &registry,
            &UserRolesChanged {
                user_id,
                roles: BTreeSet::from(["Admin".to_string()]),
            },
        )
        .await;

        assert!(cache.has_role(user_id, "Admin").await.unwrap());
        assert!(!cache.has_role(user_id, "User").await.unwrap());
        assert!(cache.has_active_subscription(user_id, now).await.unwrap());
    }

    #[tokio::test]
    async fn revoked_role_takes_effect_on_next_read() {
        let (registry, cache) = fixture();
        let user_id = Uuid::new_v4();

        deliver(&registry, &login_event(user_id)).await;
        assert!(cache.has_role(user_id, "Creator").await.unwrap());

        deliver(
            &registry,
            &UserRolesChanged {
                user_id,
                roles: BTreeSet::from(["User".to_string()]),
            },
        )
        .await;

        assert!(!cache.has_role(user_id, "Creator").await.unwrap());
        assert!(cache.has_role(user_id, "User").await.unwrap());
    }

    #[tokio::test]
    async fn logout_drops_the_snapshot_entirely() {
        let (registry, cache) = fixture();
        let user_id = Uuid::new_v4();

        deliver(&registry, &login_event(user_id)).await;
        deliver(&registry, &UserLoggedOut { user_id }).await;

        assert!(cache.get_user_state(user_id).await.unwrap().is_none());
        assert!(!cache.is_user_active(user_id).await.unwrap());
    }

    #[tokio::test]
    async fn token_revocation_keeps_identity_but_kills_the_session() {
        let (registry, cache) = fixture();
        let user_id = Uuid::new_v4();
        let now = test_clock().now();

        deliver(&registry, &login_event(user_id)).await;
        deliver(&registry, &RefreshTokenRevoked { user_id }).await;

        assert!(cache.is_user_active(user_id).await.unwrap());
        assert!(
            !cache
                .is_refresh_token_valid(user_id, "tok-1", now)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn status_change_suspends_authorization() {
        let (registry, cache) = fixture();
        let user_id = Uuid::new_v4();

        deliver(&registry, &login_event(user_id)).await;
        deliver(
            &registry,
            &UserStatusChanged {
                user_id,
                status: UserStatus::Suspended,
            },
        )
        .await;

        assert!(!cache.is_user_active(user_id).await.unwrap());
        assert!(!cache.has_role(user_id, "User").await.unwrap());
    }
}

//! In-memory user-state cache.
//!
//! Same contract as the Redis store, for single-process deployments,
//! local development, and tests.

use crate::state::{UserState, UserStatus, UserSubscription};
use crate::store::{Result, UserStateCache};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory [`UserStateCache`].
#[derive(Default)]
pub struct InMemoryUserStateCache {
    entries: RwLock<HashMap<Uuid, UserState>>,
}

impl InMemoryUserStateCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn modify<F>(&self, user_id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut UserState),
    {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&user_id) {
            Some(state) => apply(state),
            None => tracing::debug!(%user_id, "No cached state to update"),
        }
        Ok(())
    }
}

impl UserStateCache for InMemoryUserStateCache {
    async fn set_user_state(&self, state: &UserState) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(state.user_id, state.clone());
        Ok(())
    }

    async fn get_user_state(&self, user_id: Uuid) -> Result<Option<UserState>> {
        Ok(self.entries.read().await.get(&user_id).cloned())
    }

    async fn remove_user_state(&self, user_id: Uuid) -> Result<()> {
        self.entries.write().await.remove(&user_id);
        Ok(())
    }

    async fn is_user_active(&self, user_id: Uuid) -> Result<bool> {
        Ok(self
            .get_user_state(user_id)
            .await?
            .is_some_and(|state| state.is_active()))
    }

    async fn has_role(&self, user_id: Uuid, role: &str) -> Result<bool> {
        Ok(self
            .get_user_state(user_id)
            .await?
            .is_some_and(|state| state.is_active() && state.has_role(role)))
    }

    async fn is_refresh_token_valid(
        &self,
        user_id: Uuid,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.get_user_state(user_id).await?.is_some_and(|state| {
            state.is_active() && state.is_refresh_token_valid(token, now)
        }))
    }

    async fn has_active_subscription(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .get_user_state(user_id)
            .await?
            .is_some_and(|state| state.has_active_subscription(now)))
    }

    async fn update_roles(
        &self,
        user_id: Uuid,
        roles: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.modify(user_id, |state| state.apply_roles(roles, now))
            .await
    }

    async fn update_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.modify(user_id, |state| state.apply_status(status, now))
            .await
    }

    async fn update_subscription(
        &self,
        user_id: Uuid,
        subscription: Option<UserSubscription>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.modify(user_id, |state| state.apply_subscription(subscription, now))
            .await
    }

    async fn revoke_refresh_token(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.modify(user_id, |state| state.apply_token_revocation(now))
            .await
    }

    async fn active_users(&self) -> Result<Vec<UserState>> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|state| state.is_active())
            .cloned()
            .collect())
    }

    async fn cleanup_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let mut swept = 0usize;

        for state in entries.values_mut() {
            if state.has_expired_refresh_token(now) {
                state.apply_token_revocation(now);
                swept += 1;
            }
        }

        Ok(swept)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn entry(user_id: Uuid) -> UserState {
        UserState {
            user_id,
            user_profile_id: None,
            email: "a@b.com".to_string(),
            roles: BTreeSet::from(["User".to_string()]),
            status: UserStatus::Active,
            refresh_token: Some("tok".to_string()),
            refresh_token_expires_at: Some(now() + chrono::Duration::days(1)),
            last_login_at: Some(now()),
            subscription: None,
            cache_updated_at: now(),
        }
    }

    #[tokio::test]
    async fn miss_is_not_authorized() {
        let cache = InMemoryUserStateCache::new();
        let unknown = Uuid::new_v4();

        assert!(!cache.is_user_active(unknown).await.unwrap());
        assert!(!cache.has_role(unknown, "Admin").await.unwrap());
        assert!(!cache.is_refresh_token_valid(unknown, "tok", now()).await.unwrap());
        assert!(!cache.has_active_subscription(unknown, now()).await.unwrap());
    }

    #[tokio::test]
    async fn inactive_user_has_no_roles() {
        let cache = InMemoryUserStateCache::new();
        let user_id = Uuid::new_v4();
        cache.set_user_state(&entry(user_id)).await.unwrap();

        assert!(cache.has_role(user_id, "User").await.unwrap());

        cache
            .update_status(user_id, UserStatus::Suspended, now())
            .await
            .unwrap();
        assert!(!cache.has_role(user_id, "User").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_clears_only_expired_tokens() {
        let cache = InMemoryUserStateCache::new();

        let expired_user = Uuid::new_v4();
        let mut expired = entry(expired_user);
        expired.refresh_token_expires_at = Some(now() - chrono::Duration::minutes(1));
        cache.set_user_state(&expired).await.unwrap();

        let live_user = Uuid::new_v4();
        cache.set_user_state(&entry(live_user)).await.unwrap();

        assert_eq!(cache.cleanup_expired_tokens(now()).await.unwrap(), 1);
        assert!(
            cache
                .get_user_state(expired_user)
                .await
                .unwrap()
                .unwrap()
                .refresh_token
                .is_none()
        );
        assert!(
            cache
                .is_refresh_token_valid(live_user, "tok", now())
                .await
                .unwrap()
        );
    }
}

//! Redis-backed user-state cache.
//!
//! Layout:
//! - `user_state:{user_id}` → JSON-serialized [`UserState`]
//! - `active_users` (set) → user ids with a cached entry, for the
//!   monitoring scan and the token sweep
//!
//! Entries have no TTL: a live session must not silently lose its
//! authorization snapshot, and every relevant event fully refreshes its
//! field group. Stale refresh tokens are cleared by the periodic sweep
//! instead.

use crate::state::{UserState, UserStatus, UserSubscription};
use crate::store::{CacheError, Result, UserStateCache};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::BTreeSet;
use uuid::Uuid;

const ACTIVE_USERS_KEY: &str = "active_users";

/// User-state cache on Redis, shared by every service replica.
///
/// # Example
///
/// ```no_run
/// use lattice_cache::RedisUserStateCache;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = RedisUserStateCache::connect("redis://127.0.0.1:6379").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisUserStateCache {
    conn: ConnectionManager,
}

impl RedisUserStateCache {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] if the client cannot be created or
    /// the connection manager cannot be established.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Backend(format!("failed to create Redis client: {e}")))?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::Backend(format!("failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self { conn })
    }

    fn user_state_key(user_id: Uuid) -> String {
        format!("user_state:{user_id}")
    }

    async fn read(&self, user_id: Uuid) -> Result<Option<UserState>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::user_state_key(user_id))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        match raw {
            Some(json) => {
                let state = serde_json::from_str(&json)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                metrics::counter!("lattice.cache.hits").increment(1);
                Ok(Some(state))
            },
            None => {
                metrics::counter!("lattice.cache.misses").increment(1);
                Ok(None)
            },
        }
    }

    async fn write(&self, state: &UserState) -> Result<()> {
        let mut conn = self.conn.clone();
        let json =
            serde_json::to_string(state).map_err(|e| CacheError::Serialization(e.to_string()))?;

        let _: () = redis::pipe()
            .atomic()
            .set(Self::user_state_key(state.user_id), json)
            .sadd(ACTIVE_USERS_KEY, state.user_id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        tracing::debug!(user_id = %state.user_id, "User state cached");
        Ok(())
    }

    /// Read-modify-write of one entry; a missing entry is a logged no-op,
    /// matching the rule that only authoritative events create entries.
    async fn modify<F>(&self, user_id: Uuid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut UserState),
    {
        match self.read(user_id).await? {
            Some(mut state) => {
                apply(&mut state);
                self.write(&state).await
            },
            None => {
                tracing::debug!(%user_id, "No cached state to update");
                Ok(())
            },
        }
    }
}

impl UserStateCache for RedisUserStateCache {
    async fn set_user_state(&self, state: &UserState) -> Result<()> {
        self.write(state).await
    }

    async fn get_user_state(&self, user_id: Uuid) -> Result<Option<UserState>> {
        self.read(user_id).await
    }

    async fn remove_user_state(&self, user_id: Uuid) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(Self::user_state_key(user_id))
            .srem(ACTIVE_USERS_KEY, user_id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        tracing::debug!(%user_id, "User state removed");
        Ok(())
    }

    async fn is_user_active(&self, user_id: Uuid) -> Result<bool> {
        Ok(self
            .read(user_id)
            .await?
            .is_some_and(|state| state.is_active()))
    }

    async fn has_role(&self, user_id: Uuid, role: &str) -> Result<bool> {
        Ok(self
            .read(user_id)
            .await?
            .is_some_and(|state| state.is_active() && state.has_role(role)))
    }

    async fn is_refresh_token_valid(
        &self,
        user_id: Uuid,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.read(user_id).await?.is_some_and(|state| {
            state.is_active() && state.is_refresh_token_valid(token, now)
        }))
    }

    async fn has_active_subscription(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .read(user_id)
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
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(ACTIVE_USERS_KEY)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let mut users = Vec::new();
        for id in ids {
            let Ok(user_id) = id.parse::<Uuid>() else {
                tracing::warn!(member = %id, "Skipping malformed id in active-users set");
                continue;
            };
            if let Some(state) = self.read(user_id).await? {
                if state.is_active() {
                    users.push(state);
                }
            }
        }

        Ok(users)
    }

    async fn cleanup_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(ACTIVE_USERS_KEY)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let mut swept = 0usize;
        for id in ids {
            let Ok(user_id) = id.parse::<Uuid>() else {
                continue;
            };
            if let Some(state) = self.read(user_id).await? {
                if state.has_expired_refresh_token(now) {
                    self.modify(user_id, |s| s.apply_token_revocation(now))
                        .await?;
                    swept += 1;
                }
            }
        }

        if swept > 0 {
            tracing::info!(swept, "Expired refresh tokens cleared");
        }
        Ok(swept)
    }
}

//! Cache store abstraction for user authorization state.
//!
//! The read path backs every authorization check, so misses fail closed:
//! predicates return `false` for an unknown user, never an error the
//! caller might interpret as "allow". The write path is read-modify-write
//! per field group — a role change must not clobber a subscription written
//! by a concurrent handler.

use crate::state::{UserState, UserStatus, UserSubscription};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Errors from cache operations.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The cache backend failed.
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// A stored entry could not be (de)serialized.
    #[error("Cache serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Key/value store of per-user authorization snapshots.
///
/// Entries are written only in reaction to events (login, logout, role
/// change, status change, token revocation, subscription change) and read
/// on every authorization decision — no synchronous call to the identity
/// service sits on the request path.
pub trait UserStateCache: Send + Sync + 'static {
    /// Write a full entry. Used at login, when the authoritative snapshot
    /// is assembled; targeted updates cover everything else.
    fn set_user_state(&self, state: &UserState) -> impl Future<Output = Result<()>> + Send;

    /// Read an entry.
    fn get_user_state(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Option<UserState>>> + Send;

    /// Drop an entry entirely (logout, account deletion).
    fn remove_user_state(&self, user_id: Uuid) -> impl Future<Output = Result<()>> + Send;

    /// Whether the account may act. A miss is "not authorized".
    fn is_user_active(&self, user_id: Uuid) -> impl Future<Output = Result<bool>> + Send;

    /// Whether the account holds a role. A miss or inactive account is
    /// "not authorized".
    fn has_role(&self, user_id: Uuid, role: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Whether the presented refresh token is live.
    fn is_refresh_token_valid(
        &self,
        user_id: Uuid,
        token: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Whether an active subscription grants access.
    fn has_active_subscription(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Replace the role set, preserving every other field.
    fn update_roles(
        &self,
        user_id: Uuid,
        roles: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Replace the status, preserving every other field.
    fn update_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Replace the subscription snapshot, preserving every other field.
    fn update_subscription(
        &self,
        user_id: Uuid,
        subscription: Option<UserSubscription>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Drop the refresh token, preserving every other field.
    fn revoke_refresh_token(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Snapshot of all currently active users, for monitoring.
    fn active_users(&self) -> impl Future<Output = Result<Vec<UserState>>> + Send;

    /// Clear expired refresh tokens. Returns how many entries were swept.
    fn cleanup_expired_tokens(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<usize>> + Send;
}

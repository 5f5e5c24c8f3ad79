//! Authorization-relevant integration events.
//!
//! These are the only writers of the user-state cache: each event has a
//! dedicated handler performing a targeted read-modify-write of its own
//! field group (see [`handlers`](crate::handlers)).

use crate::state::{UserStatus, UserSubscription};
use chrono::{DateTime, Utc};
use lattice_core::event::IntegrationEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A user authenticated; carries the authoritative identity snapshot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserLoggedIn {
    /// The account that logged in.
    pub user_id: Uuid,
    /// Profile id, when already known.
    pub user_profile_id: Option<Uuid>,
    /// Account email.
    pub email: String,
    /// Roles at login time.
    pub roles: BTreeSet<String>,
    /// Status at login time.
    pub status: UserStatus,
    /// Refresh token issued for the session.
    pub refresh_token: String,
    /// When that token expires.
    pub refresh_token_expires_at: DateTime<Utc>,
}

impl IntegrationEvent for UserLoggedIn {
    const EVENT_TYPE: &'static str = "UserLoggedIn";
    const SOURCE_SERVICE: &'static str = "AuthService";
}

/// A user logged out; the cached snapshot is dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserLoggedOut {
    /// The account that logged out.
    pub user_id: Uuid,
}

impl IntegrationEvent for UserLoggedOut {
    const EVENT_TYPE: &'static str = "UserLoggedOut";
    const SOURCE_SERVICE: &'static str = "AuthService";
}

/// An admin changed a user's roles; effective on the next cache read,
/// not at token expiry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRolesChanged {
    /// The affected account.
    pub user_id: Uuid,
    /// The complete new role set.
    pub roles: BTreeSet<String>,
}

impl IntegrationEvent for UserRolesChanged {
    const EVENT_TYPE: &'static str = "UserRolesChanged";
    const SOURCE_SERVICE: &'static str = "AuthService";
}

/// A user's account status changed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserStatusChanged {
    /// The affected account.
    pub user_id: Uuid,
    /// The new status.
    pub status: UserStatus,
}

impl IntegrationEvent for UserStatusChanged {
    const EVENT_TYPE: &'static str = "UserStatusChanged";
    const SOURCE_SERVICE: &'static str = "AuthService";
}

/// A refresh token was revoked mid-session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshTokenRevoked {
    /// The affected account.
    pub user_id: Uuid,
}

impl IntegrationEvent for RefreshTokenRevoked {
    const EVENT_TYPE: &'static str = "RefreshTokenRevoked";
    const SOURCE_SERVICE: &'static str = "AuthService";
}

/// A user's subscription changed; `None` means no current subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserSubscriptionChanged {
    /// The affected account.
    pub user_id: Uuid,
    /// The new subscription snapshot.
    pub subscription: Option<UserSubscription>,
}

impl IntegrationEvent for UserSubscriptionChanged {
    const EVENT_TYPE: &'static str = "UserSubscriptionChanged";
    const SOURCE_SERVICE: &'static str = "SubscriptionService";
}

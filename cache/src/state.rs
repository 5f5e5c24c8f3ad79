//! Cached per-user authorization snapshot.
//!
//! One entry per user id, owned exclusively by event handlers and
//! in-service mutation calls — never by the HTTP layer. Authorization
//! predicates are pure derivations over the entry's fields; a missing
//! entry always means "not authorized".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Account lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    /// Account may authenticate and act.
    Active,
    /// Account disabled by the user or an operator.
    Inactive,
    /// Account locked pending review.
    Suspended,
    /// Account removed; retained for audit only.
    Deleted,
}

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionStatus {
    /// Created, first payment outstanding.
    Pending,
    /// Paid and current.
    Active,
    /// Payment overdue, in grace period.
    PastDue,
    /// Terminated by the user or for non-payment.
    Canceled,
    /// Temporarily paused by the user.
    Paused,
}

/// Cached subscription snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSubscription {
    /// Subscription id in the subscription service.
    pub subscription_id: Uuid,
    /// The subscribed plan.
    pub plan_id: Uuid,
    /// Plan name for display and logs.
    pub plan_name: String,
    /// Lifecycle status.
    pub status: SubscriptionStatus,
    /// Start of the paid period.
    pub current_period_start: Option<DateTime<Utc>>,
    /// End of the paid period.
    pub current_period_end: Option<DateTime<Utc>>,
}

impl UserSubscription {
    /// Whether the subscription currently grants access.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && self.current_period_end.is_none_or(|end| end > now)
    }
}

/// Cached authorization state for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserState {
    /// Auth-service account id; the cache key.
    pub user_id: Uuid,
    /// Profile id in the user service, once known.
    pub user_profile_id: Option<Uuid>,
    /// Account email.
    pub email: String,
    /// Granted roles. A set — order is irrelevant.
    pub roles: BTreeSet<String>,
    /// Account status.
    pub status: UserStatus,
    /// Current refresh token, if a session is live.
    pub refresh_token: Option<String>,
    /// When the refresh token expires.
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    /// Last successful login.
    pub last_login_at: Option<DateTime<Utc>>,
    /// Subscription snapshot, maintained by subscription events.
    pub subscription: Option<UserSubscription>,
    /// When any handler last wrote this entry.
    pub cache_updated_at: DateTime<Utc>,
}

impl UserState {
    /// Whether the account may act at all.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Whether the account holds a role (case-insensitive).
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    /// Whether the given refresh token is the live, unexpired one.
    #[must_use]
    pub fn is_refresh_token_valid(&self, token: &str, now: DateTime<Utc>) -> bool {
        self.refresh_token.as_deref() == Some(token)
            && self.refresh_token_expires_at.is_some_and(|at| at > now)
    }

    /// Whether an active subscription grants access right now.
    #[must_use]
    pub fn has_active_subscription(&self, now: DateTime<Utc>) -> bool {
        self.subscription.as_ref().is_some_and(|s| s.is_active(now))
    }

    /// Whether the stored refresh token exists but has expired.
    #[must_use]
    pub fn has_expired_refresh_token(&self, now: DateTime<Utc>) -> bool {
        self.refresh_token.is_some()
            && self.refresh_token_expires_at.is_none_or(|at| at <= now)
    }

    // Targeted field-group updates, shared by every cache backend. Each
    // touches only its own fields so concurrent handlers for different
    // events never clobber each other's writes.

    /// Replace the role set.
    pub fn apply_roles(&mut self, roles: BTreeSet<String>, now: DateTime<Utc>) {
        self.roles = roles;
        self.cache_updated_at = now;
    }

    /// Replace the account status.
    pub fn apply_status(&mut self, status: UserStatus, now: DateTime<Utc>) {
        self.status = status;
        self.cache_updated_at = now;
    }

    /// Replace the subscription snapshot.
    pub fn apply_subscription(
        &mut self,
        subscription: Option<UserSubscription>,
        now: DateTime<Utc>,
    ) {
        self.subscription = subscription;
        self.cache_updated_at = now;
    }

    /// Drop the refresh token, ending the session on next check.
    pub fn apply_token_revocation(&mut self, now: DateTime<Utc>) {
        self.refresh_token = None;
        self.refresh_token_expires_at = None;
        self.cache_updated_at = now;
    }
}

//! Persistent saga state rows.
//!
//! One row per correlation id. Transitions are strictly forward except to
//! the terminal `Failed` state, and a row in a terminal state ignores all
//! further events for its correlation id — that rule is what makes
//! duplicate and out-of-order delivery safe.

use crate::store::SagaRow;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// A state name that does not belong to the workflow.
#[derive(Error, Debug, Clone)]
#[error("Unknown saga state: {0}")]
pub struct UnknownState(pub String);

/// States of the user-registration workflow.
///
/// Forward path: `Started → OtpSent → OtpVerified → AuthUserCreated →
/// UserProfileCreated` (terminal success). Any non-terminal state can move
/// to `Failed` (terminal) on timeout or an explicit failure event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Workflow accepted, waiting for the OTP to be delivered.
    Started,
    /// OTP delivered, waiting for the user to verify it.
    OtpSent,
    /// OTP verified, waiting for the auth account.
    OtpVerified,
    /// Auth account exists, waiting for the profile.
    AuthUserCreated,
    /// Terminal success.
    UserProfileCreated,
    /// Terminal failure, compensated as far as the workflow progressed.
    Failed,
}

impl RegistrationState {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "Started",
            Self::OtpSent => "OtpSent",
            Self::OtpVerified => "OtpVerified",
            Self::AuthUserCreated => "AuthUserCreated",
            Self::UserProfileCreated => "UserProfileCreated",
            Self::Failed => "Failed",
        }
    }

    /// Parse the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownState`] for a name outside the workflow.
    pub fn parse(s: &str) -> Result<Self, UnknownState> {
        match s {
            "Started" => Ok(Self::Started),
            "OtpSent" => Ok(Self::OtpSent),
            "OtpVerified" => Ok(Self::OtpVerified),
            "AuthUserCreated" => Ok(Self::AuthUserCreated),
            "UserProfileCreated" => Ok(Self::UserProfileCreated),
            "Failed" => Ok(Self::Failed),
            other => Err(UnknownState(other.to_string())),
        }
    }

    /// Whether the state accepts no further events.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::UserProfileCreated | Self::Failed)
    }
}

/// Persistent state of one registration workflow instance.
#[derive(Debug, Clone)]
pub struct RegistrationSagaState {
    /// Workflow correlation id, the row's primary key.
    pub correlation_id: Uuid,
    /// Current state.
    pub current_state: RegistrationState,

    /// Account email.
    pub email: String,
    /// Password, already encrypted by the auth service.
    pub encrypted_password: String,
    /// Display name.
    pub full_name: String,
    /// Contact number for OTP fallback.
    pub phone_number: String,

    /// Milestones.
    pub started_at: DateTime<Utc>,
    /// When the OTP was delivered.
    pub otp_sent_at: Option<DateTime<Utc>>,
    /// When the OTP was verified.
    pub otp_verified_at: Option<DateTime<Utc>>,
    /// When the auth account was created.
    pub auth_user_created_at: Option<DateTime<Utc>>,
    /// When the profile was created.
    pub user_profile_created_at: Option<DateTime<Utc>>,
    /// When the workflow reached terminal success.
    pub completed_at: Option<DateTime<Utc>>,

    /// Account id assigned by the auth service.
    pub auth_user_id: Option<Uuid>,
    /// Profile id assigned by the user service.
    pub user_profile_id: Option<Uuid>,

    /// Why the workflow failed, when it did.
    pub error_message: Option<String>,
    /// Terminal-success flag, mirrors `current_state`.
    pub is_completed: bool,
    /// Terminal-failure flag, mirrors `current_state`.
    pub is_failed: bool,

    /// Token correlating the scheduled timeout to this instance. A firing
    /// with a different token is stale and ignored.
    pub timeout_token_id: Option<Uuid>,
    /// When the scheduled timeout becomes due.
    pub timeout_at: Option<DateTime<Utc>>,
}

impl RegistrationSagaState {
    /// Arm a fresh timeout, invalidating any previously scheduled one.
    pub fn arm_timeout(&mut self, token_id: Uuid, at: DateTime<Utc>) {
        self.timeout_token_id = Some(token_id);
        self.timeout_at = Some(at);
    }

    /// Disarm the scheduled timeout.
    pub const fn disarm_timeout(&mut self) {
        self.timeout_token_id = None;
        self.timeout_at = None;
    }
}

impl SagaRow for RegistrationSagaState {
    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn is_terminal(&self) -> bool {
        self.current_state.is_terminal()
    }

    fn timeout_token(&self) -> Option<(Uuid, DateTime<Utc>)> {
        self.timeout_token_id.zip(self.timeout_at)
    }
}

/// States of the admin-initiated user creation workflow.
///
/// Forward path: `Started → AuthUserCreated → ProfileBound` (terminal
/// success); `Failed` is the terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCreationState {
    /// Workflow accepted, waiting for the auth account.
    Started,
    /// Auth account exists, waiting for the profile to be bound.
    AuthUserCreated,
    /// Terminal success.
    ProfileBound,
    /// Terminal failure.
    Failed,
}

impl AdminCreationState {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "Started",
            Self::AuthUserCreated => "AuthUserCreated",
            Self::ProfileBound => "ProfileBound",
            Self::Failed => "Failed",
        }
    }

    /// Parse the database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownState`] for a name outside the workflow.
    pub fn parse(s: &str) -> Result<Self, UnknownState> {
        match s {
            "Started" => Ok(Self::Started),
            "AuthUserCreated" => Ok(Self::AuthUserCreated),
            "ProfileBound" => Ok(Self::ProfileBound),
            "Failed" => Ok(Self::Failed),
            other => Err(UnknownState(other.to_string())),
        }
    }

    /// Whether the state accepts no further events.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::ProfileBound | Self::Failed)
    }
}

/// Persistent state of one admin-initiated creation instance.
#[derive(Debug, Clone)]
pub struct AdminCreationSagaState {
    /// Workflow correlation id, the row's primary key.
    pub correlation_id: Uuid,
    /// Current state.
    pub current_state: AdminCreationState,

    /// Account email.
    pub email: String,
    /// Password, already encrypted.
    pub encrypted_password: String,
    /// Display name.
    pub full_name: String,
    /// Role granted by the admin.
    pub role: String,

    /// The pre-created pending profile.
    pub user_profile_id: Uuid,
    /// Account id assigned by the auth service.
    pub auth_user_id: Option<Uuid>,

    /// Milestones.
    pub started_at: DateTime<Utc>,
    /// When the auth account was created.
    pub auth_user_created_at: Option<DateTime<Utc>>,
    /// When the workflow reached terminal success.
    pub completed_at: Option<DateTime<Utc>>,

    /// Why the workflow failed, when it did.
    pub error_message: Option<String>,
    /// Terminal-success flag, mirrors `current_state`.
    pub is_completed: bool,
    /// Terminal-failure flag, mirrors `current_state`.
    pub is_failed: bool,

    /// Token correlating the scheduled timeout to this instance.
    pub timeout_token_id: Option<Uuid>,
    /// When the scheduled timeout becomes due.
    pub timeout_at: Option<DateTime<Utc>>,
}

impl AdminCreationSagaState {
    /// Arm a fresh timeout, invalidating any previously scheduled one.
    pub fn arm_timeout(&mut self, token_id: Uuid, at: DateTime<Utc>) {
        self.timeout_token_id = Some(token_id);
        self.timeout_at = Some(at);
    }

    /// Disarm the scheduled timeout.
    pub const fn disarm_timeout(&mut self) {
        self.timeout_token_id = None;
        self.timeout_at = None;
    }
}

impl SagaRow for AdminCreationSagaState {
    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn is_terminal(&self) -> bool {
        self.current_state.is_terminal()
    }

    fn timeout_token(&self) -> Option<(Uuid, DateTime<Utc>)> {
        self.timeout_token_id.zip(self.timeout_at)
    }
}

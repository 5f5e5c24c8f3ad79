//! Event and command contracts for the cross-service workflows.
//!
//! Commands are published by the saga and consumed by exactly one service;
//! response events flow back to the saga keyed by the workflow's
//! correlation id. Field names are part of the cross-service contract —
//! additive changes only.
//!
//! Response events carry a `success` flag plus an optional error message,
//! so a downstream service can fail a step explicitly instead of letting
//! the saga's timeout fire.

use lattice_core::event::IntegrationEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ===== Registration workflow =====

/// Starts the user-registration workflow. Published by the auth service
/// when a registration request is accepted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationStarted {
    /// Workflow correlation id, also the saga's primary key.
    pub correlation_id: Uuid,
    /// Address the account is registered under.
    pub email: String,
    /// Password, already encrypted by the auth service.
    pub encrypted_password: String,
    /// Display name.
    pub full_name: String,
    /// Contact number for OTP fallback.
    pub phone_number: String,
}

impl IntegrationEvent for RegistrationStarted {
    const EVENT_TYPE: &'static str = "RegistrationStarted";
    const SOURCE_SERVICE: &'static str = "AuthService";
}

/// Command to deliver the registration OTP. Consumed by the notification
/// service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendOtpNotification {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Address or number to deliver the OTP to.
    pub contact: String,
    /// Recipient display name.
    pub full_name: String,
    /// Minutes until the OTP expires.
    pub expires_in_minutes: i64,
}

impl IntegrationEvent for SendOtpNotification {
    const EVENT_TYPE: &'static str = "SendOtpNotification";
    const SOURCE_SERVICE: &'static str = "RegistrationSaga";
}

/// The OTP was (or could not be) sent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OtpSent {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Whether delivery succeeded.
    pub success: bool,
    /// Failure detail when `success` is false.
    pub error_message: Option<String>,
}

impl IntegrationEvent for OtpSent {
    const EVENT_TYPE: &'static str = "OtpSent";
    const SOURCE_SERVICE: &'static str = "NotificationService";
}

/// The user entered the correct OTP.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OtpVerified {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
}

impl IntegrationEvent for OtpVerified {
    const EVENT_TYPE: &'static str = "OtpVerified";
    const SOURCE_SERVICE: &'static str = "AuthService";
}

/// Command to create the account in the auth service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateAuthUser {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Account email.
    pub email: String,
    /// Password, already encrypted.
    pub encrypted_password: String,
    /// Display name.
    pub full_name: String,
}

impl IntegrationEvent for CreateAuthUser {
    const EVENT_TYPE: &'static str = "CreateAuthUser";
    const SOURCE_SERVICE: &'static str = "RegistrationSaga";
}

/// The auth service created (or failed to create) the account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthUserCreated {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Id of the created account; nil placeholder on failure.
    pub user_id: Uuid,
    /// Whether creation succeeded.
    pub success: bool,
    /// Failure detail when `success` is false.
    pub error_message: Option<String>,
}

impl IntegrationEvent for AuthUserCreated {
    const EVENT_TYPE: &'static str = "AuthUserCreated";
    const SOURCE_SERVICE: &'static str = "AuthService";
}

/// Command to create the profile in the user service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateUserProfile {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// The auth account the profile belongs to.
    pub user_id: Uuid,
    /// Account email.
    pub email: String,
    /// Display name.
    pub full_name: String,
}

impl IntegrationEvent for CreateUserProfile {
    const EVENT_TYPE: &'static str = "CreateUserProfile";
    const SOURCE_SERVICE: &'static str = "RegistrationSaga";
}

/// The user service created (or failed to create) the profile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserProfileCreated {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Id of the created profile; nil placeholder on failure.
    pub user_profile_id: Uuid,
    /// The auth account the profile belongs to.
    pub user_id: Uuid,
    /// Whether creation succeeded.
    pub success: bool,
    /// Failure detail when `success` is false.
    pub error_message: Option<String>,
}

impl IntegrationEvent for UserProfileCreated {
    const EVENT_TYPE: &'static str = "UserProfileCreated";
    const SOURCE_SERVICE: &'static str = "UserService";
}

/// Compensating command: remove an auth account created by a workflow
/// whose later step failed. Deleting an already-deleted account succeeds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteAuthUser {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Account to remove.
    pub user_id: Uuid,
    /// Why the compensation ran.
    pub reason: String,
}

impl IntegrationEvent for DeleteAuthUser {
    const EVENT_TYPE: &'static str = "DeleteAuthUser";
    const SOURCE_SERVICE: &'static str = "RegistrationSaga";
}

/// Compensation acknowledgment from the auth service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthUserDeleted {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Account that was removed (or already absent).
    pub user_id: Uuid,
}

impl IntegrationEvent for AuthUserDeleted {
    const EVENT_TYPE: &'static str = "AuthUserDeleted";
    const SOURCE_SERVICE: &'static str = "AuthService";
}

/// Terminal success announcement for the registration workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationCompleted {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// The created auth account.
    pub user_id: Uuid,
    /// Account email.
    pub email: String,
}

impl IntegrationEvent for RegistrationCompleted {
    const EVENT_TYPE: &'static str = "RegistrationCompleted";
    const SOURCE_SERVICE: &'static str = "RegistrationSaga";
}

/// Terminal failure announcement for the registration workflow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationFailed {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Account email.
    pub email: String,
    /// Why the workflow failed.
    pub error_message: String,
}

impl IntegrationEvent for RegistrationFailed {
    const EVENT_TYPE: &'static str = "RegistrationFailed";
    const SOURCE_SERVICE: &'static str = "RegistrationSaga";
}

/// Durable timeout redelivery for a registration saga instance.
///
/// Produced by the timeout sweeper, never by another service. The token
/// ties the firing to the schedule that created it: a stale token is a
/// no-op.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationTimedOut {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// The schedule this firing belongs to.
    pub timeout_token_id: Uuid,
}

impl IntegrationEvent for RegistrationTimedOut {
    const EVENT_TYPE: &'static str = "RegistrationTimedOut";
    const SOURCE_SERVICE: &'static str = "RegistrationSaga";
}

// ===== Admin-initiated user creation workflow =====

/// Starts the admin-initiated user creation workflow. Published by the
/// user service after the admin's request pre-created a pending profile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminUserCreationStarted {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Account email.
    pub email: String,
    /// Password, already encrypted.
    pub encrypted_password: String,
    /// Display name.
    pub full_name: String,
    /// Role granted by the admin.
    pub role: String,
    /// The pre-created pending profile awaiting its auth account.
    pub user_profile_id: Uuid,
}

impl IntegrationEvent for AdminUserCreationStarted {
    const EVENT_TYPE: &'static str = "AdminUserCreationStarted";
    const SOURCE_SERVICE: &'static str = "UserService";
}

/// Command to create the auth account for an admin-created user.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateAuthUserByAdmin {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Account email.
    pub email: String,
    /// Password, already encrypted.
    pub encrypted_password: String,
    /// Display name.
    pub full_name: String,
    /// Role granted by the admin.
    pub role: String,
}

impl IntegrationEvent for CreateAuthUserByAdmin {
    const EVENT_TYPE: &'static str = "CreateAuthUserByAdmin";
    const SOURCE_SERVICE: &'static str = "AdminUserCreationSaga";
}

/// The auth service created (or failed to create) the admin-requested
/// account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthUserCreatedByAdmin {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Id of the created account; nil placeholder on failure.
    pub user_id: Uuid,
    /// Whether creation succeeded.
    pub success: bool,
    /// Failure detail when `success` is false.
    pub error_message: Option<String>,
}

impl IntegrationEvent for AuthUserCreatedByAdmin {
    const EVENT_TYPE: &'static str = "AuthUserCreatedByAdmin";
    const SOURCE_SERVICE: &'static str = "AuthService";
}

/// Command to bind the pre-created profile to its new auth account,
/// flipping it from pending to active.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BindUserProfile {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// The pending profile.
    pub user_profile_id: Uuid,
    /// The auth account to bind it to.
    pub user_id: Uuid,
}

impl IntegrationEvent for BindUserProfile {
    const EVENT_TYPE: &'static str = "BindUserProfile";
    const SOURCE_SERVICE: &'static str = "AdminUserCreationSaga";
}

/// The user service bound (or failed to bind) the profile.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserProfileBound {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// The bound profile.
    pub user_profile_id: Uuid,
    /// Whether binding succeeded.
    pub success: bool,
    /// Failure detail when `success` is false.
    pub error_message: Option<String>,
}

impl IntegrationEvent for UserProfileBound {
    const EVENT_TYPE: &'static str = "UserProfileBound";
    const SOURCE_SERVICE: &'static str = "UserService";
}

/// Compensating command: remove the auth account when the profile could
/// not be bound.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteAuthUserByAdmin {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// Account to remove.
    pub user_id: Uuid,
    /// Why the compensation ran.
    pub reason: String,
}

impl IntegrationEvent for DeleteAuthUserByAdmin {
    const EVENT_TYPE: &'static str = "DeleteAuthUserByAdmin";
    const SOURCE_SERVICE: &'static str = "AdminUserCreationSaga";
}

/// Durable timeout redelivery for an admin-creation saga instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminUserCreationTimedOut {
    /// Workflow correlation id.
    pub correlation_id: Uuid,
    /// The schedule this firing belongs to.
    pub timeout_token_id: Uuid,
}

impl IntegrationEvent for AdminUserCreationTimedOut {
    const EVENT_TYPE: &'static str = "AdminUserCreationTimedOut";
    const SOURCE_SERVICE: &'static str = "AdminUserCreationSaga";
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use lattice_core::event::EventEnvelope;

    #[test]
    fn event_types_match_wire_names() {
        assert_eq!(RegistrationStarted::EVENT_TYPE, "RegistrationStarted");
        assert_eq!(CreateAuthUser::EVENT_TYPE, "CreateAuthUser");
        assert_eq!(DeleteAuthUser::EVENT_TYPE, "DeleteAuthUser");
        assert_eq!(BindUserProfile::EVENT_TYPE, "BindUserProfile");
    }

    #[test]
    fn correlation_id_travels_in_payload() {
        let correlation_id = Uuid::new_v4();
        let envelope = EventEnvelope::encode(&OtpVerified { correlation_id })
            .expect("encode should succeed");

        assert_eq!(
            envelope.payload["correlation_id"],
            serde_json::json!(correlation_id)
        );

        let decoded: OtpVerified = envelope.decode().expect("decode should succeed");
        assert_eq!(decoded.correlation_id, correlation_id);
    }
}

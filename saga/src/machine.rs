//! Transition function for the user-registration workflow.
//!
//! ```text
//!            RegistrationStarted
//!                    │  publish SendOtpNotification, arm timeout
//!                    ▼
//!                 Started
//!                    │  OtpSent(success)
//!                    ▼
//!                 OtpSent
//!                    │  OtpVerified → publish CreateAuthUser
//!                    ▼
//!               OtpVerified
//!                    │  AuthUserCreated(success) → publish CreateUserProfile
//!                    ▼
//!             AuthUserCreated
//!                    │  UserProfileCreated(success) → publish RegistrationCompleted
//!                    ▼
//!           UserProfileCreated (terminal)
//!
//! Any waiting state: timeout firing or an explicit failure event moves
//! the instance to Failed (terminal), deleting the auth account if one was
//! already created and publishing RegistrationFailed.
//! ```
//!
//! Each waiting state arms a fresh timeout token; the event that advances
//! the saga invalidates the previous token, so a timeout that lost the
//! race arrives with a stale token and is ignored.

use crate::events::{
    AuthUserCreated, CreateAuthUser, CreateUserProfile, DeleteAuthUser, OtpSent, OtpVerified,
    RegistrationCompleted, RegistrationFailed, RegistrationStarted, RegistrationTimedOut,
    SendOtpNotification, UserProfileCreated,
};
use crate::orchestrator::{Decision, Workflow};
use crate::state::{RegistrationSagaState, RegistrationState};
use crate::store::SagaError;
use chrono::{DateTime, Utc};
use lattice_core::event::EventEnvelope;
use std::time::Duration;
use uuid::Uuid;

/// Events the registration saga reacts to.
#[derive(Clone, Debug)]
pub enum RegistrationEvent {
    /// Workflow start request.
    Started(RegistrationStarted),
    /// OTP delivery result.
    OtpSent(OtpSent),
    /// OTP verification by the user.
    OtpVerified(OtpVerified),
    /// Auth-account creation result.
    AuthUserCreated(AuthUserCreated),
    /// Profile creation result.
    UserProfileCreated(UserProfileCreated),
    /// Durable timeout firing.
    TimedOut(RegistrationTimedOut),
}

/// The registration workflow's transition function.
pub struct RegistrationWorkflow {
    /// Deadline applied to every waiting state.
    pub step_timeout: Duration,
}

impl Default for RegistrationWorkflow {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl RegistrationWorkflow {
    fn deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.step_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(5))
    }

    fn fail(
        row: &RegistrationSagaState,
        now: DateTime<Utc>,
        error_message: String,
    ) -> Result<Decision<RegistrationSagaState>, SagaError> {
        let mut state = row.clone();
        state.current_state = RegistrationState::Failed;
        state.error_message = Some(error_message.clone());
        state.is_failed = true;
        state.disarm_timeout();

        let mut commands = Vec::new();

        // Compensate as far as the workflow progressed. Deleting an
        // already-deleted account succeeds, so duplicate compensation is
        // harmless.
        if let Some(user_id) = state.auth_user_id {
            commands.push(EventEnvelope::encode_at(
                &DeleteAuthUser {
                    correlation_id: state.correlation_id,
                    user_id,
                    reason: error_message.clone(),
                },
                now,
            )?);
        }

        commands.push(EventEnvelope::encode_at(
            &RegistrationFailed {
                correlation_id: state.correlation_id,
                email: state.email.clone(),
                error_message,
            },
            now,
        )?);

        Ok(Decision::Transition { state, commands })
    }
}

impl Workflow for RegistrationWorkflow {
    type Event = RegistrationEvent;
    type State = RegistrationSagaState;

    const NAME: &'static str = "registration";

    fn correlation_id(event: &Self::Event) -> Uuid {
        match event {
            RegistrationEvent::Started(e) => e.correlation_id,
            RegistrationEvent::OtpSent(e) => e.correlation_id,
            RegistrationEvent::OtpVerified(e) => e.correlation_id,
            RegistrationEvent::AuthUserCreated(e) => e.correlation_id,
            RegistrationEvent::UserProfileCreated(e) => e.correlation_id,
            RegistrationEvent::TimedOut(e) => e.correlation_id,
        }
    }

    fn event_name(event: &Self::Event) -> &'static str {
        match event {
            RegistrationEvent::Started(_) => "RegistrationStarted",
            RegistrationEvent::OtpSent(_) => "OtpSent",
            RegistrationEvent::OtpVerified(_) => "OtpVerified",
            RegistrationEvent::AuthUserCreated(_) => "AuthUserCreated",
            RegistrationEvent::UserProfileCreated(_) => "UserProfileCreated",
            RegistrationEvent::TimedOut(_) => "RegistrationTimedOut",
        }
    }

    fn timeout_event(correlation_id: Uuid, timeout_token_id: Uuid) -> Self::Event {
        RegistrationEvent::TimedOut(RegistrationTimedOut {
            correlation_id,
            timeout_token_id,
        })
    }

    #[allow(clippy::too_many_lines)] // The full transition table lives in one match
    fn decide(
        &self,
        state: Option<&Self::State>,
        event: Self::Event,
        now: DateTime<Utc>,
    ) -> Result<Decision<Self::State>, SagaError> {
        match (state, event) {
            // A new correlation id starts the workflow.
            (None, RegistrationEvent::Started(e)) => {
                let mut row = RegistrationSagaState {
                    correlation_id: e.correlation_id,
                    current_state: RegistrationState::Started,
                    email: e.email.clone(),
                    encrypted_password: e.encrypted_password,
                    full_name: e.full_name.clone(),
                    phone_number: e.phone_number,
                    started_at: now,
                    otp_sent_at: None,
                    otp_verified_at: None,
                    auth_user_created_at: None,
                    user_profile_created_at: None,
                    completed_at: None,
                    auth_user_id: None,
                    user_profile_id: None,
                    error_message: None,
                    is_completed: false,
                    is_failed: false,
                    timeout_token_id: None,
                    timeout_at: None,
                };
                row.arm_timeout(Uuid::new_v4(), self.deadline(now));

                #[allow(clippy::cast_possible_truncation)] // step timeouts are minutes, not eras
                let commands = vec![EventEnvelope::encode_at(
                    &SendOtpNotification {
                        correlation_id: e.correlation_id,
                        contact: e.email,
                        full_name: e.full_name,
                        expires_in_minutes: (self.step_timeout.as_secs() / 60) as i64,
                    },
                    now,
                )?];

                Ok(Decision::Transition {
                    state: row,
                    commands,
                })
            },

            // The saga is keyed by the business correlation id: a repeat
            // start for an existing instance is a duplicate, not a retry.
            (Some(_), RegistrationEvent::Started(_)) => Ok(Decision::Ignore {
                reason: "duplicate start for existing correlation id",
            }),

            (Some(row), RegistrationEvent::OtpSent(e))
                if row.current_state == RegistrationState::Started =>
            {
                if !e.success {
                    return Self::fail(
                        row,
                        now,
                        e.error_message
                            .unwrap_or_else(|| "OTP delivery failed".to_string()),
                    );
                }

                let mut state = row.clone();
                state.current_state = RegistrationState::OtpSent;
                state.otp_sent_at = Some(now);
                state.arm_timeout(Uuid::new_v4(), self.deadline(now));

                Ok(Decision::Transition {
                    state,
                    commands: Vec::new(),
                })
            },

            (Some(row), RegistrationEvent::OtpVerified(_))
                if row.current_state == RegistrationState::OtpSent =>
            {
                let mut state = row.clone();
                state.current_state = RegistrationState::OtpVerified;
                state.otp_verified_at = Some(now);
                state.arm_timeout(Uuid::new_v4(), self.deadline(now));

                let commands = vec![EventEnvelope::encode_at(
                    &CreateAuthUser {
                        correlation_id: state.correlation_id,
                        email: state.email.clone(),
                        encrypted_password: state.encrypted_password.clone(),
                        full_name: state.full_name.clone(),
                    },
                    now,
                )?];

                Ok(Decision::Transition { state, commands })
            },

            (Some(row), RegistrationEvent::AuthUserCreated(e))
                if row.current_state == RegistrationState::OtpVerified =>
            {
                if !e.success {
                    return Self::fail(
                        row,
                        now,
                        e.error_message
                            .unwrap_or_else(|| "auth user creation failed".to_string()),
                    );
                }

                let mut state = row.clone();
                state.current_state = RegistrationState::AuthUserCreated;
                state.auth_user_id = Some(e.user_id);
                state.auth_user_created_at = Some(now);
                state.arm_timeout(Uuid::new_v4(), self.deadline(now));

                let commands = vec![EventEnvelope::encode_at(
                    &CreateUserProfile {
                        correlation_id: state.correlation_id,
                        user_id: e.user_id,
                        email: state.email.clone(),
                        full_name: state.full_name.clone(),
                    },
                    now,
                )?];

                Ok(Decision::Transition { state, commands })
            },

            (Some(row), RegistrationEvent::UserProfileCreated(e))
                if row.current_state == RegistrationState::AuthUserCreated =>
            {
                if !e.success {
                    return Self::fail(
                        row,
                        now,
                        e.error_message
                            .unwrap_or_else(|| "user profile creation failed".to_string()),
                    );
                }

                let mut state = row.clone();
                state.current_state = RegistrationState::UserProfileCreated;
                state.user_profile_id = Some(e.user_profile_id);
                state.user_profile_created_at = Some(now);
                state.completed_at = Some(now);
                state.is_completed = true;
                state.disarm_timeout();

                let commands = vec![EventEnvelope::encode_at(
                    &RegistrationCompleted {
                        correlation_id: state.correlation_id,
                        user_id: state.auth_user_id.unwrap_or(e.user_id),
                        email: state.email.clone(),
                    },
                    now,
                )?];

                Ok(Decision::Transition { state, commands })
            },

            (Some(row), RegistrationEvent::TimedOut(e)) => {
                let armed = row
                    .timeout_token_id
                    .is_some_and(|token| token == e.timeout_token_id);
                if !armed {
                    return Ok(Decision::Ignore {
                        reason: "stale timeout token",
                    });
                }

                let step = match row.current_state {
                    RegistrationState::Started => "OTP delivery",
                    RegistrationState::OtpSent => "OTP verification",
                    RegistrationState::OtpVerified => "auth user creation",
                    RegistrationState::AuthUserCreated => "user profile creation",
                    RegistrationState::UserProfileCreated | RegistrationState::Failed => {
                        return Ok(Decision::Ignore {
                            reason: "timeout for terminal saga",
                        });
                    },
                };

                Self::fail(row, now, format!("{step} timed out"))
            },

            // Out-of-order or duplicate delivery: acknowledge and drop.
            (Some(_), _) => Ok(Decision::Ignore {
                reason: "event does not advance the current state",
            }),
            (None, _) => Ok(Decision::Ignore {
                reason: "no saga instance for correlation id",
            }),
        }
    }
}

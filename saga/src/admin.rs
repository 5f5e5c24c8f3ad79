//! Transition function for the admin-initiated user creation workflow.
//!
//! The admin's request pre-creates a pending profile in the user service,
//! then this saga creates the auth account and binds the profile to it:
//! `Started → AuthUserCreated → ProfileBound` (terminal success). If the
//! bind fails or a step times out after the account exists, the account is
//! deleted again so no orphaned login remains.

use crate::events::{
    AdminUserCreationStarted, AdminUserCreationTimedOut, AuthUserCreatedByAdmin, BindUserProfile,
    CreateAuthUserByAdmin, DeleteAuthUserByAdmin, UserProfileBound,
};
use crate::orchestrator::{Decision, Workflow};
use crate::state::{AdminCreationSagaState, AdminCreationState};
use crate::store::SagaError;
use chrono::{DateTime, Utc};
use lattice_core::event::EventEnvelope;
use std::time::Duration;
use uuid::Uuid;

/// Events the admin-creation saga reacts to.
#[derive(Clone, Debug)]
pub enum AdminCreationEvent {
    /// Workflow start request.
    Started(AdminUserCreationStarted),
    /// Auth-account creation result.
    AuthUserCreated(AuthUserCreatedByAdmin),
    /// Profile binding result.
    ProfileBound(UserProfileBound),
    /// Durable timeout firing.
    TimedOut(AdminUserCreationTimedOut),
}

/// The admin-creation workflow's transition function.
pub struct AdminCreationWorkflow {
    /// Deadline applied to every waiting state.
    pub step_timeout: Duration,
}

impl Default for AdminCreationWorkflow {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(5 * 60),
        }
    }
}

impl AdminCreationWorkflow {
    fn deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + chrono::Duration::from_std(self.step_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(5))
    }

    fn fail(
        row: &AdminCreationSagaState,
        now: DateTime<Utc>,
        error_message: String,
    ) -> Result<Decision<AdminCreationSagaState>, SagaError> {
        let mut state = row.clone();
        state.current_state = AdminCreationState::Failed;
        state.error_message = Some(error_message.clone());
        state.is_failed = true;
        state.disarm_timeout();

        let mut commands = Vec::new();
        if let Some(user_id) = state.auth_user_id {
            commands.push(EventEnvelope::encode_at(
                &DeleteAuthUserByAdmin {
                    correlation_id: state.correlation_id,
                    user_id,
                    reason: error_message,
                },
                now,
            )?);
        }

        Ok(Decision::Transition { state, commands })
    }
}

impl Workflow for AdminCreationWorkflow {
    type Event = AdminCreationEvent;
    type State = AdminCreationSagaState;

    const NAME: &'static str = "admin-user-creation";

    fn correlation_id(event: &Self::Event) -> Uuid {
        match event {
            AdminCreationEvent::Started(e) => e.correlation_id,
            AdminCreationEvent::AuthUserCreated(e) => e.correlation_id,
            AdminCreationEvent::ProfileBound(e) => e.correlation_id,
            AdminCreationEvent::TimedOut(e) => e.correlation_id,
        }
    }

    fn event_name(event: &Self::Event) -> &'static str {
        match event {
            AdminCreationEvent::Started(_) => "AdminUserCreationStarted",
            AdminCreationEvent::AuthUserCreated(_) => "AuthUserCreatedByAdmin",
            AdminCreationEvent::ProfileBound(_) => "UserProfileBound",
            AdminCreationEvent::TimedOut(_) => "AdminUserCreationTimedOut",
        }
    }

    fn timeout_event(correlation_id: Uuid, timeout_token_id: Uuid) -> Self::Event {
        AdminCreationEvent::TimedOut(AdminUserCreationTimedOut {
            correlation_id,
            timeout_token_id,
        })
    }

    fn decide(
        &self,
        state: Option<&Self::State>,
        event: Self::Event,
        now: DateTime<Utc>,
    ) -> Result<Decision<Self::State>, SagaError> {
        match (state, event) {
            (None, AdminCreationEvent::Started(e)) => {
                let mut row = AdminCreationSagaState {
                    correlation_id: e.correlation_id,
                    current_state: AdminCreationState::Started,
                    email: e.email.clone(),
                    encrypted_password: e.encrypted_password.clone(),
                    full_name: e.full_name.clone(),
                    role: e.role.clone(),
                    user_profile_id: e.user_profile_id,
                    auth_user_id: None,
                    started_at: now,
                    auth_user_created_at: None,
                    completed_at: None,
                    error_message: None,
                    is_completed: false,
                    is_failed: false,
                    timeout_token_id: None,
                    timeout_at: None,
                };
                row.arm_timeout(Uuid::new_v4(), self.deadline(now));

                let commands = vec![EventEnvelope::encode_at(
                    &CreateAuthUserByAdmin {
                        correlation_id: e.correlation_id,
                        email: e.email,
                        encrypted_password: e.encrypted_password,
                        full_name: e.full_name,
                        role: e.role,
                    },
                    now,
                )?];

                Ok(Decision::Transition {
                    state: row,
                    commands,
                })
            },

            (Some(_), AdminCreationEvent::Started(_)) => Ok(Decision::Ignore {
                reason: "duplicate start for existing correlation id",
            }),

            (Some(row), AdminCreationEvent::AuthUserCreated(e))
                if row.current_state == AdminCreationState::Started =>
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
                state.current_state = AdminCreationState::AuthUserCreated;
                state.auth_user_id = Some(e.user_id);
                state.auth_user_created_at = Some(now);
                state.arm_timeout(Uuid::new_v4(), self.deadline(now));

                let commands = vec![EventEnvelope::encode_at(
                    &BindUserProfile {
                        correlation_id: state.correlation_id,
                        user_profile_id: state.user_profile_id,
                        user_id: e.user_id,
                    },
                    now,
                )?];

                Ok(Decision::Transition { state, commands })
            },

            (Some(row), AdminCreationEvent::ProfileBound(e))
                if row.current_state == AdminCreationState::AuthUserCreated =>
            {
                if !e.success {
                    return Self::fail(
                        row,
                        now,
                        e.error_message
                            .unwrap_or_else(|| "profile binding failed".to_string()),
                    );
                }

                let mut state = row.clone();
                state.current_state = AdminCreationState::ProfileBound;
                state.completed_at = Some(now);
                state.is_completed = true;
                state.disarm_timeout();

                Ok(Decision::Transition {
                    state,
                    commands: Vec::new(),
                })
            },

            (Some(row), AdminCreationEvent::TimedOut(e)) => {
                let armed = row
                    .timeout_token_id
                    .is_some_and(|token| token == e.timeout_token_id);
                if !armed {
                    return Ok(Decision::Ignore {
                        reason: "stale timeout token",
                    });
                }

                let step = match row.current_state {
                    AdminCreationState::Started => "auth user creation",
                    AdminCreationState::AuthUserCreated => "profile binding",
                    AdminCreationState::ProfileBound | AdminCreationState::Failed => {
                        return Ok(Decision::Ignore {
                            reason: "timeout for terminal saga",
                        });
                    },
                };

                Self::fail(row, now, format!("{step} timed out"))
            },

            (Some(_), _) => Ok(Decision::Ignore {
                reason: "event does not advance the current state",
            }),
            (None, _) => Ok(Decision::Ignore {
                reason: "no saga instance for correlation id",
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn started(correlation_id: Uuid, profile_id: Uuid) -> AdminCreationEvent {
        AdminCreationEvent::Started(AdminUserCreationStarted {
            correlation_id,
            email: "staff@b.com".to_string(),
            encrypted_password: "enc".to_string(),
            full_name: "Grace".to_string(),
            role: "Moderator".to_string(),
            user_profile_id: profile_id,
        })
    }

    fn transition(
        workflow: &AdminCreationWorkflow,
        state: Option<&AdminCreationSagaState>,
        event: AdminCreationEvent,
    ) -> (AdminCreationSagaState, Vec<EventEnvelope>) {
        match workflow.decide(state, event, now()).unwrap() {
            Decision::Transition { state, commands } => (state, commands),
            Decision::Ignore { reason } => panic!("unexpected ignore: {reason}"),
        }
    }

    #[test]
    fn start_requests_auth_account() {
        let workflow = AdminCreationWorkflow::default();
        let correlation_id = Uuid::new_v4();
        let profile_id = Uuid::new_v4();

        let (row, commands) = transition(&workflow, None, started(correlation_id, profile_id));
        assert_eq!(row.current_state, AdminCreationState::Started);
        assert_eq!(row.user_profile_id, profile_id);
        assert!(row.timeout_token_id.is_some());
        assert_eq!(commands[0].event_type, "CreateAuthUserByAdmin");
    }

    #[test]
    fn happy_path_binds_the_pending_profile() {
        let workflow = AdminCreationWorkflow::default();
        let correlation_id = Uuid::new_v4();
        let profile_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let (row, _) = transition(&workflow, None, started(correlation_id, profile_id));
        let (row, commands) = transition(
            &workflow,
            Some(&row),
            AdminCreationEvent::AuthUserCreated(AuthUserCreatedByAdmin {
                correlation_id,
                user_id,
                success: true,
                error_message: None,
            }),
        );
        assert_eq!(row.current_state, AdminCreationState::AuthUserCreated);
        let bind: BindUserProfile = commands[0].decode().unwrap();
        assert_eq!(bind.user_profile_id, profile_id);
        assert_eq!(bind.user_id, user_id);

        let (row, commands) = transition(
            &workflow,
            Some(&row),
            AdminCreationEvent::ProfileBound(UserProfileBound {
                correlation_id,
                user_profile_id: profile_id,
                success: true,
                error_message: None,
            }),
        );
        assert_eq!(row.current_state, AdminCreationState::ProfileBound);
        assert!(row.is_completed);
        assert!(commands.is_empty());
    }

    #[test]
    fn failed_bind_deletes_the_auth_account() {
        let workflow = AdminCreationWorkflow::default();
        let correlation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        let (row, _) = transition(&workflow, None, started(correlation_id, Uuid::new_v4()));
        let (row, _) = transition(
            &workflow,
            Some(&row),
            AdminCreationEvent::AuthUserCreated(AuthUserCreatedByAdmin {
                correlation_id,
                user_id,
                success: true,
                error_message: None,
            }),
        );

        let (row, commands) = transition(
            &workflow,
            Some(&row),
            AdminCreationEvent::ProfileBound(UserProfileBound {
                correlation_id,
                user_profile_id: row.user_profile_id,
                success: false,
                error_message: Some("profile already bound".to_string()),
            }),
        );

        assert_eq!(row.current_state, AdminCreationState::Failed);
        assert_eq!(commands.len(), 1);
        let delete: DeleteAuthUserByAdmin = commands[0].decode().unwrap();
        assert_eq!(delete.user_id, user_id);
    }

    #[test]
    fn timeout_before_account_creation_has_nothing_to_compensate() {
        let workflow = AdminCreationWorkflow::default();
        let correlation_id = Uuid::new_v4();

        let (row, _) = transition(&workflow, None, started(correlation_id, Uuid::new_v4()));
        let token = row.timeout_token_id.unwrap();

        let (row, commands) = transition(
            &workflow,
            Some(&row),
            AdminCreationEvent::TimedOut(AdminUserCreationTimedOut {
                correlation_id,
                timeout_token_id: token,
            }),
        );

        assert_eq!(row.current_state, AdminCreationState::Failed);
        assert!(commands.is_empty());
    }
}

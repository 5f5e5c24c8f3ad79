//! `PostgreSQL`-backed saga stores.
//!
//! `persist` upserts the saga row and stages the decision's follow-up
//! commands as outbox rows in one transaction — the commands commit or
//! roll back with the state they announce. The outbox dispatcher then
//! relays them like any other staged event.

use crate::state::{
    AdminCreationSagaState, AdminCreationState, RegistrationSagaState, RegistrationState,
};
use crate::store::{SagaError, SagaStore};
use chrono::{DateTime, Utc};
use lattice_core::event::EventEnvelope;
use lattice_outbox::PostgresOutboxStore;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Registration saga rows in `registration_sagas`.
#[derive(Clone)]
pub struct PostgresRegistrationSagaStore {
    pool: PgPool,
}

impl PostgresRegistrationSagaStore {
    /// Create a store on the service's pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the saga table if missing.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Storage`] if DDL execution fails.
    pub async fn ensure_schema(&self) -> Result<(), SagaError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS registration_sagas (
                correlation_id UUID PRIMARY KEY,
                current_state TEXT NOT NULL,
                email TEXT NOT NULL,
                encrypted_password TEXT NOT NULL,
                full_name TEXT NOT NULL,
                phone_number TEXT NOT NULL,
                started_at TIMESTAMPTZ NOT NULL,
                otp_sent_at TIMESTAMPTZ,
                otp_verified_at TIMESTAMPTZ,
                auth_user_created_at TIMESTAMPTZ,
                user_profile_created_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                auth_user_id UUID,
                user_profile_id UUID,
                error_message TEXT,
                is_completed BOOLEAN NOT NULL DEFAULT FALSE,
                is_failed BOOLEAN NOT NULL DEFAULT FALSE,
                timeout_token_id UUID,
                timeout_at TIMESTAMPTZ
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SagaError::Storage(e.to_string()))?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS registration_sagas_timeout_idx
            ON registration_sagas (timeout_at)
            WHERE timeout_at IS NOT NULL AND NOT is_completed AND NOT is_failed
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SagaError::Storage(e.to_string()))?;

        Ok(())
    }

    fn row_to_state(row: &PgRow) -> Result<RegistrationSagaState, SagaError> {
        let correlation_id: Uuid = row.get("correlation_id");
        let state_str: String = row.get("current_state");
        let current_state =
            RegistrationState::parse(&state_str).map_err(|e| SagaError::CorruptRow {
                correlation_id,
                reason: e.to_string(),
            })?;

        Ok(RegistrationSagaState {
            correlation_id,
            current_state,
            email: row.get("email"),
            encrypted_password: row.get("encrypted_password"),
            full_name: row.get("full_name"),
            phone_number: row.get("phone_number"),
            started_at: row.get("started_at"),
            otp_sent_at: row.get("otp_sent_at"),
            otp_verified_at: row.get("otp_verified_at"),
            auth_user_created_at: row.get("auth_user_created_at"),
            user_profile_created_at: row.get("user_profile_created_at"),
            completed_at: row.get("completed_at"),
            auth_user_id: row.get("auth_user_id"),
            user_profile_id: row.get("user_profile_id"),
            error_message: row.get("error_message"),
            is_completed: row.get("is_completed"),
            is_failed: row.get("is_failed"),
            timeout_token_id: row.get("timeout_token_id"),
            timeout_at: row.get("timeout_at"),
        })
    }
}

impl SagaStore<RegistrationSagaState> for PostgresRegistrationSagaStore {
    async fn load(
        &self,
        correlation_id: Uuid,
    ) -> Result<Option<RegistrationSagaState>, SagaError> {
        let row = sqlx::query(
            r"SELECT * FROM registration_sagas WHERE correlation_id = $1",
        )
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SagaError::Storage(e.to_string()))?;

        row.as_ref().map(Self::row_to_state).transpose()
    }

    async fn persist(
        &self,
        state: &RegistrationSagaState,
        commands: &[EventEnvelope],
    ) -> Result<(), SagaError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SagaError::Storage(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO registration_sagas (
                correlation_id, current_state, email, encrypted_password,
                full_name, phone_number, started_at, otp_sent_at,
                otp_verified_at, auth_user_created_at, user_profile_created_at,
                completed_at, auth_user_id, user_profile_id, error_message,
                is_completed, is_failed, timeout_token_id, timeout_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                      $11, $12, $13, $14, $15, $16, $17, $18, $19)
            ON CONFLICT (correlation_id) DO UPDATE SET
                current_state = EXCLUDED.current_state,
                otp_sent_at = EXCLUDED.otp_sent_at,
                otp_verified_at = EXCLUDED.otp_verified_at,
                auth_user_created_at = EXCLUDED.auth_user_created_at,
                user_profile_created_at = EXCLUDED.user_profile_created_at,
                completed_at = EXCLUDED.completed_at,
                auth_user_id = EXCLUDED.auth_user_id,
                user_profile_id = EXCLUDED.user_profile_id,
                error_message = EXCLUDED.error_message,
                is_completed = EXCLUDED.is_completed,
                is_failed = EXCLUDED.is_failed,
                timeout_token_id = EXCLUDED.timeout_token_id,
                timeout_at = EXCLUDED.timeout_at
            ",
        )
        .bind(state.correlation_id)
        .bind(state.current_state.as_str())
        .bind(&state.email)
        .bind(&state.encrypted_password)
        .bind(&state.full_name)
        .bind(&state.phone_number)
        .bind(state.started_at)
        .bind(state.otp_sent_at)
        .bind(state.otp_verified_at)
        .bind(state.auth_user_created_at)
        .bind(state.user_profile_created_at)
        .bind(state.completed_at)
        .bind(state.auth_user_id)
        .bind(state.user_profile_id)
        .bind(&state.error_message)
        .bind(state.is_completed)
        .bind(state.is_failed)
        .bind(state.timeout_token_id)
        .bind(state.timeout_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| SagaError::Storage(e.to_string()))?;

        for command in commands {
            PostgresOutboxStore::stage_in(&mut tx, command, state.correlation_id).await?;
        }

        tx.commit()
            .await
            .map_err(|e| SagaError::Storage(e.to_string()))?;

        tracing::debug!(
            correlation_id = %state.correlation_id,
            state = state.current_state.as_str(),
            commands = commands.len(),
            "Registration saga persisted"
        );

        Ok(())
    }

    async fn due_timeouts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<RegistrationSagaState>, SagaError> {
        let rows = sqlx::query(
            r"
            SELECT * FROM registration_sagas
            WHERE timeout_at IS NOT NULL
              AND timeout_at <= $1
              AND NOT is_completed
              AND NOT is_failed
            ORDER BY timeout_at
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SagaError::Storage(e.to_string()))?;

        rows.iter().map(Self::row_to_state).collect()
    }
}

/// Admin-creation saga rows in `admin_creation_sagas`.
#[derive(Clone)]
pub struct PostgresAdminSagaStore {
    pool: PgPool,
}

impl PostgresAdminSagaStore {
    /// Create a store on the service's pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the saga table if missing.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::Storage`] if DDL execution fails.
    pub async fn ensure_schema(&self) -> Result<(), SagaError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS admin_creation_sagas (
                correlation_id UUID PRIMARY KEY,
                current_state TEXT NOT NULL,
                email TEXT NOT NULL,
                encrypted_password TEXT NOT NULL,
                full_name TEXT NOT NULL,
                role TEXT NOT NULL,
                user_profile_id UUID NOT NULL,
                auth_user_id UUID,
                started_at TIMESTAMPTZ NOT NULL,
                auth_user_created_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                error_message TEXT,
                is_completed BOOLEAN NOT NULL DEFAULT FALSE,
                is_failed BOOLEAN NOT NULL DEFAULT FALSE,
                timeout_token_id UUID,
                timeout_at TIMESTAMPTZ
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| SagaError::Storage(e.to_string()))?;

        Ok(())
    }

    fn row_to_state(row: &PgRow) -> Result<AdminCreationSagaState, SagaError> {
        let correlation_id: Uuid = row.get("correlation_id");
        let state_str: String = row.get("current_state");
        let current_state =
            AdminCreationState::parse(&state_str).map_err(|e| SagaError::CorruptRow {
                correlation_id,
                reason: e.to_string(),
            })?;

        Ok(AdminCreationSagaState {
            correlation_id,
            current_state,
            email: row.get("email"),
            encrypted_password: row.get("encrypted_password"),
            full_name: row.get("full_name"),
            role: row.get("role"),
            user_profile_id: row.get("user_profile_id"),
            auth_user_id: row.get("auth_user_id"),
            started_at: row.get("started_at"),
            auth_user_created_at: row.get("auth_user_created_at"),
            completed_at: row.get("completed_at"),
            error_message: row.get("error_message"),
            is_completed: row.get("is_completed"),
            is_failed: row.get("is_failed"),
            timeout_token_id: row.get("timeout_token_id"),
            timeout_at: row.get("timeout_at"),
        })
    }
}

impl SagaStore<AdminCreationSagaState> for PostgresAdminSagaStore {
    async fn load(
        &self,
        correlation_id: Uuid,
    ) -> Result<Option<AdminCreationSagaState>, SagaError> {
        let row = sqlx::query(
            r"SELECT * FROM admin_creation_sagas WHERE correlation_id = $1",
        )
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| SagaError::Storage(e.to_string()))?;

        row.as_ref().map(Self::row_to_state).transpose()
    }

    async fn persist(
        &self,
        state: &AdminCreationSagaState,
        commands: &[EventEnvelope],
    ) -> Result<(), SagaError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SagaError::Storage(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO admin_creation_sagas (
                correlation_id, current_state, email, encrypted_password,
                full_name, role, user_profile_id, auth_user_id, started_at,
                auth_user_created_at, completed_at, error_message,
                is_completed, is_failed, timeout_token_id, timeout_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                      $11, $12, $13, $14, $15, $16)
            ON CONFLICT (correlation_id) DO UPDATE SET
                current_state = EXCLUDED.current_state,
                auth_user_id = EXCLUDED.auth_user_id,
                auth_user_created_at = EXCLUDED.auth_user_created_at,
                completed_at = EXCLUDED.completed_at,
                error_message = EXCLUDED.error_message,
                is_completed = EXCLUDED.is_completed,
                is_failed = EXCLUDED.is_failed,
                timeout_token_id = EXCLUDED.timeout_token_id,
                timeout_at = EXCLUDED.timeout_at
            ",
        )
        .bind(state.correlation_id)
        .bind(state.current_state.as_str())
        .bind(&state.email)
        .bind(&state.encrypted_password)
        .bind(&state.full_name)
        .bind(&state.role)
        .bind(state.user_profile_id)
        .bind(state.auth_user_id)
        .bind(state.started_at)
        .bind(state.auth_user_created_at)
        .bind(state.completed_at)
        .bind(&state.error_message)
        .bind(state.is_completed)
        .bind(state.is_failed)
        .bind(state.timeout_token_id)
        .bind(state.timeout_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| SagaError::Storage(e.to_string()))?;

        for command in commands {
            PostgresOutboxStore::stage_in(&mut tx, command, state.correlation_id).await?;
        }

        tx.commit()
            .await
            .map_err(|e| SagaError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn due_timeouts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AdminCreationSagaState>, SagaError> {
        let rows = sqlx::query(
            r"
            SELECT * FROM admin_creation_sagas
            WHERE timeout_at IS NOT NULL
              AND timeout_at <= $1
              AND NOT is_completed
              AND NOT is_failed
            ORDER BY timeout_at
            ",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SagaError::Storage(e.to_string()))?;

        rows.iter().map(Self::row_to_state).collect()
    }
}

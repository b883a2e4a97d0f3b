//! Domain service for the credential lifecycle.
//!
//! Registration, login, password recovery/rotation, self-service profile
//! edits, admin edits, and deletion. Every operation takes validated
//! arguments from the driver and returns a structured result; the service
//! performs no input/output of its own.

use thiserror::Error;

use crate::audit::AuditLogEntry;
use crate::db::RepoError;
use crate::models::User;
use crate::session::SessionState;

/// Errors specific to authentication and user-management operations.
///
/// Mirror-store failures never appear here: they are swallowed at the
/// write boundary as accepted divergence. Authoritative-store failures
/// always surface as [`AuthError::Store`] and abort the operation.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("User not found")]
    UserNotFound,

    /// Deliberately generic: a corrupted stored hash and a wrong password
    /// are indistinguishable to the caller.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is inactive")]
    AccountInactive,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Store error: {0}")]
    Store(String),
}

impl From<RepoError> for AuthError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Duplicate(field) => Self::Validation(format!("{field} already exists")),
            RepoError::NotFound => Self::UserNotFound,
            RepoError::Db(e) => Self::Store(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Domain service trait for authentication and user management.
///
/// Session-aware operations take the [`SessionState`] explicitly; the
/// admin-gated ones check the role at this boundary regardless of how the
/// driver got here.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Registers a new user and mirrors the record.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] for empty fields, short
    /// passwords, or duplicate username/email.
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: &str,
    ) -> Result<User, AuthError>;

    /// Verifies credentials and establishes the session identity.
    ///
    /// # Errors
    ///
    /// [`AuthError::UserNotFound`] for an unknown username,
    /// [`AuthError::AccountInactive`] for a deactivated account,
    /// [`AuthError::InvalidCredentials`] for a failed verification.
    async fn login(
        &self,
        session: &mut SessionState,
        username: &str,
        password: &str,
    ) -> Result<User, AuthError>;

    /// Records the logout and clears the session identity.
    async fn logout(&self, session: &mut SessionState) -> Result<(), AuthError>;

    /// Issues a temporary password for the account behind `email` and
    /// returns it to the caller (simulated delivery).
    async fn recover_password(&self, email: &str) -> Result<String, AuthError>;

    /// Self-service email change for the session user.
    async fn change_email(
        &self,
        session: &mut SessionState,
        new_email: &str,
    ) -> Result<User, AuthError>;

    /// Self-service rename; uniqueness is re-checked excluding the
    /// acting user's own row.
    async fn change_username(
        &self,
        session: &mut SessionState,
        new_username: &str,
    ) -> Result<User, AuthError>;

    /// Self-service password rotation.
    async fn change_password(
        &self,
        session: &mut SessionState,
        new_password: &str,
    ) -> Result<User, AuthError>;

    /// Flips the session user's active flag.
    async fn toggle_active(&self, session: &mut SessionState) -> Result<User, AuthError>;

    /// Admin-only: changes an arbitrary user's role.
    async fn admin_change_role(
        &self,
        session: &SessionState,
        target_id: i32,
        new_role: &str,
    ) -> Result<User, AuthError>;

    /// Admin-only: changes an arbitrary user's email.
    async fn admin_change_email(
        &self,
        session: &SessionState,
        target_id: i32,
        new_email: &str,
    ) -> Result<User, AuthError>;

    /// Admin-only: forces a temporary password onto the target and
    /// returns the plaintext to the caller.
    async fn admin_force_password(
        &self,
        session: &SessionState,
        target_id: i32,
    ) -> Result<String, AuthError>;

    /// Admin-only: deletes the target from both stores. Returns `false`
    /// when no such user existed.
    async fn delete_user(&self, session: &SessionState, target_id: i32)
    -> Result<bool, AuthError>;

    /// Admin-only: lists every user in the authoritative store.
    async fn list_users(&self, session: &SessionState) -> Result<Vec<User>, AuthError>;

    /// Admin-only: most recent audit entries, newest first.
    async fn recent_logs(
        &self,
        session: &SessionState,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>, AuthError>;
}

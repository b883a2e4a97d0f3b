//! In-process session identity.
//!
//! At most one authenticated user exists per [`SessionState`] value. The
//! state is passed into each operation explicitly rather than living in a
//! global, so a future multi-session host can hold one per connection.
//! Authorization is enforced here at the operation boundary; menus hiding
//! options is cosmetic, `require_admin` is the actual gate.

use crate::models::{Role, User};
use crate::services::auth_service::AuthError;

#[derive(Debug, Default)]
pub struct SessionState {
    current: Option<User>,
}

impl SessionState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self) -> Option<&User> {
        self.current.as_ref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.current.is_some()
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|u| u.role == Role::Admin)
    }

    /// Returns the authenticated user or refuses the operation.
    pub fn require_user(&self) -> Result<&User, AuthError> {
        self.current.as_ref().ok_or(AuthError::Unauthorized)
    }

    /// Returns the authenticated admin or refuses the operation.
    pub fn require_admin(&self) -> Result<&User, AuthError> {
        match self.current.as_ref() {
            Some(user) if user.role == Role::Admin => Ok(user),
            _ => Err(AuthError::Unauthorized),
        }
    }

    pub(crate) fn set(&mut self, user: User) {
        self.current = Some(user);
    }

    /// Updates the in-memory copy after a successful self-edit.
    pub(crate) fn refresh(&mut self, user: User) {
        self.current = Some(user);
    }

    pub(crate) fn clear(&mut self) -> Option<User> {
        self.current.take()
    }
}

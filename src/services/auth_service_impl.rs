//! Core implementation of the [`AuthService`] trait.
//!
//! Every mutating operation follows the same choreography: probe the
//! authoritative connection, commit the authoritative write, then attempt
//! the mirror write and the audit append. Mirror and audit failures are
//! logged and swallowed; the authoritative store alone decides success.

use std::sync::Arc;

use tracing::warn;

use crate::audit::{AuditAction, AuditLog, AuditLogEntry};
use crate::credential::{CredentialCodec, generate_temp_password};
use crate::db::Store;
use crate::mirror::{MirrorStore, UserDocument, UserDocumentPatch};
use crate::models::{NewUser, Role, User, UserPatch};
use crate::services::auth_service::{AuthError, AuthService};
use crate::session::SessionState;

pub struct CoreAuthService {
    store: Store,
    mirror: Arc<dyn MirrorStore>,
    audit: AuditLog,
    codec: CredentialCodec,
    min_password_length: usize,
}

impl CoreAuthService {
    #[must_use]
    pub fn new(
        store: Store,
        mirror: Arc<dyn MirrorStore>,
        codec: CredentialCodec,
        min_password_length: usize,
    ) -> Self {
        let audit = AuditLog::new(mirror.clone());
        Self {
            store,
            mirror,
            audit,
            codec,
            min_password_length,
        }
    }

    fn check_password_length(&self, password: &str) -> Result<(), AuthError> {
        if password.chars().count() < self.min_password_length {
            return Err(AuthError::Validation(format!(
                "password must be at least {} characters",
                self.min_password_length
            )));
        }
        Ok(())
    }

    /// Best-effort mirror field update after a committed authoritative
    /// write. Failure is accepted divergence, never an operation failure.
    async fn mirror_patch(&self, sql_id: i32, patch: UserDocumentPatch) {
        if let Err(e) = self.mirror.set_user_fields(sql_id, patch).await {
            warn!("Mirror update failed for user {sql_id} (divergence accepted): {e}");
        }
    }

    /// Shared update path for self-service and admin edits: authoritative
    /// update first (must succeed), then mirror, then audit.
    async fn apply_update(
        &self,
        target_id: i32,
        patch: UserPatch,
        mirror_patch: UserDocumentPatch,
        audit_actor: &str,
        action: AuditAction,
    ) -> Result<User, AuthError> {
        let updated = self.store.update_user(target_id, patch).await?;
        self.mirror_patch(target_id, mirror_patch).await;
        self.audit.record(audit_actor, action).await;
        Ok(updated)
    }
}

#[async_trait::async_trait]
impl AuthService for CoreAuthService {
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        role: &str,
    ) -> Result<User, AuthError> {
        let username = username.trim();
        let email = email.trim();

        if username.is_empty() || email.is_empty() {
            return Err(AuthError::Validation(
                "username and email are required".to_string(),
            ));
        }
        // Rejected before any hashing or store write.
        self.check_password_length(password)?;

        self.store.ensure_connected().await?;

        // Friendly duplicate check before paying for the hash; the
        // transactional re-check in the repository remains the guard.
        if self.store.find_user_by_username(username).await?.is_some() {
            return Err(AuthError::Validation("username already exists".to_string()));
        }
        if self.store.find_user_by_email(email).await?.is_some() {
            return Err(AuthError::Validation("email already exists".to_string()));
        }

        let role = Role::parse(role);
        let password_hash = self.codec.hash_blocking(password.to_string()).await?;

        let user = self
            .store
            .create_user(NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash: password_hash.clone(),
                role,
                active: true,
            })
            .await?;

        // Authoritative commit succeeded; everything after is best-effort.
        if let Err(e) = self
            .mirror
            .upsert_user(UserDocument {
                sql_id: user.id,
                username: user.username.clone(),
                email: user.email.clone(),
                password_hash,
                role: user.role.as_str().to_string(),
                active: user.active,
                created_at: user.created_at.clone(),
            })
            .await
        {
            warn!(
                "Mirror insert failed for new user {} (divergence accepted): {e}",
                user.id
            );
        }

        self.audit.record(&user.username, AuditAction::Registro).await;
        Ok(user)
    }

    async fn login(
        &self,
        session: &mut SessionState,
        username: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        self.store.ensure_connected().await?;

        let Some((user, stored_hash)) = self.store.find_user_with_hash(username).await? else {
            self.audit
                .record(username, AuditAction::LoginFallidoNoUsuario)
                .await;
            return Err(AuthError::UserNotFound);
        };

        // Inactive accounts are refused outright, whatever the password.
        if !user.active {
            self.audit
                .record(&user.username, AuditAction::LoginFallidoInactivo)
                .await;
            return Err(AuthError::AccountInactive);
        }

        if !self
            .codec
            .verify_blocking(password.to_string(), stored_hash)
            .await
        {
            self.audit
                .record(&user.username, AuditAction::LoginFallidoPassword)
                .await;
            return Err(AuthError::InvalidCredentials);
        }

        session.set(user.clone());
        self.audit
            .record(&user.username, AuditAction::LoginExitoso)
            .await;
        Ok(user)
    }

    async fn logout(&self, session: &mut SessionState) -> Result<(), AuthError> {
        if let Some(user) = session.clear() {
            self.audit.record(&user.username, AuditAction::Logout).await;
        }
        Ok(())
    }

    async fn recover_password(&self, email: &str) -> Result<String, AuthError> {
        self.store.ensure_connected().await?;

        let user = self
            .store
            .find_user_by_email(email.trim())
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let temp_password = generate_temp_password();
        let new_hash = self.codec.hash_blocking(temp_password.clone()).await?;

        self.apply_update(
            user.id,
            UserPatch {
                password_hash: Some(new_hash.clone()),
                ..Default::default()
            },
            UserDocumentPatch {
                password_hash: Some(new_hash),
                ..Default::default()
            },
            &user.username,
            AuditAction::RecuperacionContrasena,
        )
        .await?;

        // Generation is the end of the core's job; delivery is simulated
        // by handing the plaintext back to the driver.
        Ok(temp_password)
    }

    async fn change_email(
        &self,
        session: &mut SessionState,
        new_email: &str,
    ) -> Result<User, AuthError> {
        let actor = session.require_user()?.clone();
        let new_email = new_email.trim();
        if new_email.is_empty() {
            return Err(AuthError::Validation("email is required".to_string()));
        }

        self.store.ensure_connected().await?;

        let updated = self
            .apply_update(
                actor.id,
                UserPatch {
                    email: Some(new_email.to_string()),
                    ..Default::default()
                },
                UserDocumentPatch {
                    email: Some(new_email.to_string()),
                    ..Default::default()
                },
                &actor.username,
                AuditAction::EditarEmail,
            )
            .await?;

        session.refresh(updated.clone());
        Ok(updated)
    }

    async fn change_username(
        &self,
        session: &mut SessionState,
        new_username: &str,
    ) -> Result<User, AuthError> {
        let actor = session.require_user()?.clone();
        let new_username = new_username.trim();
        if new_username.is_empty() {
            return Err(AuthError::Validation("username is required".to_string()));
        }

        self.store.ensure_connected().await?;

        // Uniqueness excluding the actor's own row is checked in the
        // repository update.
        let updated = self
            .apply_update(
                actor.id,
                UserPatch {
                    username: Some(new_username.to_string()),
                    ..Default::default()
                },
                UserDocumentPatch {
                    username: Some(new_username.to_string()),
                    ..Default::default()
                },
                new_username,
                AuditAction::EditarUsername,
            )
            .await?;

        session.refresh(updated.clone());
        Ok(updated)
    }

    async fn change_password(
        &self,
        session: &mut SessionState,
        new_password: &str,
    ) -> Result<User, AuthError> {
        let actor = session.require_user()?.clone();
        self.check_password_length(new_password)?;

        self.store.ensure_connected().await?;

        let new_hash = self.codec.hash_blocking(new_password.to_string()).await?;

        let updated = self
            .apply_update(
                actor.id,
                UserPatch {
                    password_hash: Some(new_hash.clone()),
                    ..Default::default()
                },
                UserDocumentPatch {
                    password_hash: Some(new_hash),
                    ..Default::default()
                },
                &actor.username,
                AuditAction::CambioContrasena,
            )
            .await?;

        session.refresh(updated.clone());
        Ok(updated)
    }

    async fn toggle_active(&self, session: &mut SessionState) -> Result<User, AuthError> {
        let actor = session.require_user()?.clone();

        self.store.ensure_connected().await?;

        let new_state = !actor.active;
        let updated = self
            .apply_update(
                actor.id,
                UserPatch {
                    active: Some(new_state),
                    ..Default::default()
                },
                UserDocumentPatch {
                    active: Some(new_state),
                    ..Default::default()
                },
                &actor.username,
                AuditAction::CambioEstado,
            )
            .await?;

        session.refresh(updated.clone());
        Ok(updated)
    }

    async fn admin_change_role(
        &self,
        session: &SessionState,
        target_id: i32,
        new_role: &str,
    ) -> Result<User, AuthError> {
        session.require_admin()?;
        self.store.ensure_connected().await?;

        let target = self
            .store
            .find_user_by_id(target_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let role = Role::parse(new_role);
        self.apply_update(
            target_id,
            UserPatch {
                role: Some(role),
                ..Default::default()
            },
            UserDocumentPatch {
                role: Some(role.as_str().to_string()),
                ..Default::default()
            },
            &target.username,
            AuditAction::AdminCambioRol,
        )
        .await
    }

    async fn admin_change_email(
        &self,
        session: &SessionState,
        target_id: i32,
        new_email: &str,
    ) -> Result<User, AuthError> {
        session.require_admin()?;
        let new_email = new_email.trim();
        if new_email.is_empty() {
            return Err(AuthError::Validation("email is required".to_string()));
        }

        self.store.ensure_connected().await?;

        let target = self
            .store
            .find_user_by_id(target_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        self.apply_update(
            target_id,
            UserPatch {
                email: Some(new_email.to_string()),
                ..Default::default()
            },
            UserDocumentPatch {
                email: Some(new_email.to_string()),
                ..Default::default()
            },
            &target.username,
            AuditAction::AdminCambioEmail,
        )
        .await
    }

    async fn admin_force_password(
        &self,
        session: &SessionState,
        target_id: i32,
    ) -> Result<String, AuthError> {
        session.require_admin()?;
        self.store.ensure_connected().await?;

        let target = self
            .store
            .find_user_by_id(target_id)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        let temp_password = generate_temp_password();
        let new_hash = self.codec.hash_blocking(temp_password.clone()).await?;

        self.apply_update(
            target_id,
            UserPatch {
                password_hash: Some(new_hash.clone()),
                ..Default::default()
            },
            UserDocumentPatch {
                password_hash: Some(new_hash),
                ..Default::default()
            },
            &target.username,
            AuditAction::AdminForzarPassword,
        )
        .await?;

        Ok(temp_password)
    }

    async fn delete_user(
        &self,
        session: &SessionState,
        target_id: i32,
    ) -> Result<bool, AuthError> {
        session.require_admin()?;
        self.store.ensure_connected().await?;

        // Resolve the username before the row disappears so the audit
        // entry carries a name, not a dangling numeric id.
        let Some(target) = self.store.find_user_by_id(target_id).await? else {
            return Ok(false);
        };

        let deleted = self.store.delete_user(target_id).await?;
        if !deleted {
            return Ok(false);
        }

        if let Err(e) = self.mirror.delete_user(target_id).await {
            warn!("Mirror delete failed for user {target_id} (divergence accepted): {e}");
        }

        self.audit
            .record(&target.username, AuditAction::EliminarUsuario)
            .await;
        Ok(true)
    }

    async fn list_users(&self, session: &SessionState) -> Result<Vec<User>, AuthError> {
        session.require_admin()?;
        self.store.ensure_connected().await?;

        Ok(self.store.list_users().await?)
    }

    async fn recent_logs(
        &self,
        session: &SessionState,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>, AuthError> {
        session.require_admin()?;

        self.audit
            .recent(limit)
            .await
            .map_err(|e| AuthError::Store(e.to_string()))
    }
}

//! End-to-end tests for the credential lifecycle and the dual-store
//! consistency protocol, driven through the service layer.

use std::sync::Arc;

use centinela::audit::AuditAction;
use centinela::config::SecurityConfig;
use centinela::credential::CredentialCodec;
use centinela::db::Store;
use centinela::mirror::{
    MemoryMirror, MirrorError, MirrorStore, UserDocument, UserDocumentPatch,
};
use centinela::models::{Role, UserPatch};
use centinela::{AuthError, AuthService, CoreAuthService, SessionState};

/// Low argon2 cost so the suite stays fast.
fn fast_security() -> SecurityConfig {
    SecurityConfig {
        argon2_memory_cost_kib: 1024,
        argon2_time_cost: 1,
        argon2_parallelism: 1,
        min_password_length: 4,
    }
}

async fn temp_store() -> Store {
    let db_path =
        std::env::temp_dir().join(format!("centinela-test-{}.db", uuid::Uuid::new_v4()));
    Store::connect(&format!("sqlite:{}", db_path.display()))
        .await
        .expect("failed to open test store")
}

/// Service plus handles on both stores for direct inspection.
async fn spawn_service() -> (CoreAuthService, Store, Arc<MemoryMirror>) {
    let store = temp_store().await;
    let mirror = Arc::new(MemoryMirror::new());
    let codec = CredentialCodec::new(&fast_security()).unwrap();
    let service = CoreAuthService::new(store.clone(), mirror.clone(), codec, 4);
    (service, store, mirror)
}

async fn count_actions(mirror: &MemoryMirror, action: AuditAction) -> usize {
    mirror
        .recent_logs(1000)
        .await
        .unwrap()
        .iter()
        .filter(|e| e.action == action)
        .count()
}

#[tokio::test]
async fn register_then_login_as_plain_user() {
    let (service, _store, mirror) = spawn_service().await;
    let mut session = SessionState::new();

    let user = service
        .register("alice", "alice@x.com", "pass1", "user")
        .await
        .unwrap();
    assert_eq!(user.role, Role::User);
    assert!(user.active);

    let logged_in = service
        .login(&mut session, "alice", "pass1")
        .await
        .unwrap();
    assert_eq!(logged_in.id, user.id);
    assert!(session.is_authenticated());
    assert!(!session.is_admin());

    assert_eq!(count_actions(&mirror, AuditAction::Registro).await, 1);
    assert_eq!(count_actions(&mirror, AuditAction::LoginExitoso).await, 1);
}

#[tokio::test]
async fn duplicate_registration_is_rejected_and_writes_nothing() {
    let (service, store, mirror) = spawn_service().await;

    let first = service
        .register("alice", "alice@x.com", "pass1", "user")
        .await
        .unwrap();

    // Same username, different email.
    let err = service
        .register("alice", "other@x.com", "pass2", "user")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));

    // Same email, different username.
    let err = service
        .register("bob", "alice@x.com", "pass2", "user")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));

    let users = store.list_users().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, first.id);

    // Exactly one mirror document and one registration audit entry.
    assert!(mirror.find_user(first.id).await.unwrap().is_some());
    assert_eq!(count_actions(&mirror, AuditAction::Registro).await, 1);
}

#[tokio::test]
async fn short_password_is_rejected_before_any_write() {
    let (service, store, mirror) = spawn_service().await;

    let err = service
        .register("alice", "alice@x.com", "abc", "user")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));

    assert!(store.find_user_by_username("alice").await.unwrap().is_none());
    assert!(mirror.recent_logs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_fields_are_rejected() {
    let (service, _store, _mirror) = spawn_service().await;

    assert!(matches!(
        service.register("", "a@x.com", "pass1", "user").await,
        Err(AuthError::Validation(_))
    ));
    assert!(matches!(
        service.register("alice", "   ", "pass1", "user").await,
        Err(AuthError::Validation(_))
    ));
}

#[tokio::test]
async fn unknown_role_normalizes_to_user() {
    let (service, _store, _mirror) = spawn_service().await;

    let user = service
        .register("alice", "alice@x.com", "pass1", "superuser")
        .await
        .unwrap();
    assert_eq!(user.role, Role::User);
}

#[tokio::test]
async fn registration_mirrors_the_authoritative_row() {
    let (service, store, mirror) = spawn_service().await;

    let user = service
        .register("alice", "alice@x.com", "pass1", "admin")
        .await
        .unwrap();

    let row = store
        .find_user_by_username("alice")
        .await
        .unwrap()
        .unwrap();
    let doc = mirror.find_user(user.id).await.unwrap().unwrap();

    assert_eq!(doc.sql_id, row.id);
    assert_eq!(doc.username, row.username);
    assert_eq!(doc.email, row.email);
    assert_eq!(doc.role, row.role.as_str());
    assert_eq!(doc.active, row.active);
    // The mirrored hash is encoded, never plaintext.
    assert!(doc.password_hash.starts_with("$argon2"));
}

#[tokio::test]
async fn login_with_unknown_username_logs_once_and_fails() {
    let (service, _store, mirror) = spawn_service().await;
    let mut session = SessionState::new();

    let err = service
        .login(&mut session, "ghost", "whatever")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UserNotFound));
    assert!(!session.is_authenticated());
    assert_eq!(
        count_actions(&mirror, AuditAction::LoginFallidoNoUsuario).await,
        1
    );
}

#[tokio::test]
async fn login_with_wrong_password_logs_once_and_fails() {
    let (service, _store, mirror) = spawn_service().await;
    let mut session = SessionState::new();

    service
        .register("alice", "alice@x.com", "pass1", "user")
        .await
        .unwrap();

    let err = service
        .login(&mut session, "alice", "wrong")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert!(!session.is_authenticated());
    assert_eq!(
        count_actions(&mirror, AuditAction::LoginFallidoPassword).await,
        1
    );
}

#[tokio::test]
async fn inactive_account_is_refused_regardless_of_password() {
    let (service, store, mirror) = spawn_service().await;
    let mut session = SessionState::new();

    let user = service
        .register("alice", "alice@x.com", "pass1", "user")
        .await
        .unwrap();

    store
        .update_user(
            user.id,
            UserPatch {
                active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Correct password.
    let err = service
        .login(&mut session, "alice", "pass1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AccountInactive));

    // Wrong password gets the same refusal.
    let err = service
        .login(&mut session, "alice", "nope")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AccountInactive));

    assert!(!session.is_authenticated());
    assert_eq!(
        count_actions(&mirror, AuditAction::LoginFallidoInactivo).await,
        2
    );
}

#[tokio::test]
async fn recover_password_rotates_the_credential() {
    let (service, _store, mirror) = spawn_service().await;
    let mut session = SessionState::new();

    service
        .register("alice", "alice@x.com", "pass1", "user")
        .await
        .unwrap();

    let temp = service.recover_password("alice@x.com").await.unwrap();
    assert!(temp.len() >= 12);
    assert_ne!(temp, "pass1");

    // Old password no longer verifies.
    let err = service
        .login(&mut session, "alice", "pass1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));

    // Temporary password works immediately.
    service.login(&mut session, "alice", &temp).await.unwrap();
    assert!(session.is_authenticated());

    assert_eq!(
        count_actions(&mirror, AuditAction::RecuperacionContrasena).await,
        1
    );
}

#[tokio::test]
async fn recover_password_for_unknown_email_fails() {
    let (service, _store, _mirror) = spawn_service().await;

    let err = service.recover_password("ghost@x.com").await.unwrap_err();
    assert!(matches!(err, AuthError::UserNotFound));
}

#[tokio::test]
async fn self_edits_update_both_stores_and_the_session() {
    let (service, store, mirror) = spawn_service().await;
    let mut session = SessionState::new();

    let user = service
        .register("alice", "alice@x.com", "pass1", "user")
        .await
        .unwrap();
    service
        .login(&mut session, "alice", "pass1")
        .await
        .unwrap();

    service
        .change_email(&mut session, "new@x.com")
        .await
        .unwrap();
    assert_eq!(session.current().unwrap().email, "new@x.com");

    let row = store.find_user_by_id(user.id).await.unwrap().unwrap();
    assert_eq!(row.email, "new@x.com");
    let doc = mirror.find_user(user.id).await.unwrap().unwrap();
    assert_eq!(doc.email, "new@x.com");
    assert_eq!(count_actions(&mirror, AuditAction::EditarEmail).await, 1);

    service
        .change_username(&mut session, "alicia")
        .await
        .unwrap();
    assert_eq!(session.current().unwrap().username, "alicia");
    assert_eq!(
        mirror.find_user(user.id).await.unwrap().unwrap().username,
        "alicia"
    );
    assert_eq!(count_actions(&mirror, AuditAction::EditarUsername).await, 1);
}

#[tokio::test]
async fn username_change_excludes_own_row_but_not_others() {
    let (service, _store, _mirror) = spawn_service().await;
    let mut session = SessionState::new();

    service
        .register("alice", "alice@x.com", "pass1", "user")
        .await
        .unwrap();
    service
        .register("bob", "bob@x.com", "pass1", "user")
        .await
        .unwrap();
    service
        .login(&mut session, "alice", "pass1")
        .await
        .unwrap();

    // Renaming to your own current name is not a conflict.
    service
        .change_username(&mut session, "alice")
        .await
        .unwrap();

    // Renaming onto someone else is.
    let err = service
        .change_username(&mut session, "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Validation(_)));
    assert_eq!(session.current().unwrap().username, "alice");
}

#[tokio::test]
async fn toggled_inactive_account_cannot_log_back_in() {
    let (service, _store, _mirror) = spawn_service().await;
    let mut session = SessionState::new();

    service
        .register("alice", "alice@x.com", "pass1", "user")
        .await
        .unwrap();
    service
        .login(&mut session, "alice", "pass1")
        .await
        .unwrap();

    let updated = service.toggle_active(&mut session).await.unwrap();
    assert!(!updated.active);

    service.logout(&mut session).await.unwrap();

    let err = service
        .login(&mut session, "alice", "pass1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AccountInactive));
}

#[tokio::test]
async fn admin_operations_are_refused_for_plain_users() {
    let (service, store, _mirror) = spawn_service().await;
    let mut session = SessionState::new();

    service
        .register("alice", "alice@x.com", "pass1", "user")
        .await
        .unwrap();
    let bob = service
        .register("bob", "bob@x.com", "pass1", "user")
        .await
        .unwrap();
    service
        .login(&mut session, "alice", "pass1")
        .await
        .unwrap();

    assert!(matches!(
        service.admin_change_role(&session, bob.id, "admin").await,
        Err(AuthError::Unauthorized)
    ));
    assert!(matches!(
        service
            .admin_change_email(&session, bob.id, "evil@x.com")
            .await,
        Err(AuthError::Unauthorized)
    ));
    assert!(matches!(
        service.admin_force_password(&session, bob.id).await,
        Err(AuthError::Unauthorized)
    ));
    assert!(matches!(
        service.delete_user(&session, bob.id).await,
        Err(AuthError::Unauthorized)
    ));
    assert!(matches!(
        service.list_users(&session).await,
        Err(AuthError::Unauthorized)
    ));
    assert!(matches!(
        service.recent_logs(&session, 10).await,
        Err(AuthError::Unauthorized)
    ));

    // The refused operations changed nothing.
    let row = store.find_user_by_id(bob.id).await.unwrap().unwrap();
    assert_eq!(row.role, Role::User);
    assert_eq!(row.email, "bob@x.com");
}

#[tokio::test]
async fn admin_operations_are_refused_without_a_session() {
    let (service, _store, _mirror) = spawn_service().await;
    let session = SessionState::new();

    assert!(matches!(
        service.list_users(&session).await,
        Err(AuthError::Unauthorized)
    ));
    assert!(matches!(
        service.delete_user(&session, 1).await,
        Err(AuthError::Unauthorized)
    ));
}

#[tokio::test]
async fn admin_edits_and_delete_touch_both_stores() {
    let (service, store, mirror) = spawn_service().await;
    let mut admin_session = SessionState::new();

    service
        .register("root", "root@x.com", "pass1", "admin")
        .await
        .unwrap();
    let bob = service
        .register("bob", "bob@x.com", "pass1", "user")
        .await
        .unwrap();
    service
        .login(&mut admin_session, "root", "pass1")
        .await
        .unwrap();
    assert!(admin_session.is_admin());

    let updated = service
        .admin_change_role(&admin_session, bob.id, "admin")
        .await
        .unwrap();
    assert_eq!(updated.role, Role::Admin);
    assert_eq!(
        mirror.find_user(bob.id).await.unwrap().unwrap().role,
        "admin"
    );
    assert_eq!(count_actions(&mirror, AuditAction::AdminCambioRol).await, 1);

    service
        .admin_change_email(&admin_session, bob.id, "bob2@x.com")
        .await
        .unwrap();
    assert_eq!(
        store.find_user_by_id(bob.id).await.unwrap().unwrap().email,
        "bob2@x.com"
    );

    // Forced temporary password verifies immediately.
    let temp = service
        .admin_force_password(&admin_session, bob.id)
        .await
        .unwrap();
    let mut bob_session = SessionState::new();
    service.login(&mut bob_session, "bob", &temp).await.unwrap();
    assert_eq!(
        count_actions(&mirror, AuditAction::AdminForzarPassword).await,
        1
    );

    // Delete removes the row and the mirror document.
    assert!(service.delete_user(&admin_session, bob.id).await.unwrap());
    assert!(store.find_user_by_id(bob.id).await.unwrap().is_none());
    assert!(mirror.find_user(bob.id).await.unwrap().is_none());

    // The audit actor is the deleted user's name, not a numeric id.
    let logs = mirror.recent_logs(1000).await.unwrap();
    let entry = logs
        .iter()
        .find(|e| e.action == AuditAction::EliminarUsuario)
        .unwrap();
    assert_eq!(entry.actor, "bob");

    // Deleting again reports absence without logging another entry.
    assert!(!service.delete_user(&admin_session, bob.id).await.unwrap());
    assert_eq!(count_actions(&mirror, AuditAction::EliminarUsuario).await, 1);
}

#[tokio::test]
async fn admin_role_change_normalizes_unknown_roles() {
    let (service, _store, _mirror) = spawn_service().await;
    let mut session = SessionState::new();

    service
        .register("root", "root@x.com", "pass1", "admin")
        .await
        .unwrap();
    let bob = service
        .register("bob", "bob@x.com", "pass1", "admin")
        .await
        .unwrap();
    service.login(&mut session, "root", "pass1").await.unwrap();

    let updated = service
        .admin_change_role(&session, bob.id, "wizard")
        .await
        .unwrap();
    assert_eq!(updated.role, Role::User);
}

#[tokio::test]
async fn logout_logs_and_clears_the_session() {
    let (service, _store, mirror) = spawn_service().await;
    let mut session = SessionState::new();

    service
        .register("alice", "alice@x.com", "pass1", "user")
        .await
        .unwrap();
    service
        .login(&mut session, "alice", "pass1")
        .await
        .unwrap();

    service.logout(&mut session).await.unwrap();
    assert!(!session.is_authenticated());
    assert_eq!(count_actions(&mirror, AuditAction::Logout).await, 1);

    // Logging out an empty session is a quiet no-op.
    service.logout(&mut session).await.unwrap();
    assert_eq!(count_actions(&mirror, AuditAction::Logout).await, 1);
}

/// Mirror double whose every write fails, to prove the core swallows
/// mirror divergence instead of failing operations.
struct FailingMirror;

fn mirror_down() -> MirrorError {
    MirrorError::Io(std::io::Error::other("mirror down"))
}

#[async_trait::async_trait]
impl MirrorStore for FailingMirror {
    async fn upsert_user(&self, _doc: UserDocument) -> Result<(), MirrorError> {
        Err(mirror_down())
    }

    async fn set_user_fields(
        &self,
        _sql_id: i32,
        _patch: UserDocumentPatch,
    ) -> Result<(), MirrorError> {
        Err(mirror_down())
    }

    async fn delete_user(&self, _sql_id: i32) -> Result<(), MirrorError> {
        Err(mirror_down())
    }

    async fn find_user(&self, _sql_id: i32) -> Result<Option<UserDocument>, MirrorError> {
        Err(mirror_down())
    }

    async fn append_log(&self, _entry: centinela::audit::AuditLogEntry) -> Result<(), MirrorError> {
        Err(mirror_down())
    }

    async fn recent_logs(
        &self,
        _limit: usize,
    ) -> Result<Vec<centinela::audit::AuditLogEntry>, MirrorError> {
        Err(mirror_down())
    }
}

#[tokio::test]
async fn mirror_failures_never_fail_the_operation() {
    let store = temp_store().await;
    let codec = CredentialCodec::new(&fast_security()).unwrap();
    let service = CoreAuthService::new(store.clone(), Arc::new(FailingMirror), codec, 4);
    let mut session = SessionState::new();

    // Registration commits authoritatively even though every mirror and
    // audit write fails.
    let user = service
        .register("alice", "alice@x.com", "pass1", "user")
        .await
        .unwrap();
    assert!(store.find_user_by_id(user.id).await.unwrap().is_some());

    service
        .login(&mut session, "alice", "pass1")
        .await
        .unwrap();
    service
        .change_email(&mut session, "new@x.com")
        .await
        .unwrap();

    // Deletes too: authoritative delete wins, mirror delete is warned away.
    let mut admin_session = SessionState::new();
    service
        .register("root", "root@x.com", "pass1", "admin")
        .await
        .unwrap();
    service
        .login(&mut admin_session, "root", "pass1")
        .await
        .unwrap();
    assert!(service.delete_user(&admin_session, user.id).await.unwrap());
    assert!(store.find_user_by_id(user.id).await.unwrap().is_none());
}

//! Append-only audit trail of security-relevant events.
//!
//! Entries land in the mirror's `logs` collection. A failed append must
//! never fail the operation that produced it, so [`AuditLog::record`]
//! downgrades errors to warnings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::mirror::{MirrorError, MirrorStore};

/// Placeholder source address for events whose origin is unknown
/// (the interactive driver has no remote peer).
pub const LOOPBACK_SOURCE: &str = "127.0.0.1";

/// Enumerated audit tags. The serialized form is the persisted layout;
/// the tags are kept verbatim from the deployed system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Registro,
    LoginExitoso,
    LoginFallidoNoUsuario,
    LoginFallidoPassword,
    LoginFallidoInactivo,
    Logout,
    EditarEmail,
    EditarUsername,
    CambioContrasena,
    CambioEstado,
    RecuperacionContrasena,
    AdminCambioRol,
    AdminCambioEmail,
    AdminForzarPassword,
    EliminarUsuario,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registro => "registro",
            Self::LoginExitoso => "login_exitoso",
            Self::LoginFallidoNoUsuario => "login_fallido_no_usuario",
            Self::LoginFallidoPassword => "login_fallido_password",
            Self::LoginFallidoInactivo => "login_fallido_inactivo",
            Self::Logout => "logout",
            Self::EditarEmail => "editar_email",
            Self::EditarUsername => "editar_username",
            Self::CambioContrasena => "cambio_contrasena",
            Self::CambioEstado => "cambio_estado",
            Self::RecuperacionContrasena => "recuperacion_contrasena",
            Self::AdminCambioRol => "admin_cambio_rol",
            Self::AdminCambioEmail => "admin_cambio_email",
            Self::AdminForzarPassword => "admin_forzar_password",
            Self::EliminarUsuario => "eliminar_usuario",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record. The actor is always a username, never a numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub actor: String,
    pub action: AuditAction,
    pub timestamp: DateTime<Utc>,
    pub source_address: String,
}

#[derive(Clone)]
pub struct AuditLog {
    mirror: Arc<dyn MirrorStore>,
}

impl AuditLog {
    #[must_use]
    pub fn new(mirror: Arc<dyn MirrorStore>) -> Self {
        Self { mirror }
    }

    /// Records an event with the loopback placeholder source.
    pub async fn record(&self, actor: &str, action: AuditAction) {
        self.record_from(actor, action, LOOPBACK_SOURCE).await;
    }

    pub async fn record_from(&self, actor: &str, action: AuditAction, source_address: &str) {
        let entry = AuditLogEntry {
            actor: actor.to_string(),
            action,
            timestamp: Utc::now(),
            source_address: source_address.to_string(),
        };

        if let Err(e) = self.mirror.append_log(entry).await {
            warn!("Audit append failed for '{actor}' ({action}): {e}");
        }
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditLogEntry>, MirrorError> {
        self.mirror.recent_logs(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::MemoryMirror;

    #[test]
    fn action_tags_serialize_to_snake_case() {
        let json = serde_json::to_string(&AuditAction::LoginFallidoNoUsuario).unwrap();
        assert_eq!(json, "\"login_fallido_no_usuario\"");
        assert_eq!(AuditAction::AdminCambioRol.as_str(), "admin_cambio_rol");
    }

    #[tokio::test]
    async fn record_appends_to_mirror() {
        let mirror = Arc::new(MemoryMirror::new());
        let audit = AuditLog::new(mirror.clone());

        audit.record("alice", AuditAction::Registro).await;
        audit
            .record_from("alice", AuditAction::LoginExitoso, "10.0.0.7")
            .await;

        let logs = audit.recent(10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action, AuditAction::LoginExitoso);
        assert_eq!(logs[0].source_address, "10.0.0.7");
        assert_eq!(logs[1].source_address, LOOPBACK_SOURCE);
    }
}

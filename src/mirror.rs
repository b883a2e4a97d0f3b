//! Document mirror of the authoritative store.
//!
//! The mirror is a denormalized, queryable copy keyed by the relational
//! row id (`sql_id`). It is written only after a successful authoritative
//! commit and is rebuildable from the authoritative store, so every write
//! here is best-effort: callers downgrade failures to warnings instead of
//! failing the operation.
//!
//! Two collections: `users` (one document per authoritative row) and
//! `logs` (append-only audit entries, see [`crate::audit`]).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::audit::AuditLogEntry;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("mirror i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("mirror serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Mirrored user document. Field names are the persisted layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDocument {
    /// Correlation key: the authoritative row's primary key.
    pub sql_id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub active: bool,
    pub created_at: String,
}

/// Partial document update, the moral equivalent of a `$set`.
#[derive(Debug, Clone, Default)]
pub struct UserDocumentPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<String>,
    pub active: Option<bool>,
}

impl UserDocumentPatch {
    fn apply(self, doc: &mut UserDocument) {
        if let Some(username) = self.username {
            doc.username = username;
        }
        if let Some(email) = self.email {
            doc.email = email;
        }
        if let Some(password_hash) = self.password_hash {
            doc.password_hash = password_hash;
        }
        if let Some(role) = self.role {
            doc.role = role;
        }
        if let Some(active) = self.active {
            doc.active = active;
        }
    }
}

/// Abstract document-store capability the core needs.
///
/// The core never reads `users` documents to make decisions; `find_user`
/// exists for auxiliary querying and tests.
#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn upsert_user(&self, doc: UserDocument) -> Result<(), MirrorError>;

    async fn set_user_fields(
        &self,
        sql_id: i32,
        patch: UserDocumentPatch,
    ) -> Result<(), MirrorError>;

    async fn delete_user(&self, sql_id: i32) -> Result<(), MirrorError>;

    async fn find_user(&self, sql_id: i32) -> Result<Option<UserDocument>, MirrorError>;

    async fn append_log(&self, entry: AuditLogEntry) -> Result<(), MirrorError>;

    /// Most recent entries first.
    async fn recent_logs(&self, limit: usize) -> Result<Vec<AuditLogEntry>, MirrorError>;
}

/// JSON-file-backed mirror.
///
/// Documents live in two files under a data directory. Writes rewrite the
/// whole collection through a temp file + rename, so a crash mid-write
/// leaves the previous contents intact. Files are re-opened per
/// operation; there is no connection to lose.
pub struct JsonMirror {
    users_path: PathBuf,
    logs_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonMirror {
    pub async fn open(data_dir: &Path) -> Result<Self, MirrorError> {
        tokio::fs::create_dir_all(data_dir).await?;

        Ok(Self {
            users_path: data_dir.join("users.json"),
            logs_path: data_dir.join("logs.json"),
            write_lock: Mutex::new(()),
        })
    }

    async fn read_collection<T: serde::de::DeserializeOwned>(
        path: &Path,
    ) -> Result<Vec<T>, MirrorError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_collection<T: Serialize>(path: &Path, items: &[T]) -> Result<(), MirrorError> {
        let bytes = serde_json::to_vec_pretty(items)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl MirrorStore for JsonMirror {
    async fn upsert_user(&self, doc: UserDocument) -> Result<(), MirrorError> {
        let _guard = self.write_lock.lock().await;
        let mut users: Vec<UserDocument> = Self::read_collection(&self.users_path).await?;

        match users.iter_mut().find(|u| u.sql_id == doc.sql_id) {
            Some(existing) => *existing = doc,
            None => users.push(doc),
        }

        Self::write_collection(&self.users_path, &users).await
    }

    async fn set_user_fields(
        &self,
        sql_id: i32,
        patch: UserDocumentPatch,
    ) -> Result<(), MirrorError> {
        let _guard = self.write_lock.lock().await;
        let mut users: Vec<UserDocument> = Self::read_collection(&self.users_path).await?;

        if let Some(doc) = users.iter_mut().find(|u| u.sql_id == sql_id) {
            patch.apply(doc);
            Self::write_collection(&self.users_path, &users).await?;
        }

        Ok(())
    }

    async fn delete_user(&self, sql_id: i32) -> Result<(), MirrorError> {
        let _guard = self.write_lock.lock().await;
        let mut users: Vec<UserDocument> = Self::read_collection(&self.users_path).await?;

        users.retain(|u| u.sql_id != sql_id);
        Self::write_collection(&self.users_path, &users).await
    }

    async fn find_user(&self, sql_id: i32) -> Result<Option<UserDocument>, MirrorError> {
        let users: Vec<UserDocument> = Self::read_collection(&self.users_path).await?;
        Ok(users.into_iter().find(|u| u.sql_id == sql_id))
    }

    async fn append_log(&self, entry: AuditLogEntry) -> Result<(), MirrorError> {
        let _guard = self.write_lock.lock().await;
        let mut logs: Vec<AuditLogEntry> = Self::read_collection(&self.logs_path).await?;

        logs.push(entry);
        Self::write_collection(&self.logs_path, &logs).await
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<AuditLogEntry>, MirrorError> {
        let mut logs: Vec<AuditLogEntry> = Self::read_collection(&self.logs_path).await?;

        // Reverse before the stable sort so entries sharing a timestamp
        // still come out newest-first.
        logs.reverse();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        logs.truncate(limit);
        Ok(logs)
    }
}

/// In-memory mirror for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryMirror {
    users: Mutex<Vec<UserDocument>>,
    logs: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryMirror {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MirrorStore for MemoryMirror {
    async fn upsert_user(&self, doc: UserDocument) -> Result<(), MirrorError> {
        let mut users = self.users.lock().await;
        match users.iter_mut().find(|u| u.sql_id == doc.sql_id) {
            Some(existing) => *existing = doc,
            None => users.push(doc),
        }
        Ok(())
    }

    async fn set_user_fields(
        &self,
        sql_id: i32,
        patch: UserDocumentPatch,
    ) -> Result<(), MirrorError> {
        let mut users = self.users.lock().await;
        if let Some(doc) = users.iter_mut().find(|u| u.sql_id == sql_id) {
            patch.apply(doc);
        }
        Ok(())
    }

    async fn delete_user(&self, sql_id: i32) -> Result<(), MirrorError> {
        let mut users = self.users.lock().await;
        users.retain(|u| u.sql_id != sql_id);
        Ok(())
    }

    async fn find_user(&self, sql_id: i32) -> Result<Option<UserDocument>, MirrorError> {
        let users = self.users.lock().await;
        Ok(users.iter().find(|u| u.sql_id == sql_id).cloned())
    }

    async fn append_log(&self, entry: AuditLogEntry) -> Result<(), MirrorError> {
        let mut logs = self.logs.lock().await;
        logs.push(entry);
        Ok(())
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<AuditLogEntry>, MirrorError> {
        let logs = self.logs.lock().await;
        let mut out: Vec<AuditLogEntry> = logs.iter().rev().cloned().collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        out.truncate(limit);
        Ok(out)
    }
}

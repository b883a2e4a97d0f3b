//! Authoritative relational store.
//!
//! The `users` table here is the single source of truth for identity,
//! existence and uniqueness. The document mirror (see [`crate::mirror`])
//! is written after, and never consulted for, any decision made at this
//! layer.

use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub mod migrator;
pub mod repositories;

pub use repositories::user::RepoError;

use crate::models::{NewUser, User, UserPatch};
use repositories::user::UserRepository;

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn connect(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        let path_str = db_url.trim_start_matches("sqlite:");
        if !path_str.starts_with(":memory:") {
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Authoritative store connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    /// Probes the connection and retries once before giving up.
    ///
    /// The pool reestablishes dropped connections on its own; a second
    /// failed probe means the store is genuinely unreachable and the
    /// calling operation must abort.
    pub async fn ensure_connected(&self) -> Result<()> {
        if let Err(first) = self.ping().await {
            warn!("Authoritative store probe failed, retrying: {first}");
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.ping().await?;
        }
        Ok(())
    }

    fn user_repo(&self) -> UserRepository {
        UserRepository::new(self.conn.clone())
    }

    pub async fn create_user(&self, candidate: NewUser) -> Result<User, RepoError> {
        self.user_repo().create(candidate).await
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        self.user_repo().find_by_username(username).await
    }

    pub async fn find_user_with_hash(
        &self,
        username: &str,
    ) -> Result<Option<(User, String)>, RepoError> {
        self.user_repo().find_by_username_with_hash(username).await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        self.user_repo().find_by_email(email).await
    }

    pub async fn find_user_by_id(&self, id: i32) -> Result<Option<User>, RepoError> {
        self.user_repo().find_by_id(id).await
    }

    pub async fn update_user(&self, id: i32, patch: UserPatch) -> Result<User, RepoError> {
        self.user_repo().update(id, patch).await
    }

    pub async fn delete_user(&self, id: i32) -> Result<bool, RepoError> {
        self.user_repo().delete(id).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>, RepoError> {
        self.user_repo().list_all().await
    }
}

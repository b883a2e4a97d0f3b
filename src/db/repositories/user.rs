use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use thiserror::Error;

use crate::entities::{prelude::*, users};
use crate::models::{NewUser, User, UserPatch};

/// Errors surfaced by the authoritative store.
///
/// `Duplicate` is produced by the in-transaction pre-check; the schema-level
/// unique indexes remain the last line of defense and map to the same
/// variant if a race slips past the pre-check.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{0} already exists")]
    Duplicate(&'static str),

    #[error("user not found")]
    NotFound,

    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

fn map_unique_violation(err: sea_orm::DbErr) -> RepoError {
    let msg = err.to_string();
    if msg.contains("UNIQUE constraint failed") || msg.contains("unique constraint") {
        if msg.contains("email") {
            RepoError::Duplicate("email")
        } else {
            RepoError::Duplicate("username")
        }
    } else {
        RepoError::Db(err)
    }
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Inserts a new user inside a transaction.
    ///
    /// Uniqueness of username and email is re-checked within the transaction
    /// before the insert so callers get a field-specific [`RepoError::Duplicate`]
    /// instead of a raw constraint error. The generated id is captured before
    /// commit and returned with the full row.
    pub async fn create(&self, candidate: NewUser) -> Result<User, RepoError> {
        let txn = self.conn.begin().await?;

        let clash = Users::find()
            .filter(
                Condition::any()
                    .add(users::Column::Username.eq(&candidate.username))
                    .add(users::Column::Email.eq(&candidate.email)),
            )
            .one(&txn)
            .await?;

        if let Some(existing) = clash {
            let field = if existing.username == candidate.username {
                "username"
            } else {
                "email"
            };
            txn.rollback().await?;
            return Err(RepoError::Duplicate(field));
        }

        let created_at = chrono::Utc::now().to_rfc3339();

        let result = Users::insert(users::ActiveModel {
            username: Set(candidate.username),
            email: Set(candidate.email),
            password_hash: Set(candidate.password_hash),
            role: Set(candidate.role.as_str().to_string()),
            active: Set(candidate.active),
            created_at: Set(created_at),
            ..Default::default()
        })
        .exec(&txn)
        .await
        .map_err(map_unique_violation)?;

        let id = result.last_insert_id;
        let model = Users::find_by_id(id)
            .one(&txn)
            .await?
            .ok_or(RepoError::NotFound)?;

        txn.commit().await?;
        Ok(User::from(model))
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepoError> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await?;

        Ok(user.map(User::from))
    }

    /// Same lookup as [`find_by_username`] but keeps the stored hash,
    /// for credential verification only.
    ///
    /// [`find_by_username`]: Self::find_by_username
    pub async fn find_by_username_with_hash(
        &self,
        username: &str,
    ) -> Result<Option<(User, String)>, RepoError> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await?;

        Ok(user.map(|u| {
            let password_hash = u.password_hash.clone();
            (User::from(u), password_hash)
        }))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        let user = Users::find()
            .filter(users::Column::Email.eq(email))
            .one(&self.conn)
            .await?;

        Ok(user.map(User::from))
    }

    pub async fn find_by_id(&self, id: i32) -> Result<Option<User>, RepoError> {
        let user = Users::find_by_id(id).one(&self.conn).await?;

        Ok(user.map(User::from))
    }

    /// Applies a partial update to the authoritative row.
    ///
    /// Username and email changes re-check uniqueness excluding the target
    /// row itself, so a user renaming to their own current name is not a
    /// conflict.
    pub async fn update(&self, id: i32, patch: UserPatch) -> Result<User, RepoError> {
        if let Some(ref username) = patch.username {
            let clash = Users::find()
                .filter(users::Column::Username.eq(username))
                .filter(users::Column::Id.ne(id))
                .one(&self.conn)
                .await?;
            if clash.is_some() {
                return Err(RepoError::Duplicate("username"));
            }
        }

        if let Some(ref email) = patch.email {
            let clash = Users::find()
                .filter(users::Column::Email.eq(email))
                .filter(users::Column::Id.ne(id))
                .one(&self.conn)
                .await?;
            if clash.is_some() {
                return Err(RepoError::Duplicate("email"));
            }
        }

        let user = Users::find_by_id(id)
            .one(&self.conn)
            .await?
            .ok_or(RepoError::NotFound)?;

        let mut active_model: users::ActiveModel = user.into();
        if let Some(username) = patch.username {
            active_model.username = Set(username);
        }
        if let Some(email) = patch.email {
            active_model.email = Set(email);
        }
        if let Some(password_hash) = patch.password_hash {
            active_model.password_hash = Set(password_hash);
        }
        if let Some(role) = patch.role {
            active_model.role = Set(role.as_str().to_string());
        }
        if let Some(active) = patch.active {
            active_model.active = Set(active);
        }

        let model = active_model
            .update(&self.conn)
            .await
            .map_err(map_unique_violation)?;

        Ok(User::from(model))
    }

    /// Deletes the row. Returns `false` when no row matched.
    pub async fn delete(&self, id: i32) -> Result<bool, RepoError> {
        let result = Users::delete_by_id(id).exec(&self.conn).await?;
        Ok(result.rows_affected > 0)
    }

    pub async fn list_all(&self) -> Result<Vec<User>, RepoError> {
        let users = Users::find()
            .order_by_asc(users::Column::Id)
            .all(&self.conn)
            .await?;

        Ok(users.into_iter().map(User::from).collect())
    }
}

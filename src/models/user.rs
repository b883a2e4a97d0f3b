use serde::{Deserialize, Serialize};

use crate::entities::users;

/// Role attached to every account. Anything that is not `admin` is a
/// plain user, including typos coming from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// Normalizes free-form input; unknown values fall back to [`Role::User`].
    #[must_use]
    pub fn parse(input: &str) -> Self {
        match input.trim().to_lowercase().as_str() {
            "admin" => Self::Admin,
            _ => Self::User,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User data returned from the repository (without the password hash).
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    pub created_at: String,
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            email: model.email,
            role: Role::parse(&model.role),
            active: model.active,
            created_at: model.created_at,
        }
    }
}

/// Candidate record for a registration insert. The password arrives
/// already hashed; plaintext never reaches the repository.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub active: bool,
}

/// Partial update applied to an existing authoritative row.
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
}

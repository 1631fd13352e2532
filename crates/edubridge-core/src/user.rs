//! User accounts and roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of an account. Decides which capabilities a caller has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Learner; receives and answers invitations.
    Student,
    /// Schedules sessions and invites students.
    Tutor,
    /// Manages accounts and reads the audit log.
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Student => write!(f, "STUDENT"),
            Self::Tutor => write!(f, "TUTOR"),
            Self::Admin => write!(f, "ADMIN"),
        }
    }
}

/// A stored account.
///
/// The password hash is part of the persisted snapshot; clients only ever
/// see [`UserView`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Unique identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Login email, stored lowercase.
    pub email: String,
    /// Account role.
    pub role: Role,
    /// bcrypt hash of the password.
    pub password_hash: String,
    /// Inactive accounts cannot log in or use existing tokens.
    pub active: bool,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Creates an active account. The email is normalised to lowercase.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        email: &str,
        role: Role,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            email: normalize_email(email),
            role,
            password_hash: password_hash.into(),
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Public projection without the password hash.
    #[must_use]
    pub fn view(&self) -> UserView {
        UserView {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            active: self.active,
            created_at: self.created_at,
        }
    }
}

/// Account as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    /// Unique identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Account role.
    pub role: Role,
    /// Whether the account may log in.
    pub active: bool,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

/// Lowercases and trims an email for storage and lookup.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

//! Authentication and role capabilities.
//!
//! Clients authenticate with a bearer JWT (HS256) issued at login. The token
//! only names the account; role and active flag are re-read from the store
//! on every request, so role changes and deactivation take effect at once.

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ApiError;
use crate::config::AuthConfig;
use crate::error::{EduError, Result};
use crate::state::AppState;
use crate::user::{Role, User};

// ============================================================================
// Capabilities
// ============================================================================

/// Something a caller may do. Each role grants a fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Create new sessions.
    ScheduleSessions,
    /// View, invite to, remind for, change and delete sessions (own sessions
    /// for tutors, any session for admins).
    ManageSessions,
    /// Answer one's own invitations.
    RespondToInvitations,
    /// See today's sessions.
    ViewSchedule,
    /// List accounts and change roles or active flags.
    ManageUsers,
    /// Read the audit log.
    ViewAuditLog,
    /// Subscribe to the live event feed.
    WatchEvents,
}

impl Role {
    /// Returns `true` if this role grants `capability`.
    #[must_use]
    pub const fn can(self, capability: Capability) -> bool {
        use Capability::{
            ManageSessions, ManageUsers, RespondToInvitations, ScheduleSessions, ViewAuditLog,
            ViewSchedule, WatchEvents,
        };
        match self {
            Self::Student => matches!(capability, RespondToInvitations | ViewSchedule),
            Self::Tutor => matches!(
                capability,
                ScheduleSessions | ManageSessions | ViewSchedule | WatchEvents
            ),
            Self::Admin => matches!(
                capability,
                ManageSessions | ViewSchedule | ManageUsers | ViewAuditLog | WatchEvents
            ),
        }
    }
}

// ============================================================================
// Tokens
// ============================================================================

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Account id.
    pub sub: String,
    /// Role at issue time. Informational; the store is authoritative.
    pub role: Role,
    /// Issued-at (seconds since epoch).
    pub iat: i64,
    /// Expiry (seconds since epoch).
    pub exp: i64,
}

/// Issues and verifies HS256 bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    secret: String,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenService {
    /// Creates a token service.
    #[must_use]
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        Self {
            secret: secret.into(),
            ttl,
        }
    }

    /// Creates a token service from the `auth` config section.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.jwt_secret.clone(),
            Duration::hours(i64::from(config.token_ttl_hours)),
        )
    }

    /// Signs a token for `user`.
    pub fn issue(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role,
            iat: now.timestamp(),
            exp: (now + self.ttl).timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| EduError::internal(format!("failed to sign token: {e}")))
    }

    /// Verifies signature and expiry and returns the claims.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => EduError::unauthorized("token has expired"),
            _ => EduError::unauthorized("invalid token"),
        })
    }
}

// ============================================================================
// Passwords
// ============================================================================

/// Hashes `password` with bcrypt at `cost`.
pub fn hash_password(password: &str, cost: u32) -> Result<String> {
    bcrypt::hash(password, cost)
        .map_err(|e| EduError::internal(format!("failed to hash password: {e}")))
}

/// Checks `password` against a bcrypt hash. Malformed hashes never match.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

// ============================================================================
// Authenticated caller
// ============================================================================

/// The caller behind a verified bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// Account id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Current role from the store.
    pub role: Role,
}

impl AuthUser {
    /// Fails with `Forbidden` unless the caller's role grants `capability`.
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.role.can(capability) {
            Ok(())
        } else {
            Err(EduError::forbidden(format!(
                "role {} is not allowed to perform this action",
                self.role
            )))
        }
    }

    /// Returns `true` for administrators.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            role: user.role,
        }
    }
}

/// Resolves a raw token to the current account.
///
/// # Errors
///
/// Returns `EduError::Unauthorized` if the token is invalid or expired, or
/// the account is gone or deactivated.
pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthUser> {
    let claims = state.tokens.verify(token)?;
    let id =
        Uuid::parse_str(&claims.sub).map_err(|_| EduError::unauthorized("invalid token"))?;

    let store = state.store.lock().await;
    let user = store
        .user(id)
        .map_err(|_| EduError::unauthorized("account no longer exists"))?;
    if !user.active {
        return Err(EduError::unauthorized("account is deactivated"));
    }
    Ok(AuthUser::from(user))
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| EduError::unauthorized("missing bearer token"))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EduError::unauthorized("malformed authorization header"))?;

        Ok(authenticate(state, token).await?)
    }
}

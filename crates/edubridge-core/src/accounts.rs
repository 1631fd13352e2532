//! Account registration, login and administration.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry};
use crate::auth::{hash_password, verify_password, AuthUser, Capability};
use crate::error::{EduError, Result};
use crate::state::AppState;
use crate::user::{normalize_email, Role, User, UserView};

/// Shortest accepted password.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Longest accepted display name.
const MAX_NAME_LEN: usize = 100;

/// Default number of audit entries returned.
pub const DEFAULT_AUDIT_LIMIT: usize = 50;

/// Most audit entries returned in one page.
pub const MAX_AUDIT_LIMIT: usize = 500;

static EMAIL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /auth/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Display name.
    pub name: String,
    /// Login email.
    pub email: String,
    /// Plain-text password.
    pub password: String,
    /// `STUDENT` or `TUTOR`.
    pub role: Role,
}

/// Request body for `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Login email.
    pub email: String,
    /// Plain-text password.
    pub password: String,
}

/// Token and account returned by register and login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    /// Bearer token.
    pub token: String,
    /// The account.
    pub user: UserView,
}

/// Request body for `PATCH /admin/users/:id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    /// New role.
    #[serde(default)]
    pub role: Option<Role>,
    /// New active flag.
    #[serde(default)]
    pub active: Option<bool>,
}

// ============================================================================
// Validation
// ============================================================================

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EduError::validation("name is required"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(EduError::validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_email(email: &str) -> Result<String> {
    let email = normalize_email(email);
    if !EMAIL_RE.as_ref().is_some_and(|re| re.is_match(&email)) {
        return Err(EduError::validation("email address is not valid"));
    }
    Ok(email)
}

/// Checks the password length policy.
pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(EduError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

// ============================================================================
// Operations
// ============================================================================

/// Creates a student or tutor account and logs it in.
///
/// # Errors
///
/// `Validation` for bad fields, `Forbidden` for a self-assigned `ADMIN`
/// role, `Conflict` if the email is taken.
pub async fn register(state: &AppState, request: RegisterRequest) -> Result<AuthPayload> {
    if request.role == Role::Admin {
        return Err(EduError::forbidden(
            "administrator accounts cannot be self-registered",
        ));
    }
    let name = validate_name(&request.name)?;
    let email = validate_email(&request.email)?;
    validate_password(&request.password)?;

    if state.store.lock().await.user_by_email(&email).is_some() {
        return Err(EduError::conflict(format!(
            "an account with email {email} already exists"
        )));
    }

    let hash = hash_password(&request.password, state.config.auth.bcrypt_cost)?;
    let user = User::new(name, &email, request.role, hash);
    let token = state.tokens.issue(&user)?;
    let view = user.view();

    state.store.lock().await.insert_user(user)?;
    info!(user_id = %view.id, role = %view.role, "Account registered");

    Ok(AuthPayload { token, user: view })
}

/// Checks credentials and issues a token.
///
/// Unknown emails and wrong passwords produce the same message.
pub async fn login(state: &AppState, request: LoginRequest) -> Result<AuthPayload> {
    let user = state
        .store
        .lock()
        .await
        .user_by_email(&request.email)
        .cloned();

    let Some(user) = user.filter(|u| verify_password(&request.password, &u.password_hash))
    else {
        warn!("Failed login attempt");
        return Err(EduError::unauthorized("invalid email or password"));
    };
    if !user.active {
        return Err(EduError::unauthorized("account is deactivated"));
    }

    let token = state.tokens.issue(&user)?;
    info!(user_id = %user.id, "Login succeeded");
    Ok(AuthPayload {
        token,
        user: user.view(),
    })
}

/// The caller's own account.
pub async fn me(state: &AppState, caller: &AuthUser) -> Result<UserView> {
    Ok(state.store.lock().await.user(caller.id)?.view())
}

/// Creates the configured administrator if no admin exists yet.
///
/// Returns `true` if an account was created.
pub async fn ensure_bootstrap_admin(state: &AppState) -> Result<bool> {
    let Some(admin) = state.config.bootstrap_admin.as_ref() else {
        return Ok(false);
    };
    if state.store.lock().await.has_admin() {
        return Ok(false);
    }

    let name = validate_name(&admin.name)?;
    let email = validate_email(&admin.email)?;
    validate_password(&admin.password)?;
    let hash = hash_password(&admin.password, state.config.auth.bcrypt_cost)?;

    let mut store = state.store.lock().await;
    if store.has_admin() {
        return Ok(false);
    }
    if let Some(existing) = store.user_by_email(&email).map(|u| u.id) {
        // Promote the existing account rather than failing on the email.
        let user = store.user_mut(existing)?;
        user.role = Role::Admin;
        user.active = true;
        info!(user_id = %existing, "Promoted existing account to bootstrap admin");
        return Ok(true);
    }

    let user = User::new(name, &email, Role::Admin, hash);
    let id = user.id;
    store.insert_user(user)?;
    info!(user_id = %id, "Created bootstrap admin");
    Ok(true)
}

/// All accounts, oldest first.
pub async fn list_users(state: &AppState, caller: &AuthUser) -> Result<Vec<UserView>> {
    caller.require(Capability::ManageUsers)?;
    let store = state.store.lock().await;
    Ok(store.users().into_iter().map(User::view).collect())
}

/// Changes another account's role and/or active flag, recording each change
/// in the audit log.
pub async fn update_user(
    state: &AppState,
    caller: &AuthUser,
    user_id: Uuid,
    update: UpdateUserRequest,
) -> Result<UserView> {
    caller.require(Capability::ManageUsers)?;
    if update.role.is_none() && update.active.is_none() {
        return Err(EduError::validation("nothing to update: set role or active"));
    }
    if user_id == caller.id {
        return Err(EduError::forbidden(
            "administrators cannot change their own role or active flag",
        ));
    }

    let mut store = state.store.lock().await;
    let current = store.user(user_id)?.clone();
    let mut entries = Vec::new();

    if let Some(role) = update.role.filter(|r| *r != current.role) {
        entries.push(AuditEntry::new(
            caller.id,
            AuditAction::UserRoleChanged,
            user_id,
            format!("{} -> {role}", current.role),
        ));
    }
    match update.active {
        Some(false) if current.active => entries.push(AuditEntry::new(
            caller.id,
            AuditAction::UserDeactivated,
            user_id,
            current.email.clone(),
        )),
        Some(true) if !current.active => entries.push(AuditEntry::new(
            caller.id,
            AuditAction::UserReactivated,
            user_id,
            current.email.clone(),
        )),
        _ => {}
    }

    if entries.is_empty() {
        return Ok(current.view());
    }

    let user = store.user_mut(user_id)?;
    if let Some(role) = update.role {
        user.role = role;
    }
    if let Some(active) = update.active {
        user.active = active;
    }
    let view = user.view();

    for entry in entries {
        info!(
            admin_id = %caller.id,
            user_id = %user_id,
            action = ?entry.action,
            "User updated"
        );
        store.record_audit(entry);
    }
    Ok(view)
}

/// Most recent audit entries, newest first.
///
/// `limit` defaults to 50 and is capped at 500.
pub async fn audit_log(
    state: &AppState,
    caller: &AuthUser,
    limit: Option<usize>,
) -> Result<Vec<AuditEntry>> {
    caller.require(Capability::ViewAuditLog)?;
    let limit = limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    let store = state.store.lock().await;
    Ok(store.audit_log(limit).into_iter().cloned().collect())
}

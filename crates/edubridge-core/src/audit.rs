//! Append-only audit trail of administrative actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Administrative action recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// An admin changed a user's role.
    UserRoleChanged,
    /// An admin deactivated a user.
    UserDeactivated,
    /// An admin reactivated a user.
    UserReactivated,
    /// A session and its bookings were deleted.
    SessionDeleted,
    /// A session was cancelled.
    SessionCancelled,
}

/// One audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Unique identifier.
    pub id: Uuid,
    /// User who performed the action.
    pub actor_id: Uuid,
    /// What happened.
    pub action: AuditAction,
    /// Record the action applied to.
    pub target_id: Uuid,
    /// Human-readable detail, e.g. "TUTOR -> ADMIN".
    pub detail: String,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    /// Creates an entry stamped now.
    #[must_use]
    pub fn new(
        actor_id: Uuid,
        action: AuditAction,
        target_id: Uuid,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id,
            action,
            target_id,
            detail: detail.into(),
            at: Utc::now(),
        }
    }
}

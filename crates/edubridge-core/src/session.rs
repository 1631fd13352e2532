//! Tutoring sessions and their lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EduError, Result};

/// Longest accepted session subject.
const MAX_SUBJECT_LEN: usize = 200;

// ============================================================================
// SessionType
// ============================================================================

/// Format of a tutoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionType {
    /// One tutor, one student.
    OneOnOne,
    /// One tutor, several students.
    Group,
}

impl SessionType {
    /// Human label used in emails.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::OneOnOne => "one-on-one",
            Self::Group => "group",
        }
    }
}

// ============================================================================
// SessionStatus
// ============================================================================

/// Lifecycle status of a session.
///
/// - `Scheduled` -> `InProgress` -> `Completed`
/// - `Scheduled` | `InProgress` -> `Cancelled`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Planned; invitations may be sent.
    #[default]
    Scheduled,
    /// Running now.
    InProgress,
    /// Finished.
    Completed,
    /// Called off.
    Cancelled,
}

impl SessionStatus {
    /// Returns `true` for `Completed` and `Cancelled`.
    ///
    /// # Examples
    ///
    /// ```
    /// use edubridge_core::SessionStatus;
    ///
    /// assert!(SessionStatus::Cancelled.is_terminal());
    /// assert!(!SessionStatus::InProgress.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Returns `true` if a session may move from `self` to `to`.
    #[must_use]
    pub const fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Scheduled, Self::InProgress | Self::Cancelled)
                | (Self::InProgress, Self::Completed | Self::Cancelled)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "SCHEDULED"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

// ============================================================================
// NewSession
// ============================================================================

/// Request body for scheduling a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    /// What the session covers.
    pub subject: String,
    /// Optional longer description.
    #[serde(default)]
    pub description: Option<String>,
    /// Start time.
    pub scheduled_start: DateTime<Utc>,
    /// End time.
    pub scheduled_end: DateTime<Utc>,
    /// Session format.
    pub session_type: SessionType,
    /// Most students that may confirm.
    pub max_participants: u32,
    /// Video call link.
    #[serde(default)]
    pub meeting_url: Option<String>,
}

impl NewSession {
    /// Checks the request before a session is created from it.
    pub fn validate(&self) -> Result<()> {
        let subject = self.subject.trim();
        if subject.is_empty() {
            return Err(EduError::validation("subject is required"));
        }
        if subject.chars().count() > MAX_SUBJECT_LEN {
            return Err(EduError::validation(format!(
                "subject must be at most {MAX_SUBJECT_LEN} characters"
            )));
        }
        if self.scheduled_end <= self.scheduled_start {
            return Err(EduError::validation(
                "scheduledEnd must be after scheduledStart",
            ));
        }
        if self.max_participants == 0 {
            return Err(EduError::validation(
                "maxParticipants must be at least 1",
            ));
        }
        if self.session_type == SessionType::OneOnOne && self.max_participants != 1 {
            return Err(EduError::validation(
                "a ONE_ON_ONE session has exactly one participant",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// TutoringSession
// ============================================================================

/// A scheduled tutoring session owned by a tutor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutoringSession {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning tutor.
    pub tutor_id: Uuid,
    /// What the session covers.
    pub subject: String,
    /// Optional longer description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Start time.
    pub scheduled_start: DateTime<Utc>,
    /// End time.
    pub scheduled_end: DateTime<Utc>,
    /// Session format.
    pub session_type: SessionType,
    /// Most students that may confirm.
    pub max_participants: u32,
    /// Video call link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<String>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session last changed.
    pub updated_at: DateTime<Utc>,
}

impl TutoringSession {
    /// Validates `draft` and creates a `Scheduled` session for `tutor_id`.
    pub fn schedule(tutor_id: Uuid, draft: NewSession) -> Result<Self> {
        draft.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            tutor_id,
            subject: draft.subject.trim().to_string(),
            description: draft
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            scheduled_start: draft.scheduled_start,
            scheduled_end: draft.scheduled_end,
            session_type: draft.session_type,
            max_participants: draft.max_participants,
            meeting_url: draft
                .meeting_url
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
            status: SessionStatus::Scheduled,
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns `true` while invitations may be sent.
    #[must_use]
    pub fn accepts_invitations(&self) -> bool {
        self.status == SessionStatus::Scheduled
    }

    /// Moves the session to `to`.
    ///
    /// # Errors
    ///
    /// Returns `EduError::InvalidStateTransition` if the lifecycle does not
    /// allow the move.
    pub fn transition(&mut self, to: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(EduError::invalid_transition(self.status, to));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Returns `true` if the session starts on `date` (UTC).
    #[must_use]
    pub fn starts_on(&self, date: chrono::NaiveDate) -> bool {
        self.scheduled_start.date_naive() == date
    }
}

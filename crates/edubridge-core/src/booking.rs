//! Bookings: one student's invitation to one session.
//!
//! A booking starts `PENDING` when the invitation is created and records the
//! student's answer, the delivery history of the invitation email and the
//! engagement signals reported by the email provider.
//!
//! ```text
//! PENDING --confirm--> CONFIRMED
//! PENDING --decline--> DECLINED
//! PENDING --session closed--> NO_RESPONSE
//! PENDING --reschedule--> PENDING (with proposal)
//! ```

use chrono::{DateTime, Utc};
use edubridge_mailer::{SendReceipt, TrackingEvent, TrackingKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EduError, Result};

/// Most preferred times a student may propose.
pub const MAX_PREFERRED_TIMES: usize = 5;

/// Longest accepted free-text reason.
const MAX_REASON_LEN: usize = 1000;

// ============================================================================
// ResponseStatus
// ============================================================================

/// The student's answer to an invitation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    /// No answer yet.
    #[default]
    Pending,
    /// Student will attend.
    Confirmed,
    /// Student will not attend.
    Declined,
    /// Session closed before the student answered.
    NoResponse,
}

impl ResponseStatus {
    /// Returns `true` once no further answer is accepted.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Confirmed => write!(f, "CONFIRMED"),
            Self::Declined => write!(f, "DECLINED"),
            Self::NoResponse => write!(f, "NO_RESPONSE"),
        }
    }
}

impl std::str::FromStr for ResponseStatus {
    type Err = EduError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "DECLINED" => Ok(Self::Declined),
            "NO_RESPONSE" => Ok(Self::NoResponse),
            other => Err(EduError::validation(format!(
                "unknown response status '{other}'"
            ))),
        }
    }
}

/// Result of applying an answer to a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The booking changed.
    Applied,
    /// The booking already held this answer.
    Unchanged,
}

// ============================================================================
// RescheduleRequest
// ============================================================================

/// A student's proposal to move the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    /// Why the current time does not work.
    pub reason: String,
    /// Proposed alternative start times, earliest first.
    #[serde(default)]
    pub preferred_times: Vec<DateTime<Utc>>,
    /// When the proposal was made.
    pub requested_at: DateTime<Utc>,
}

/// Engagement flags shown to tutors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    /// The invitation was handed to the provider.
    pub sent: bool,
    /// The provider reported delivery.
    pub delivered: bool,
    /// The student opened the email.
    pub opened: bool,
    /// The student clicked a link in the email.
    pub clicked: bool,
}

// ============================================================================
// Booking
// ============================================================================

/// One student's invitation to one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// Unique identifier; also the invitation reference in emails.
    pub id: Uuid,
    /// Session the student is invited to.
    pub session_id: Uuid,
    /// Invited student.
    pub student_id: Uuid,
    /// Current answer.
    pub response_status: ResponseStatus,

    /// Last time an invitation email was accepted by the provider.
    pub sent_at: Option<DateTime<Utc>>,
    /// Invitation emails accepted so far (first send plus resends).
    #[serde(default)]
    pub send_count: u32,
    /// Provider id of the latest invitation email.
    pub message_id: Option<String>,
    /// Every provider id sent for this booking, invitations and reminders.
    #[serde(default)]
    pub message_ids: Vec<String>,
    /// First delivery report.
    pub delivered_at: Option<DateTime<Utc>>,
    /// First open report.
    pub opened_at: Option<DateTime<Utc>>,
    /// First click report.
    pub clicked_at: Option<DateTime<Utc>>,
    /// Why the latest send or delivery failed.
    pub failure_reason: Option<String>,

    /// When the student answered.
    pub responded_at: Option<DateTime<Utc>>,
    /// Optional reason given when declining.
    pub decline_reason: Option<String>,
    /// Latest reschedule proposal.
    pub reschedule: Option<RescheduleRequest>,
    /// Last reminder accepted by the provider.
    pub last_reminded_at: Option<DateTime<Utc>>,

    /// When the invitation was created.
    pub created_at: DateTime<Utc>,
    /// When the booking last changed.
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Creates a `PENDING` booking for `student_id` on `session_id`.
    #[must_use]
    pub fn new(session_id: Uuid, student_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            student_id,
            response_status: ResponseStatus::Pending,
            sent_at: None,
            send_count: 0,
            message_id: None,
            message_ids: Vec::new(),
            delivered_at: None,
            opened_at: None,
            clicked_at: None,
            failure_reason: None,
            responded_at: None,
            decline_reason: None,
            reschedule: None,
            last_reminded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fails with `Forbidden` unless `student_id` holds this booking.
    pub fn ensure_held_by(&self, student_id: Uuid) -> Result<()> {
        if self.student_id == student_id {
            Ok(())
        } else {
            Err(EduError::forbidden(
                "this invitation belongs to another student",
            ))
        }
    }

    /// Returns `true` while a reschedule proposal awaits the tutor.
    #[must_use]
    pub fn reschedule_requested(&self) -> bool {
        self.response_status == ResponseStatus::Pending && self.reschedule.is_some()
    }

    // ------------------------------------------------------------------------
    // Student answers
    // ------------------------------------------------------------------------

    /// Records attendance. Repeating a confirmation changes nothing.
    pub fn confirm(&mut self) -> Result<Transition> {
        match self.response_status {
            ResponseStatus::Confirmed => Ok(Transition::Unchanged),
            ResponseStatus::Pending => {
                let now = Utc::now();
                self.response_status = ResponseStatus::Confirmed;
                self.responded_at = Some(now);
                self.updated_at = now;
                Ok(Transition::Applied)
            }
            from => Err(EduError::invalid_transition(from, ResponseStatus::Confirmed)),
        }
    }

    /// Records a refusal with an optional reason. Repeating it changes nothing.
    pub fn decline(&mut self, reason: Option<&str>) -> Result<Transition> {
        let reason = normalize_reason(reason)?;
        match self.response_status {
            ResponseStatus::Declined => Ok(Transition::Unchanged),
            ResponseStatus::Pending => {
                let now = Utc::now();
                self.response_status = ResponseStatus::Declined;
                self.decline_reason = reason;
                self.responded_at = Some(now);
                self.updated_at = now;
                Ok(Transition::Applied)
            }
            from => Err(EduError::invalid_transition(from, ResponseStatus::Declined)),
        }
    }

    /// Attaches a reschedule proposal. The booking stays `PENDING` and a
    /// newer proposal replaces an older one.
    pub fn request_reschedule(
        &mut self,
        reason: Option<&str>,
        mut preferred_times: Vec<DateTime<Utc>>,
    ) -> Result<()> {
        let Some(reason) = normalize_reason(reason)? else {
            return Err(EduError::validation(
                "a reason is required to request a reschedule",
            ));
        };
        if self.response_status != ResponseStatus::Pending {
            return Err(EduError::invalid_transition(
                self.response_status,
                "RESCHEDULE_REQUESTED",
            ));
        }

        preferred_times.sort_unstable();
        preferred_times.dedup();
        if preferred_times.len() > MAX_PREFERRED_TIMES {
            return Err(EduError::validation(format!(
                "at most {MAX_PREFERRED_TIMES} preferred times may be proposed"
            )));
        }

        let now = Utc::now();
        self.reschedule = Some(RescheduleRequest {
            reason,
            preferred_times,
            requested_at: now,
        });
        self.responded_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Marks an unanswered invitation as `NO_RESPONSE`. Returns `true` if
    /// the booking changed.
    pub fn close_unanswered(&mut self) -> bool {
        if self.response_status != ResponseStatus::Pending {
            return false;
        }
        self.response_status = ResponseStatus::NoResponse;
        self.updated_at = Utc::now();
        true
    }

    // ------------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------------

    /// Records an accepted invitation email.
    pub fn record_sent(&mut self, receipt: &SendReceipt) {
        self.sent_at = Some(receipt.accepted_at);
        self.send_count += 1;
        self.message_id = Some(receipt.message_id.clone());
        self.message_ids.push(receipt.message_id.clone());
        self.failure_reason = None;
        self.updated_at = Utc::now();
    }

    /// Records an accepted reminder email.
    pub fn record_reminder(&mut self, receipt: &SendReceipt) {
        self.last_reminded_at = Some(receipt.accepted_at);
        self.message_ids.push(receipt.message_id.clone());
        self.updated_at = Utc::now();
    }

    /// Records a failed send. Earlier delivery history is kept.
    pub fn record_send_failure(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// Returns `true` if `message_id` was sent for this booking.
    #[must_use]
    pub fn owns_message(&self, message_id: &str) -> bool {
        self.message_ids.iter().any(|id| id == message_id)
    }

    /// Applies a provider tracking event.
    ///
    /// The first timestamp of each signal wins. An open implies delivery and
    /// a click implies an open. Returns `true` if anything changed.
    pub fn apply_tracking(&mut self, event: &TrackingEvent) -> bool {
        let at = event.timestamp;
        let mut changed = false;
        let mut stamp = |slot: &mut Option<DateTime<Utc>>| {
            if slot.is_none() {
                *slot = Some(at);
                changed = true;
            }
        };

        match event.event {
            TrackingKind::Delivered => stamp(&mut self.delivered_at),
            TrackingKind::Opened => {
                stamp(&mut self.delivered_at);
                stamp(&mut self.opened_at);
            }
            TrackingKind::Clicked => {
                stamp(&mut self.delivered_at);
                stamp(&mut self.opened_at);
                stamp(&mut self.clicked_at);
            }
            TrackingKind::Bounced => {
                let reason = event
                    .reason
                    .clone()
                    .unwrap_or_else(|| "bounced".to_string());
                if self.failure_reason.as_deref() != Some(reason.as_str()) {
                    self.failure_reason = Some(reason);
                    changed = true;
                }
            }
        }

        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Engagement flags derived from the delivery history.
    #[must_use]
    pub fn engagement(&self) -> Engagement {
        Engagement {
            sent: self.sent_at.is_some(),
            delivered: self.delivered_at.is_some(),
            opened: self.opened_at.is_some(),
            clicked: self.clicked_at.is_some(),
        }
    }
}

/// Trims a free-text reason; blank becomes `None`.
fn normalize_reason(reason: Option<&str>) -> Result<Option<String>> {
    let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if reason.chars().count() > MAX_REASON_LEN {
        return Err(EduError::validation(format!(
            "reason must be at most {MAX_REASON_LEN} characters"
        )));
    }
    Ok(Some(reason.to_string()))
}

//! The invitation workflow: invite, answer, resend, remind, summarize and
//! track engagement.
//!
//! Emails are sent without holding the store lock. Bookings are created (or
//! read) under the lock, the lock is released while the mailer runs, and the
//! send results are written back under a second lock. Each recipient is
//! handled on its own: one failed send never aborts the others.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use edubridge_mailer::{
    invitation_email, reminder_email, EmailKind, InvitationDetails, MailError, OutgoingEmail,
    SendReceipt, TrackingBatch, TrackingKind,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{AuthUser, Capability};
use crate::booking::{Booking, Engagement, RescheduleRequest, ResponseStatus, Transition};
use crate::error::{EduError, Result};
use crate::events::{EngagementPayload, InvitationPayload, ResponsePayload, SessionEvent};
use crate::scheduling::managed_session;
use crate::session::TutoringSession;
use crate::state::AppState;
use crate::store::Store;
use crate::user::{Role, User};

/// Name used in emails when the tutor account is gone.
const FALLBACK_TUTOR_NAME: &str = "Your tutor";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for `POST /sessions/:id/invite`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteRequest {
    /// Students to invite. Duplicates are ignored.
    pub student_ids: Vec<Uuid>,
}

/// A recipient that could not be invited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteFailure {
    /// The student.
    pub student_id: Uuid,
    /// Booking created for the student, if any. Present when only the
    /// email failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_id: Option<Uuid>,
    /// What went wrong.
    pub reason: String,
}

/// Result of `POST /sessions/:id/invite`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteOutcome {
    /// Invitations accepted by the email provider.
    pub sent: usize,
    /// Students that already held a booking.
    pub already_invited: usize,
    /// Recipients that failed.
    pub failed: Vec<InviteFailure>,
}

/// Request body for `POST /sessions/:id/decline`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeclineRequest {
    /// Optional free-text reason.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request body for `POST /sessions/:id/reschedule`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleBody {
    /// Why the current time does not work. Required.
    #[serde(default)]
    pub reason: Option<String>,
    /// Proposed alternative start times.
    #[serde(default)]
    pub preferred_times: Vec<DateTime<Utc>>,
}

/// Result of `POST /sessions/:id/remind`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderOutcome {
    /// Reminders accepted by the provider.
    pub sent: usize,
    /// Reminders that failed.
    pub failed: usize,
}

/// Per-status counts for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCounts {
    /// Unanswered, including those with a reschedule proposal.
    pub pending: usize,
    /// Confirmed.
    pub confirmed: usize,
    /// Declined.
    pub declined: usize,
    /// Closed without an answer.
    pub no_response: usize,
    /// Pending with a reschedule proposal.
    pub reschedule_requested: usize,
    /// All bookings.
    pub total: usize,
}

impl ResponseCounts {
    fn add(&mut self, booking: &Booking) {
        match booking.response_status {
            ResponseStatus::Pending => self.pending += 1,
            ResponseStatus::Confirmed => self.confirmed += 1,
            ResponseStatus::Declined => self.declined += 1,
            ResponseStatus::NoResponse => self.no_response += 1,
        }
        if booking.reschedule_requested() {
            self.reschedule_requested += 1;
        }
        self.total += 1;
    }
}

/// One booking in a session summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRow {
    /// The booking.
    pub booking_id: Uuid,
    /// The invited student.
    pub student_id: Uuid,
    /// Student display name.
    pub student_name: String,
    /// Student email.
    pub student_email: String,
    /// Current answer.
    pub status: ResponseStatus,
    /// When the student answered.
    pub responded_at: Option<DateTime<Utc>>,
    /// Reason given when declining.
    pub decline_reason: Option<String>,
    /// Pending reschedule proposal.
    pub reschedule: Option<RescheduleRequest>,
    /// Email engagement flags.
    pub engagement: Engagement,
    /// Invitation emails accepted so far.
    pub send_count: u32,
    /// Last invitation send.
    pub sent_at: Option<DateTime<Utc>>,
    /// Last reminder.
    pub last_reminded_at: Option<DateTime<Utc>>,
    /// Latest send or delivery failure.
    pub failure_reason: Option<String>,
}

/// Result of `GET /sessions/:id/responses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseSummary {
    /// The session.
    pub session_id: Uuid,
    /// Session subject.
    pub subject: String,
    /// Per-status counts.
    pub counts: ResponseCounts,
    /// One row per booking, oldest invitation first.
    pub responses: Vec<ResponseRow>,
}

/// A student's invitation together with its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationView {
    /// The booking.
    pub booking: Booking,
    /// The session invited to.
    pub session: TutoringSession,
    /// Tutor display name.
    pub tutor_name: String,
}

/// Result of processing a tracking webhook batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingOutcome {
    /// Events that changed a booking.
    pub applied: usize,
    /// Events for known messages that changed nothing (repeats).
    pub unchanged: usize,
    /// Events whose message id matched no booking.
    pub unmatched: usize,
}

// ============================================================================
// Email dispatch
// ============================================================================

/// One email to send for one booking.
#[derive(Debug)]
struct Dispatch {
    booking_id: Uuid,
    student_id: Uuid,
    email: OutgoingEmail,
}

fn tutor_name(store: &Store, session: &TutoringSession) -> String {
    store
        .user(session.tutor_id)
        .map_or_else(|_| FALLBACK_TUTOR_NAME.to_string(), |u| u.name.clone())
}

fn render(
    state: &AppState,
    kind: EmailKind,
    booking_id: Uuid,
    student: &User,
    tutor_name: &str,
    session: &TutoringSession,
) -> OutgoingEmail {
    let respond_url = state.respond_url(booking_id);
    let details = InvitationDetails {
        student_name: &student.name,
        tutor_name,
        subject: &session.subject,
        starts_at: session.scheduled_start,
        ends_at: session.scheduled_end,
        format: session.session_type.label(),
        respond_url: &respond_url,
    };
    let email = match kind {
        EmailKind::Invitation => invitation_email(&student.email, &details),
        EmailKind::Reminder => reminder_email(&student.email, &details),
    };
    email.with_reference(booking_id.to_string())
}

/// Sends every job concurrently. Must be called without the store lock.
async fn dispatch(
    state: &AppState,
    jobs: Vec<Dispatch>,
) -> Vec<(Dispatch, std::result::Result<SendReceipt, MailError>)> {
    let mailer = &state.mailer;
    join_all(jobs.into_iter().map(|job| async move {
        let result = mailer.send(&job.email).await;
        (job, result)
    }))
    .await
}

// ============================================================================
// Tutor operations
// ============================================================================

/// Invites students to a session and emails each of them.
///
/// # Errors
///
/// `Validation` for an empty list, `NotFound`/`Forbidden` for the session,
/// `Conflict` if the session is no longer `SCHEDULED`, and
/// `ExternalService` if emails were attempted and none went out (the
/// bookings are kept with their failure reasons).
pub async fn invite(
    state: &AppState,
    caller: &AuthUser,
    session_id: Uuid,
    student_ids: Vec<Uuid>,
) -> Result<InviteOutcome> {
    if student_ids.is_empty() {
        return Err(EduError::validation("studentIds must not be empty"));
    }
    let mut seen = HashSet::new();
    let student_ids: Vec<Uuid> = student_ids.into_iter().filter(|id| seen.insert(*id)).collect();

    let mut outcome = InviteOutcome::default();
    let mut jobs = Vec::new();
    let tutor_id = {
        let mut store = state.store.lock().await;
        let session = managed_session(&store, caller, session_id)?.clone();
        if !session.accepts_invitations() {
            return Err(EduError::conflict(format!(
                "invitations can only be sent while the session is SCHEDULED (it is {})",
                session.status
            )));
        }
        let tutor = tutor_name(&store, &session);

        for student_id in student_ids {
            if store.booking_for(session_id, student_id).is_some() {
                outcome.already_invited += 1;
                continue;
            }
            let student = match store.user(student_id) {
                Ok(u) if u.role != Role::Student => Err("user is not a student"),
                Ok(u) if !u.active => Err("account is deactivated"),
                Ok(u) => Ok(u.clone()),
                Err(_) => Err("no such user"),
            };
            let student = match student {
                Ok(student) => student,
                Err(reason) => {
                    debug!(student_id = %student_id, reason, "Skipping invitee");
                    outcome.failed.push(InviteFailure {
                        student_id,
                        booking_id: None,
                        reason: reason.to_string(),
                    });
                    continue;
                }
            };

            let booking = Booking::new(session_id, student_id);
            jobs.push(Dispatch {
                booking_id: booking.id,
                student_id,
                email: render(state, EmailKind::Invitation, booking.id, &student, &tutor, &session),
            });
            store.insert_booking(booking)?;
        }
        session.tutor_id
    };

    let attempted = jobs.len();
    let results = dispatch(state, jobs).await;

    let mut events = Vec::new();
    {
        let mut store = state.store.lock().await;
        for (job, result) in results {
            let booking = store.booking_mut(job.booking_id).ok();
            match (result, booking) {
                (Ok(receipt), Some(booking)) => {
                    booking.record_sent(&receipt);
                    outcome.sent += 1;
                    events.push(SessionEvent::InvitationSent(InvitationPayload {
                        session_id,
                        tutor_id,
                        booking_id: job.booking_id,
                        student_id: job.student_id,
                        send_count: booking.send_count,
                    }));
                }
                (Ok(_), None) => {
                    // The session was deleted while the email was in flight.
                    outcome.sent += 1;
                }
                (Err(e), booking) => {
                    warn!(
                        booking_id = %job.booking_id,
                        student_id = %job.student_id,
                        error = %e,
                        "Invitation email failed"
                    );
                    if let Some(booking) = booking {
                        booking.record_send_failure(e.to_string());
                    }
                    outcome.failed.push(InviteFailure {
                        student_id: job.student_id,
                        booking_id: Some(job.booking_id),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
    for event in events {
        state.events.send(event);
    }

    info!(
        session_id = %session_id,
        sent = outcome.sent,
        already_invited = outcome.already_invited,
        failed = outcome.failed.len(),
        "Invitations processed"
    );

    if attempted > 0 && outcome.sent == 0 {
        return Err(EduError::external(
            "email provider",
            format!("none of the {attempted} invitation emails could be sent"),
        ));
    }
    Ok(outcome)
}

/// Sends the invitation email for one `PENDING` booking again.
///
/// Response status, reschedule proposal and engagement history are kept.
pub async fn resend(state: &AppState, caller: &AuthUser, booking_id: Uuid) -> Result<Booking> {
    let (job, tutor_id) = {
        let store = state.store.lock().await;
        let booking = store.booking(booking_id)?;
        let session = managed_session(&store, caller, booking.session_id)?;
        if booking.response_status != ResponseStatus::Pending {
            return Err(EduError::invalid_transition(booking.response_status, "RESENT"));
        }
        let student = store.user(booking.student_id)?;
        let tutor = tutor_name(&store, session);
        let job = Dispatch {
            booking_id,
            student_id: student.id,
            email: render(state, EmailKind::Invitation, booking_id, student, &tutor, session),
        };
        (job, session.tutor_id)
    };

    let result = state.mailer.send(&job.email).await;

    let mut store = state.store.lock().await;
    let booking = store.booking_mut(booking_id)?;
    match result {
        Ok(receipt) => {
            booking.record_sent(&receipt);
            let booking = booking.clone();
            drop(store);
            info!(booking_id = %booking_id, send_count = booking.send_count, "Invitation resent");
            state.events.send(SessionEvent::InvitationSent(InvitationPayload {
                session_id: booking.session_id,
                tutor_id,
                booking_id,
                student_id: booking.student_id,
                send_count: booking.send_count,
            }));
            Ok(booking)
        }
        Err(e) => {
            warn!(booking_id = %booking_id, error = %e, "Invitation resend failed");
            booking.record_send_failure(e.to_string());
            Err(e.into())
        }
    }
}

/// Sends a reminder to every `PENDING` booking of a session.
pub async fn remind(
    state: &AppState,
    caller: &AuthUser,
    session_id: Uuid,
) -> Result<ReminderOutcome> {
    let mut outcome = ReminderOutcome::default();
    let jobs = {
        let store = state.store.lock().await;
        let session = managed_session(&store, caller, session_id)?;
        let tutor = tutor_name(&store, session);

        let mut jobs = Vec::new();
        for booking in store.bookings_for_session(session_id) {
            if booking.response_status != ResponseStatus::Pending {
                continue;
            }
            let Ok(student) = store.user(booking.student_id) else {
                warn!(booking_id = %booking.id, "Reminder skipped: student account missing");
                outcome.failed += 1;
                continue;
            };
            jobs.push(Dispatch {
                booking_id: booking.id,
                student_id: student.id,
                email: render(state, EmailKind::Reminder, booking.id, student, &tutor, session),
            });
        }
        jobs
    };

    let results = dispatch(state, jobs).await;

    let mut store = state.store.lock().await;
    for (job, result) in results {
        let booking = store.booking_mut(job.booking_id).ok();
        match (result, booking) {
            (Ok(receipt), Some(booking)) => {
                booking.record_reminder(&receipt);
                outcome.sent += 1;
            }
            (Ok(_), None) => outcome.sent += 1,
            (Err(e), booking) => {
                warn!(booking_id = %job.booking_id, error = %e, "Reminder email failed");
                if let Some(booking) = booking {
                    booking.record_send_failure(e.to_string());
                }
                outcome.failed += 1;
            }
        }
    }
    drop(store);

    info!(
        session_id = %session_id,
        sent = outcome.sent,
        failed = outcome.failed,
        "Reminders processed"
    );
    Ok(outcome)
}

/// Response counts and per-booking rows for one session.
pub async fn summary(
    state: &AppState,
    caller: &AuthUser,
    session_id: Uuid,
) -> Result<ResponseSummary> {
    let store = state.store.lock().await;
    let session = managed_session(&store, caller, session_id)?;

    let mut counts = ResponseCounts::default();
    let mut responses = Vec::new();
    for booking in store.bookings_for_session(session_id) {
        counts.add(booking);
        let (student_name, student_email) = store.user(booking.student_id).map_or_else(
            |_| (String::new(), String::new()),
            |u| (u.name.clone(), u.email.clone()),
        );
        responses.push(ResponseRow {
            booking_id: booking.id,
            student_id: booking.student_id,
            student_name,
            student_email,
            status: booking.response_status,
            responded_at: booking.responded_at,
            decline_reason: booking.decline_reason.clone(),
            reschedule: booking
                .reschedule
                .clone()
                .filter(|_| booking.reschedule_requested()),
            engagement: booking.engagement(),
            send_count: booking.send_count,
            sent_at: booking.sent_at,
            last_reminded_at: booking.last_reminded_at,
            failure_reason: booking.failure_reason.clone(),
        });
    }

    Ok(ResponseSummary {
        session_id,
        subject: session.subject.clone(),
        counts,
        responses,
    })
}

// ============================================================================
// Student operations
// ============================================================================

/// Applies `answer` to a booking the caller holds and emits the event.
async fn record_answer(
    state: &AppState,
    caller: &AuthUser,
    booking_id: Uuid,
    answer: impl FnOnce(&Store, &mut Booking) -> Result<Transition> + Send,
) -> Result<Booking> {
    caller.require(Capability::RespondToInvitations)?;

    let mut store = state.store.lock().await;
    let mut booking = store.booking(booking_id)?.clone();
    booking.ensure_held_by(caller.id)?;
    let tutor_id = store.session(booking.session_id)?.tutor_id;

    if answer(&*store, &mut booking)? == Transition::Unchanged {
        return Ok(booking);
    }
    *store.booking_mut(booking_id)? = booking.clone();
    drop(store);

    info!(
        booking_id = %booking_id,
        status = %booking.response_status,
        reschedule_requested = booking.reschedule_requested(),
        "Invitation answered"
    );
    state.events.send(SessionEvent::ResponseRecorded(ResponsePayload {
        session_id: booking.session_id,
        tutor_id,
        booking_id,
        student_id: booking.student_id,
        status: booking.response_status,
        reschedule_requested: booking.reschedule_requested(),
    }));
    Ok(booking)
}

/// Confirms attendance.
///
/// # Errors
///
/// `Conflict` if the session already has `maxParticipants` confirmations,
/// `InvalidStateTransition` from `DECLINED` or `NO_RESPONSE`.
pub async fn confirm(state: &AppState, caller: &AuthUser, booking_id: Uuid) -> Result<Booking> {
    record_answer(state, caller, booking_id, |store, booking| {
        if booking.response_status == ResponseStatus::Pending {
            let session = store.session(booking.session_id)?;
            let confirmed = store.confirmed_count(session.id);
            if confirmed >= usize::try_from(session.max_participants).unwrap_or(usize::MAX) {
                return Err(EduError::conflict(format!(
                    "session is full ({confirmed} of {} places taken)",
                    session.max_participants
                )));
            }
        }
        booking.confirm()
    })
    .await
}

/// Declines with an optional reason.
pub async fn decline(
    state: &AppState,
    caller: &AuthUser,
    booking_id: Uuid,
    reason: Option<String>,
) -> Result<Booking> {
    record_answer(state, caller, booking_id, |_, booking| {
        booking.decline(reason.as_deref())
    })
    .await
}

/// Attaches a reschedule proposal; the booking stays `PENDING`.
pub async fn request_reschedule(
    state: &AppState,
    caller: &AuthUser,
    booking_id: Uuid,
    body: RescheduleBody,
) -> Result<Booking> {
    record_answer(state, caller, booking_id, |_, booking| {
        booking
            .request_reschedule(body.reason.as_deref(), body.preferred_times)
            .map(|()| Transition::Applied)
    })
    .await
}

/// The caller's invitations, optionally filtered by status, newest session
/// first.
pub async fn my_invitations(
    state: &AppState,
    caller: &AuthUser,
    status: Option<ResponseStatus>,
) -> Result<Vec<InvitationView>> {
    caller.require(Capability::RespondToInvitations)?;
    let store = state.store.lock().await;

    let mut views: Vec<InvitationView> = store
        .bookings_for_student(caller.id)
        .into_iter()
        .filter(|b| status.map_or(true, |s| b.response_status == s))
        .filter_map(|b| {
            let session = store.session(b.session_id).ok()?;
            Some(InvitationView {
                booking: b.clone(),
                session: session.clone(),
                tutor_name: tutor_name(&store, session),
            })
        })
        .collect();
    views.sort_by(|a, b| b.session.scheduled_start.cmp(&a.session.scheduled_start));
    Ok(views)
}

// ============================================================================
// Provider webhook
// ============================================================================

/// Applies a batch of provider tracking events.
pub async fn apply_tracking(state: &AppState, batch: TrackingBatch) -> TrackingOutcome {
    let mut outcome = TrackingOutcome::default();
    let mut changed: Vec<(Uuid, Uuid, TrackingKind)> = Vec::new();

    let mut store = state.store.lock().await;
    for event in &batch.events {
        match store.booking_by_message_mut(&event.message_id) {
            Some(booking) => {
                if booking.apply_tracking(event) {
                    outcome.applied += 1;
                    changed.push((booking.session_id, booking.id, event.event));
                } else {
                    outcome.unchanged += 1;
                }
            }
            None => {
                debug!(message_id = %event.message_id, "Tracking event for unknown message");
                outcome.unmatched += 1;
            }
        }
    }

    let mut tutors: HashMap<Uuid, Uuid> = HashMap::new();
    let events: Vec<SessionEvent> = changed
        .into_iter()
        .filter_map(|(session_id, booking_id, signal)| {
            let tutor_id = match tutors.get(&session_id) {
                Some(id) => *id,
                None => {
                    let id = store.session(session_id).ok()?.tutor_id;
                    tutors.insert(session_id, id);
                    id
                }
            };
            Some(SessionEvent::EngagementUpdated(EngagementPayload {
                session_id,
                tutor_id,
                booking_id,
                signal,
            }))
        })
        .collect();
    drop(store);

    for event in events {
        state.events.send(event);
    }
    info!(
        applied = outcome.applied,
        unchanged = outcome.unchanged,
        unmatched = outcome.unmatched,
        "Tracking batch processed"
    );
    outcome
}

//! Session scheduling: create, list, change status, delete.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditEntry};
use crate::auth::{AuthUser, Capability};
use crate::booking::ResponseStatus;
use crate::error::{EduError, Result};
use crate::events::{SessionEvent, SessionStatusPayload};
use crate::session::{NewSession, SessionStatus, TutoringSession};
use crate::state::AppState;
use crate::store::Store;
use crate::user::Role;

/// Request body for `POST /sessions/:id/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    /// Target status.
    pub status: SessionStatus,
}

/// Result of deleting a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedSession {
    /// The deleted session.
    pub session_id: Uuid,
    /// Bookings removed with it.
    pub bookings_removed: usize,
}

/// Fails with `Forbidden` unless `caller` owns `session` or is an admin.
pub(crate) fn authorize_owner(caller: &AuthUser, session: &TutoringSession) -> Result<()> {
    caller.require(Capability::ManageSessions)?;
    if caller.is_admin() || session.tutor_id == caller.id {
        Ok(())
    } else {
        Err(EduError::forbidden("this session belongs to another tutor"))
    }
}

/// Schedules a new session owned by the calling tutor.
pub async fn create_session(
    state: &AppState,
    caller: &AuthUser,
    draft: NewSession,
) -> Result<TutoringSession> {
    caller.require(Capability::ScheduleSessions)?;
    let session = TutoringSession::schedule(caller.id, draft)?;

    state.store.lock().await.insert_session(session.clone());
    info!(
        session_id = %session.id,
        tutor_id = %caller.id,
        start = %session.scheduled_start,
        "Session scheduled"
    );
    Ok(session)
}

/// One session. Visible to its tutor, admins and invited students.
pub async fn get_session(
    state: &AppState,
    caller: &AuthUser,
    session_id: Uuid,
) -> Result<TutoringSession> {
    let store = state.store.lock().await;
    let session = store.session(session_id)?;
    let invited = caller.role == Role::Student
        && store.booking_for(session_id, caller.id).is_some();
    if !invited {
        authorize_owner(caller, session)?;
    }
    Ok(session.clone())
}

/// The tutor's own sessions (all sessions for admins), earliest first.
pub async fn list_sessions(state: &AppState, caller: &AuthUser) -> Result<Vec<TutoringSession>> {
    caller.require(Capability::ManageSessions)?;
    let store = state.store.lock().await;
    let sessions = if caller.is_admin() {
        store.sessions_where(|_| true)
    } else {
        store.sessions_where(|s| s.tutor_id == caller.id)
    };
    Ok(sessions.into_iter().cloned().collect())
}

/// Sessions starting on the current UTC date.
///
/// Tutors see their own sessions, students the sessions they hold a
/// non-declined booking for, admins everything.
pub async fn todays_sessions(
    state: &AppState,
    caller: &AuthUser,
) -> Result<Vec<TutoringSession>> {
    caller.require(Capability::ViewSchedule)?;
    let today = Utc::now().date_naive();
    let store = state.store.lock().await;

    let sessions = match caller.role {
        Role::Admin => store.sessions_where(|s| s.starts_on(today)),
        Role::Tutor => store.sessions_where(|s| s.tutor_id == caller.id && s.starts_on(today)),
        Role::Student => {
            let booked: Vec<Uuid> = store
                .bookings_for_student(caller.id)
                .into_iter()
                .filter(|b| b.response_status != ResponseStatus::Declined)
                .map(|b| b.session_id)
                .collect();
            store.sessions_where(|s| booked.contains(&s.id) && s.starts_on(today))
        }
    };
    Ok(sessions.into_iter().cloned().collect())
}

/// Moves a session to `to`. Reaching a terminal status closes unanswered
/// invitations as `NO_RESPONSE`; cancellation is audit-logged.
pub async fn change_status(
    state: &AppState,
    caller: &AuthUser,
    session_id: Uuid,
    to: SessionStatus,
) -> Result<TutoringSession> {
    let mut store = state.store.lock().await;
    authorize_owner(caller, store.session(session_id)?)?;

    let session = store.session_mut(session_id)?;
    let from = session.status;
    session.transition(to)?;
    let session = session.clone();

    let closed = if to.is_terminal() {
        store.close_unanswered(session_id)
    } else {
        0
    };
    if to == SessionStatus::Cancelled {
        store.record_audit(AuditEntry::new(
            caller.id,
            AuditAction::SessionCancelled,
            session_id,
            format!("{} ({closed} unanswered invitations closed)", session.subject),
        ));
    }
    drop(store);

    info!(
        session_id = %session_id,
        from = %from,
        to = %to,
        closed_invitations = closed,
        "Session status changed"
    );
    state
        .events
        .send(SessionEvent::SessionStatusChanged(SessionStatusPayload {
            session_id,
            tutor_id: session.tutor_id,
            status: to,
            closed_invitations: closed,
        }));
    Ok(session)
}

/// Deletes a session and all of its bookings.
pub async fn delete_session(
    state: &AppState,
    caller: &AuthUser,
    session_id: Uuid,
) -> Result<DeletedSession> {
    let mut store = state.store.lock().await;
    authorize_owner(caller, store.session(session_id)?)?;

    let (session, bookings_removed) = store.remove_session(session_id)?;
    store.record_audit(AuditEntry::new(
        caller.id,
        AuditAction::SessionDeleted,
        session_id,
        format!("{} ({bookings_removed} bookings removed)", session.subject),
    ));
    info!(session_id = %session_id, bookings_removed, "Session deleted");

    Ok(DeletedSession {
        session_id,
        bookings_removed,
    })
}

/// Looks up a session the caller may manage.
pub(crate) fn managed_session<'a>(
    store: &'a Store,
    caller: &AuthUser,
    session_id: Uuid,
) -> Result<&'a TutoringSession> {
    let session = store.session(session_id)?;
    authorize_owner(caller, session)?;
    Ok(session)
}

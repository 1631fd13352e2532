//! In-memory store with JSON snapshot persistence.
//!
//! All records live in one [`Store`] guarded by the application's mutex.
//! Each mutation bumps a revision counter so the server only writes a
//! snapshot when something changed. Snapshots are written to a temporary
//! file and renamed into place, so a crash never leaves a half-written file.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::booking::{Booking, ResponseStatus};
use crate::error::{EduError, Result};
use crate::session::TutoringSession;
use crate::user::{normalize_email, User};

/// Snapshot format version written to disk.
const SNAPSHOT_VERSION: u32 = 1;

/// All persisted records.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    #[serde(default = "snapshot_version")]
    version: u32,
    #[serde(default)]
    users: HashMap<Uuid, User>,
    #[serde(default)]
    sessions: HashMap<Uuid, TutoringSession>,
    #[serde(default)]
    bookings: HashMap<Uuid, Booking>,
    #[serde(default)]
    audit: Vec<AuditEntry>,
    #[serde(skip)]
    revision: u64,
}

const fn snapshot_version() -> u32 {
    SNAPSHOT_VERSION
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            ..Self::default()
        }
    }

    /// Mutation counter. Starts at zero after loading.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Adds a user. Emails are unique regardless of case.
    pub fn insert_user(&mut self, user: User) -> Result<()> {
        if self.user_by_email(&user.email).is_some() {
            return Err(EduError::conflict(format!(
                "an account with email {} already exists",
                user.email
            )));
        }
        self.users.insert(user.id, user);
        self.touch();
        Ok(())
    }

    /// Looks up a user by id.
    pub fn user(&self, id: Uuid) -> Result<&User> {
        self.users.get(&id).ok_or_else(|| EduError::not_found("user", id))
    }

    /// Looks up a user by id for modification.
    pub fn user_mut(&mut self, id: Uuid) -> Result<&mut User> {
        let user = self
            .users
            .get_mut(&id)
            .ok_or_else(|| EduError::not_found("user", id))?;
        self.revision += 1;
        Ok(user)
    }

    /// Looks up a user by email, ignoring case.
    #[must_use]
    pub fn user_by_email(&self, email: &str) -> Option<&User> {
        let email = normalize_email(email);
        self.users.values().find(|u| u.email == email)
    }

    /// All users, oldest first.
    #[must_use]
    pub fn users(&self) -> Vec<&User> {
        let mut users: Vec<&User> = self.users.values().collect();
        users.sort_by_key(|u| u.created_at);
        users
    }

    /// Returns `true` if any account has the admin role.
    #[must_use]
    pub fn has_admin(&self) -> bool {
        self.users
            .values()
            .any(|u| u.role == crate::user::Role::Admin)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Adds a session.
    pub fn insert_session(&mut self, session: TutoringSession) {
        self.sessions.insert(session.id, session);
        self.touch();
    }

    /// Looks up a session by id.
    pub fn session(&self, id: Uuid) -> Result<&TutoringSession> {
        self.sessions
            .get(&id)
            .ok_or_else(|| EduError::not_found("session", id))
    }

    /// Looks up a session by id for modification.
    pub fn session_mut(&mut self, id: Uuid) -> Result<&mut TutoringSession> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| EduError::not_found("session", id))?;
        self.revision += 1;
        Ok(session)
    }

    /// Sessions matching `filter`, earliest start first.
    pub fn sessions_where(
        &self,
        filter: impl Fn(&TutoringSession) -> bool,
    ) -> Vec<&TutoringSession> {
        let mut sessions: Vec<&TutoringSession> =
            self.sessions.values().filter(|s| filter(s)).collect();
        sessions.sort_by_key(|s| (s.scheduled_start, s.created_at));
        sessions
    }

    /// Removes a session together with its bookings. Returns the session
    /// and how many bookings went with it.
    pub fn remove_session(&mut self, id: Uuid) -> Result<(TutoringSession, usize)> {
        let session = self
            .sessions
            .remove(&id)
            .ok_or_else(|| EduError::not_found("session", id))?;
        let before = self.bookings.len();
        self.bookings.retain(|_, b| b.session_id != id);
        let removed = before - self.bookings.len();
        self.touch();
        Ok((session, removed))
    }

    // ========================================================================
    // Bookings
    // ========================================================================

    /// Adds a booking. A student holds at most one booking per session.
    pub fn insert_booking(&mut self, booking: Booking) -> Result<()> {
        if self
            .booking_for(booking.session_id, booking.student_id)
            .is_some()
        {
            return Err(EduError::conflict(
                "the student is already invited to this session",
            ));
        }
        self.bookings.insert(booking.id, booking);
        self.touch();
        Ok(())
    }

    /// Looks up a booking by id.
    pub fn booking(&self, id: Uuid) -> Result<&Booking> {
        self.bookings
            .get(&id)
            .ok_or_else(|| EduError::not_found("booking", id))
    }

    /// Looks up a booking by id for modification.
    pub fn booking_mut(&mut self, id: Uuid) -> Result<&mut Booking> {
        let booking = self
            .bookings
            .get_mut(&id)
            .ok_or_else(|| EduError::not_found("booking", id))?;
        self.revision += 1;
        Ok(booking)
    }

    /// The booking `student_id` holds for `session_id`, if any.
    #[must_use]
    pub fn booking_for(&self, session_id: Uuid, student_id: Uuid) -> Option<&Booking> {
        self.bookings
            .values()
            .find(|b| b.session_id == session_id && b.student_id == student_id)
    }

    /// Bookings of a session, oldest invitation first.
    #[must_use]
    pub fn bookings_for_session(&self, session_id: Uuid) -> Vec<&Booking> {
        let mut bookings: Vec<&Booking> = self
            .bookings
            .values()
            .filter(|b| b.session_id == session_id)
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        bookings
    }

    /// Bookings held by a student, oldest invitation first.
    #[must_use]
    pub fn bookings_for_student(&self, student_id: Uuid) -> Vec<&Booking> {
        let mut bookings: Vec<&Booking> = self
            .bookings
            .values()
            .filter(|b| b.student_id == student_id)
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        bookings
    }

    /// Number of confirmed bookings for a session.
    #[must_use]
    pub fn confirmed_count(&self, session_id: Uuid) -> usize {
        self.bookings
            .values()
            .filter(|b| {
                b.session_id == session_id && b.response_status == ResponseStatus::Confirmed
            })
            .count()
    }

    /// Marks every `PENDING` booking of a session as `NO_RESPONSE`.
    /// Returns how many changed.
    pub fn close_unanswered(&mut self, session_id: Uuid) -> usize {
        let closed = self
            .bookings
            .values_mut()
            .filter(|b| b.session_id == session_id)
            .map(Booking::close_unanswered)
            .filter(|changed| *changed)
            .count();
        if closed > 0 {
            self.touch();
        }
        closed
    }

    /// The booking that sent `message_id`, for tracking webhooks.
    pub fn booking_by_message_mut(&mut self, message_id: &str) -> Option<&mut Booking> {
        let booking = self
            .bookings
            .values_mut()
            .find(|b| b.owns_message(message_id))?;
        self.revision += 1;
        Some(booking)
    }

    // ========================================================================
    // Audit
    // ========================================================================

    /// Appends an audit entry.
    pub fn record_audit(&mut self, entry: AuditEntry) {
        debug!(action = ?entry.action, target = %entry.target_id, "Audit entry recorded");
        self.audit.push(entry);
        self.touch();
    }

    /// Most recent audit entries, newest first.
    #[must_use]
    pub fn audit_log(&self, limit: usize) -> Vec<&AuditEntry> {
        self.audit.iter().rev().take(limit).collect()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Loads a snapshot from `path`. A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns `EduError::StateFileCorrupted` if the file is not a valid
    /// snapshot, or `EduError::Io` if it cannot be read.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No data file, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let store: Self = serde_json::from_str(&content)
            .map_err(|e| EduError::state_corrupted(path, e.to_string()))?;
        if store.version > SNAPSHOT_VERSION {
            return Err(EduError::state_corrupted(
                path,
                format!(
                    "snapshot version {} is newer than supported version {SNAPSHOT_VERSION}",
                    store.version
                ),
            ));
        }

        info!(
            path = %path.display(),
            users = store.users.len(),
            sessions = store.sessions.len(),
            bookings = store.bookings.len(),
            "Loaded data file"
        );
        Ok(store)
    }

    /// Writes a snapshot to `path` atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.snapshot()?;
        Self::write_snapshot(path, &bytes).await
    }

    /// Serializes the store without touching the filesystem.
    ///
    /// Callers holding the store behind a lock take the snapshot under the
    /// lock and hand the bytes to [`Store::write_snapshot`] after releasing it.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Writes previously serialized bytes to `path` via a temp file and rename.
    pub async fn write_snapshot(path: &Path, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "Saved data file");
        Ok(())
    }
}

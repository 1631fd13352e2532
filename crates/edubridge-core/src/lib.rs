//! EduBridge session service
//!
//! Tutors schedule sessions and invite students by email; students confirm,
//! decline or ask to reschedule; tutors follow responses and email
//! engagement through the HTTP API and a live WebSocket feed.

pub mod accounts;
pub mod api;
pub mod audit;
pub mod auth;
pub mod booking;
pub mod config;
pub mod error;
pub mod events;
pub mod invitations;
pub mod scheduling;
pub mod session;
pub mod state;
pub mod store;
pub mod user;

pub use api::{create_router, ApiError, ApiResponse};
pub use audit::{AuditAction, AuditEntry};
pub use auth::{AuthUser, Capability, TokenService};
pub use booking::{Booking, Engagement, RescheduleRequest, ResponseStatus};
pub use config::{BootstrapAdmin, Config, MailProvider, MailerConfig};
pub use error::{EduError, Result};
pub use events::{EventBroadcaster, SessionEvent};
pub use invitations::{InviteOutcome, ReminderOutcome, ResponseCounts, ResponseSummary};
pub use session::{NewSession, SessionStatus, SessionType, TutoringSession};
pub use state::{mailer_from_config, AppState};
pub use store::Store;
pub use user::{Role, User, UserView};

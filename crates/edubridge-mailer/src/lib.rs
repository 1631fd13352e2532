//! EduBridge Mailer
//!
//! Transactional email delivery for session invitations and reminders.
//!
//! The delivery provider is an external collaborator: this crate only defines
//! the [`Mailer`] seam, the message templates, and the shape of the tracking
//! events the provider posts back (delivered/opened/clicked/bounced).
//!
//! # Back-ends
//!
//! - [`HttpMailer`] - posts messages to a provider's HTTP API
//! - [`LogMailer`] - writes messages to the tracing log (local development)
//! - [`MemoryMailer`] - keeps an in-process outbox (tests, demos)

mod http;
mod memory;
pub mod templates;

pub use http::{HttpMailer, HttpMailerConfig};
pub use memory::{LogMailer, MemoryMailer};
pub use templates::{invitation_email, reminder_email, InvitationDetails};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while handing a message to the provider.
#[derive(Debug, Error)]
pub enum MailError {
    /// The recipient address was rejected before sending.
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    /// The provider refused the message.
    #[error("provider rejected message to {recipient}: {reason}")]
    Rejected {
        /// Address the message was for.
        recipient: String,
        /// Reason reported by the provider.
        reason: String,
    },

    /// The provider answered with a non-success HTTP status.
    #[error("provider returned HTTP {status}: {body}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Network or protocol failure talking to the provider.
    #[error("transport error: {0}")]
    Transport(String),

    /// The mailer is missing required settings.
    #[error("mailer not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for MailError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// What a message is about. Sent to the provider as a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    /// First invitation or a resend of it.
    Invitation,
    /// Reminder for an unanswered invitation.
    Reminder,
}

impl std::fmt::Display for EmailKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invitation => write!(f, "invitation"),
            Self::Reminder => write!(f, "reminder"),
        }
    }
}

/// A rendered message ready to hand to a [`Mailer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingEmail {
    /// Recipient address.
    pub to: String,
    /// Recipient display name.
    pub to_name: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub text_body: String,
    /// Message category.
    pub kind: EmailKind,
    /// Caller reference echoed back in provider metadata (the booking id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl OutgoingEmail {
    /// Attaches a caller reference to the message.
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Acknowledgement returned by the provider for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReceipt {
    /// Provider message id; tracking events refer to it.
    pub message_id: String,
    /// When the provider accepted the message.
    pub accepted_at: DateTime<Utc>,
}

impl SendReceipt {
    /// Creates a receipt accepted now.
    #[must_use]
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            accepted_at: Utc::now(),
        }
    }
}

/// Sends rendered messages through a delivery provider.
#[async_trait]
pub trait Mailer: Send + Sync + std::fmt::Debug {
    /// Hands one message to the provider.
    async fn send(&self, email: &OutgoingEmail) -> Result<SendReceipt, MailError>;

    /// Short back-end name for logs.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Tracking events
// ============================================================================

/// Kind of engagement signal reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingKind {
    /// Message reached the recipient's mail server.
    Delivered,
    /// Recipient opened the message.
    Opened,
    /// Recipient clicked a link in the message.
    Clicked,
    /// Message bounced or was dropped.
    Bounced,
}

impl std::fmt::Display for TrackingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delivered => write!(f, "delivered"),
            Self::Opened => write!(f, "opened"),
            Self::Clicked => write!(f, "clicked"),
            Self::Bounced => write!(f, "bounced"),
        }
    }
}

/// One tracking event from the provider webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingEvent {
    /// Provider message id from the original [`SendReceipt`].
    pub message_id: String,
    /// Signal kind.
    pub event: TrackingKind,
    /// When the provider observed it.
    pub timestamp: DateTime<Utc>,
    /// Bounce reason, when the provider gives one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Webhook payload: a batch of tracking events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingBatch {
    /// Events in provider order.
    #[serde(default)]
    pub events: Vec<TrackingEvent>,
}

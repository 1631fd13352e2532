//! Live event feed for tutors and admins over WebSocket.
//!
//! Invitation, response, engagement and session status changes are broadcast
//! to every connected client. Tutors only receive events about their own
//! sessions; admins receive everything.
//!
//! # Event Types
//!
//! - `connected` - sent once when the socket opens
//! - `invitation_sent` - an invitation email was accepted by the provider
//! - `response_recorded` - a student confirmed, declined or asked to reschedule
//! - `engagement_updated` - the provider reported delivery, open, click or bounce
//! - `session_status_changed` - a session started, completed or was cancelled
//!
//! Connect with `GET /ws?token=<jwt>`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use edubridge_mailer::TrackingKind;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::ApiError;
use crate::auth::{authenticate, AuthUser, Capability};
use crate::booking::ResponseStatus;
use crate::session::SessionStatus;
use crate::state::AppState;
use crate::user::Role;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// The subscriber's account id.
    pub user_id: Uuid,
    /// The subscriber's role.
    pub role: Role,
}

/// Payload for the `invitation_sent` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationPayload {
    /// Session the invitation is for.
    pub session_id: Uuid,
    /// Owner of the session.
    pub tutor_id: Uuid,
    /// The booking.
    pub booking_id: Uuid,
    /// The invited student.
    pub student_id: Uuid,
    /// Invitation emails sent so far for this booking.
    pub send_count: u32,
}

/// Payload for the `response_recorded` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    /// Session the booking belongs to.
    pub session_id: Uuid,
    /// Owner of the session.
    pub tutor_id: Uuid,
    /// The booking.
    pub booking_id: Uuid,
    /// The answering student.
    pub student_id: Uuid,
    /// Status after the answer.
    pub status: ResponseStatus,
    /// Whether a reschedule proposal is attached.
    pub reschedule_requested: bool,
}

/// Payload for the `engagement_updated` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementPayload {
    /// Session the booking belongs to.
    pub session_id: Uuid,
    /// Owner of the session.
    pub tutor_id: Uuid,
    /// The booking.
    pub booking_id: Uuid,
    /// Reported signal.
    pub signal: TrackingKind,
}

/// Payload for the `session_status_changed` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusPayload {
    /// The session.
    pub session_id: Uuid,
    /// Owner of the session.
    pub tutor_id: Uuid,
    /// New status.
    pub status: SessionStatus,
    /// Pending bookings closed as `NO_RESPONSE`.
    pub closed_invitations: usize,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Events pushed to live subscribers.
///
/// Serialized as `{"event": "<name>", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// An invitation email went out.
    InvitationSent(InvitationPayload),
    /// A student answered.
    ResponseRecorded(ResponsePayload),
    /// The provider reported engagement.
    EngagementUpdated(EngagementPayload),
    /// A session changed status.
    SessionStatusChanged(SessionStatusPayload),
}

impl SessionEvent {
    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::InvitationSent(_) => "invitation_sent",
            Self::ResponseRecorded(_) => "response_recorded",
            Self::EngagementUpdated(_) => "engagement_updated",
            Self::SessionStatusChanged(_) => "session_status_changed",
        }
    }

    /// Owner of the session the event is about.
    #[must_use]
    pub const fn tutor_id(&self) -> Option<Uuid> {
        match self {
            Self::Connected(_) => None,
            Self::InvitationSent(p) => Some(p.tutor_id),
            Self::ResponseRecorded(p) => Some(p.tutor_id),
            Self::EngagementUpdated(p) => Some(p.tutor_id),
            Self::SessionStatusChanged(p) => Some(p.tutor_id),
        }
    }

    /// Returns `true` if `viewer` may see this event.
    #[must_use]
    pub fn visible_to(&self, viewer: &AuthUser) -> bool {
        match viewer.role {
            Role::Admin => true,
            Role::Tutor => self.tutor_id() == Some(viewer.id),
            Role::Student => false,
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts session events to all connected WebSocket clients.
///
/// Events are not kept for clients that connect later.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Creates a broadcaster buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    ///
    /// A subscriber that falls behind gets a `Lagged` error and misses events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event. Returns how many subscribers will receive it.
    pub fn send(&self, event: SessionEvent) -> usize {
        // Err only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Heartbeat ping period.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// Query string of the WebSocket endpoint.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Bearer token; browsers cannot set headers on WebSocket requests.
    pub token: String,
}

/// WebSocket upgrade handler for `GET /ws?token=...`.
///
/// The caller must hold the `WatchEvents` capability.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let viewer = authenticate(&state, params.token.trim()).await?;
    viewer.require(Capability::WatchEvents)?;

    info!(user_id = %viewer.id, role = %viewer.role, "New WebSocket connection request");
    let receiver = state.events.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, viewer, receiver)))
}

/// Handles a single WebSocket connection.
///
/// Sends `connected`, then forwards visible events and pings every
/// 30 seconds. Closes after 3 missed pongs.
async fn handle_socket(
    socket: WebSocket,
    viewer: AuthUser,
    mut event_receiver: broadcast::Receiver<SessionEvent>,
) {
    let (mut sender, mut receiver) = socket.split();

    let connected = SessionEvent::Connected(ConnectedPayload {
        user_id: viewer.id,
        role: viewer.role,
    });
    let connected_json = match serde_json::to_string(&connected) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize connected event: {}", e);
            return;
        }
    };
    if sender.send(Message::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    // The first tick completes immediately.
    heartbeat.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(user_id = %viewer.id, "Client requested close");
                        break;
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!("Ignoring message from client");
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = event_receiver.recv() => {
                match event {
                    Ok(event) if event.visible_to(&viewer) => {
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(user_id = %viewer.id, "Client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    info!(user_id = %viewer.id, "WebSocket client disconnected");
}

//! Integration tests for the live WebSocket event feed.
//!
//! These tests cover token checks on upgrade, the connected greeting and
//! per-tutor filtering of invitation events.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use edubridge_core::{
    accounts, create_router, events::SessionEvent, AppState, Config, ResponseStatus, Role,
};
use edubridge_mailer::MemoryMailer;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Spawns the test server and returns its `host:port`.
async fn spawn_test_server() -> (String, tokio::task::JoinHandle<()>) {
    let mut config = Config::default();
    config.auth.bcrypt_cost = 4;
    config.bootstrap_admin = Some(edubridge_core::BootstrapAdmin {
        name: "Root".to_string(),
        email: "root@example.com".to_string(),
        password: "root-password".to_string(),
    });
    let state = AppState::new(config, Arc::new(MemoryMailer::new()));
    accounts::ensure_bootstrap_admin(&state)
        .await
        .expect("Failed to provision admin");

    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, handle)
}

async fn post(addr: &str, path: &str, token: Option<&str>, body: Value) -> Value {
    let mut request = reqwest::Client::new()
        .post(format!("http://{addr}{path}"))
        .json(&body);
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.expect("Request failed");
    assert!(
        response.status().is_success(),
        "POST {path} returned {}",
        response.status()
    );
    response.json().await.expect("json")
}

async fn get(addr: &str, path: &str, token: &str) -> Value {
    reqwest::Client::new()
        .get(format!("http://{addr}{path}"))
        .bearer_auth(token)
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("json")
}

/// Registers an account and returns `(token, user id)`.
async fn register(addr: &str, name: &str, role: &str) -> (String, String) {
    let body = post(
        addr,
        "/auth/register",
        None,
        json!({
            "name": name,
            "email": format!("{}@example.com", name.to_lowercase()),
            "password": "password123",
            "role": role,
        }),
    )
    .await;
    (
        body["data"]["token"].as_str().expect("token").to_string(),
        body["data"]["user"]["id"].as_str().expect("id").to_string(),
    )
}

async fn create_session(addr: &str, tutor: &str) -> String {
    let start = Utc::now() + chrono::Duration::days(1);
    let body = post(
        addr,
        "/sessions",
        Some(tutor),
        json!({
            "subject": "Essay Workshop",
            "scheduledStart": start,
            "scheduledEnd": start + chrono::Duration::hours(1),
            "sessionType": "GROUP",
            "maxParticipants": 6,
        }),
    )
    .await;
    body["data"]["id"].as_str().expect("id").to_string()
}

/// Connects a WebSocket client with the given token.
async fn connect_client(addr: &str, token: &str) -> WsClient {
    let (ws_stream, _) = connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next event, answering pings along the way.
async fn receive_event(client: &mut WsClient) -> SessionEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Asserts that no text message arrives within a short window.
async fn assert_silent(client: &mut WsClient) {
    let waited = timeout(Duration::from_millis(300), async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => return text,
                Some(Ok(_)) => {}
                other => panic!("Unexpected frame: {other:?}"),
            }
        }
    })
    .await;
    assert!(waited.is_err(), "Expected no event, got: {waited:?}");
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_tutor_receives_connected_event() {
    let (addr, _handle) = spawn_test_server().await;
    let (tutor, tutor_id) = register(&addr, "Tara", "TUTOR").await;

    let mut client = connect_client(&addr, &tutor).await;
    let event = receive_event(&mut client).await;

    assert!(
        matches!(event, SessionEvent::Connected(_)),
        "Expected Connected event, got: {event:?}"
    );
    if let SessionEvent::Connected(payload) = event {
        assert_eq!(payload.user_id.to_string(), tutor_id);
        assert_eq!(payload.role, Role::Tutor);
    }
}

#[tokio::test]
async fn test_students_and_bad_tokens_are_rejected() {
    let (addr, _handle) = spawn_test_server().await;
    let (student, _) = register(&addr, "Sam", "STUDENT").await;

    let result = connect_async(format!("ws://{addr}/ws?token={student}")).await;
    assert!(result.is_err(), "students must not subscribe");

    let result = connect_async(format!("ws://{addr}/ws?token=not-a-token")).await;
    assert!(result.is_err(), "invalid tokens must be rejected");

    let result = connect_async(format!("ws://{addr}/ws")).await;
    assert!(result.is_err(), "a token is required");
}

// ============================================================================
// Event Tests
// ============================================================================

#[tokio::test]
async fn test_invitation_and_response_events_reach_owner() {
    let (addr, _handle) = spawn_test_server().await;
    let (tutor, _) = register(&addr, "Tara", "TUTOR").await;
    let (student, student_id) = register(&addr, "Sam", "STUDENT").await;
    let session_id = create_session(&addr, &tutor).await;

    let mut client = connect_client(&addr, &tutor).await;
    let _connected = receive_event(&mut client).await;

    post(
        &addr,
        &format!("/sessions/{session_id}/invite"),
        Some(&tutor),
        json!({"studentIds": [student_id]}),
    )
    .await;

    let event = receive_event(&mut client).await;
    let SessionEvent::InvitationSent(sent) = event else {
        panic!("Expected InvitationSent, got: {event:?}");
    };
    assert_eq!(sent.session_id.to_string(), session_id);
    assert_eq!(sent.student_id.to_string(), student_id);
    assert_eq!(sent.send_count, 1);

    let invitations = get(&addr, "/sessions/invitations", &student).await;
    let booking_id = invitations["data"][0]["booking"]["id"]
        .as_str()
        .expect("booking id")
        .to_string();
    post(
        &addr,
        &format!("/sessions/{booking_id}/decline"),
        Some(&student),
        json!({}),
    )
    .await;

    let event = receive_event(&mut client).await;
    let SessionEvent::ResponseRecorded(response) = event else {
        panic!("Expected ResponseRecorded, got: {event:?}");
    };
    assert_eq!(response.booking_id, sent.booking_id);
    assert_eq!(response.status, ResponseStatus::Declined);
    assert!(!response.reschedule_requested);
}

#[tokio::test]
async fn test_tutors_only_see_their_own_sessions() {
    let (addr, _handle) = spawn_test_server().await;
    let (owner, _) = register(&addr, "Tara", "TUTOR").await;
    let (other, _) = register(&addr, "Otto", "TUTOR").await;
    let (_, student_id) = register(&addr, "Sam", "STUDENT").await;
    let admin = post(
        &addr,
        "/auth/login",
        None,
        json!({"email": "root@example.com", "password": "root-password"}),
    )
    .await["data"]["token"]
        .as_str()
        .expect("token")
        .to_string();
    let session_id = create_session(&addr, &owner).await;

    let mut other_client = connect_client(&addr, &other).await;
    let _ = receive_event(&mut other_client).await;
    let mut admin_client = connect_client(&addr, &admin).await;
    let _ = receive_event(&mut admin_client).await;

    post(
        &addr,
        &format!("/sessions/{session_id}/invite"),
        Some(&owner),
        json!({"studentIds": [student_id]}),
    )
    .await;

    let event = receive_event(&mut admin_client).await;
    assert_eq!(event.event_name(), "invitation_sent");
    assert_silent(&mut other_client).await;

    post(
        &addr,
        &format!("/sessions/{session_id}/status"),
        Some(&owner),
        json!({"status": "CANCELLED"}),
    )
    .await;

    let event = receive_event(&mut admin_client).await;
    let SessionEvent::SessionStatusChanged(change) = event else {
        panic!("Expected SessionStatusChanged, got: {event:?}");
    };
    assert_eq!(change.closed_invitations, 1);
    assert_silent(&mut other_client).await;
}

#[tokio::test]
async fn test_server_continues_after_client_disconnect() {
    let (addr, _handle) = spawn_test_server().await;
    let (tutor, _) = register(&addr, "Tara", "TUTOR").await;

    {
        let mut client = connect_client(&addr, &tutor).await;
        let _ = receive_event(&mut client).await;
        client.close(None).await.expect("Failed to close");
    }

    let mut client = connect_client(&addr, &tutor).await;
    let event = receive_event(&mut client).await;
    assert_eq!(event.event_name(), "connected");
}

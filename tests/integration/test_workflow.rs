//! End-to-end tests of the invitation workflow over real HTTP.
//!
//! Each test spawns the router on an ephemeral port with an in-memory
//! mailer and drives it with `reqwest`, the way the web client does.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use edubridge_core::{accounts, create_router, AppState, BootstrapAdmin, Config, Store};
use edubridge_mailer::MemoryMailer;
use reqwest::Method;
use serde_json::{json, Value};

const WEBHOOK_SECRET: &str = "whsec-integration";

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// A running server plus handles into its state.
struct TestServer {
    base_url: String,
    client: reqwest::Client,
    mailer: MemoryMailer,
    state: AppState,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let mut config = Config::default();
        config.auth.bcrypt_cost = 4;
        config.mailer.webhook_secret = Some(WEBHOOK_SECRET.to_string());
        config.bootstrap_admin = Some(BootstrapAdmin {
            name: "Root".to_string(),
            email: "root@example.com".to_string(),
            password: "root-password".to_string(),
        });

        let mailer = MemoryMailer::new();
        let state = AppState::new(config, Arc::new(mailer.clone()));
        accounts::ensure_bootstrap_admin(&state)
            .await
            .expect("Failed to provision admin");

        let port = find_available_port();
        let addr = format!("127.0.0.1:{port}");
        let router = create_router(state.clone());
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind");

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server failed");
        });

        // Give the server a moment to start
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
            mailer,
            state,
            _handle: handle,
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (u16, Value) {
        let mut request = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.expect("Request failed");
        let status = response.status().as_u16();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn get(&self, path: &str, token: &str) -> (u16, Value) {
        self.request(Method::GET, path, Some(token), None).await
    }

    async fn post(&self, path: &str, token: &str, body: Option<Value>) -> (u16, Value) {
        self.request(Method::POST, path, Some(token), body).await
    }

    /// Registers an account and returns `(token, user id)`.
    async fn register(&self, name: &str, role: &str) -> (String, String) {
        let (status, body) = self
            .request(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({
                    "name": name,
                    "email": format!("{}@example.com", name.to_lowercase()),
                    "password": "password123",
                    "role": role,
                })),
            )
            .await;
        assert_eq!(status, 201, "register failed: {body}");
        (
            body["data"]["token"].as_str().expect("token").to_string(),
            body["data"]["user"]["id"].as_str().expect("id").to_string(),
        )
    }

    async fn login(&self, email: &str, password: &str) -> String {
        let (status, body) = self
            .request(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({"email": email, "password": password})),
            )
            .await;
        assert_eq!(status, 200, "login failed: {body}");
        body["data"]["token"].as_str().expect("token").to_string()
    }

    async fn create_session(&self, tutor: &str, max_participants: u32) -> String {
        let start = Utc::now() + chrono::Duration::days(3);
        let (status, body) = self
            .post(
                "/sessions",
                tutor,
                Some(json!({
                    "subject": "Linear Algebra Review",
                    "description": "Eigenvalues before the midterm",
                    "scheduledStart": start,
                    "scheduledEnd": start + chrono::Duration::minutes(90),
                    "sessionType": "GROUP",
                    "maxParticipants": max_participants,
                    "meetingUrl": "https://meet.example.com/linear",
                })),
            )
            .await;
        assert_eq!(status, 201, "create session failed: {body}");
        body["data"]["id"].as_str().expect("id").to_string()
    }

    async fn invite(&self, tutor: &str, session_id: &str, students: &[&str]) -> Value {
        let (status, body) = self
            .post(
                &format!("/sessions/{session_id}/invite"),
                tutor,
                Some(json!({"studentIds": students})),
            )
            .await;
        assert_eq!(status, 200, "invite failed: {body}");
        body["data"].clone()
    }

    /// Returns the booking id of the student's only invitation.
    async fn booking_of(&self, student: &str) -> String {
        let (status, body) = self.get("/sessions/invitations", student).await;
        assert_eq!(status, 200);
        body["data"][0]["booking"]["id"]
            .as_str()
            .expect("booking id")
            .to_string()
    }

    async fn summary(&self, tutor: &str, session_id: &str) -> Value {
        let (status, body) = self
            .get(&format!("/sessions/{session_id}/responses"), tutor)
            .await;
        assert_eq!(status, 200, "summary failed: {body}");
        body["data"].clone()
    }
}

fn row<'a>(summary: &'a Value, student_id: &str) -> &'a Value {
    summary["responses"]
        .as_array()
        .expect("responses")
        .iter()
        .find(|r| r["studentId"] == student_id)
        .expect("row for student")
}

// ============================================================================
// Invitation workflow
// ============================================================================

#[tokio::test]
async fn test_full_invitation_workflow() {
    let server = TestServer::start().await;
    let (tutor, _) = server.register("Tara", "TUTOR").await;
    let (ana, ana_id) = server.register("Ana", "STUDENT").await;
    let (ben, ben_id) = server.register("Ben", "STUDENT").await;
    let (cy, cy_id) = server.register("Cy", "STUDENT").await;
    let session_id = server.create_session(&tutor, 3).await;

    let outcome = server
        .invite(&tutor, &session_id, &[&ana_id, &ben_id, &cy_id])
        .await;
    assert_eq!(outcome["sent"], 3);
    assert_eq!(outcome["alreadyInvited"], 0);
    for address in ["ana@example.com", "ben@example.com", "cy@example.com"] {
        let sent = server.mailer.sent_to(address);
        assert_eq!(sent.len(), 1, "{address}");
        assert!(sent[0].subject.contains("Linear Algebra Review"));
    }

    // Inviting again creates no duplicates.
    let again = server.invite(&tutor, &session_id, &[&ana_id]).await;
    assert_eq!(again["sent"], 0);
    assert_eq!(again["alreadyInvited"], 1);

    let ana_booking = server.booking_of(&ana).await;
    let ben_booking = server.booking_of(&ben).await;
    let cy_booking = server.booking_of(&cy).await;

    let (status, body) = server
        .post(&format!("/sessions/{ana_booking}/confirm"), &ana, None)
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["responseStatus"], "CONFIRMED");

    let (status, _) = server
        .post(
            &format!("/sessions/{ben_booking}/decline"),
            &ben,
            Some(json!({"reason": "Exam that day"})),
        )
        .await;
    assert_eq!(status, 200);

    let summary = server.summary(&tutor, &session_id).await;
    assert_eq!(summary["counts"]["confirmed"], 1);
    assert_eq!(summary["counts"]["declined"], 1);
    assert_eq!(summary["counts"]["pending"], 1);
    assert_eq!(summary["counts"]["total"], 3);
    assert_eq!(row(&summary, &ben_id)["declineReason"], "Exam that day");

    // Only the pending student is reminded.
    let (status, body) = server
        .post(&format!("/sessions/{session_id}/remind"), &tutor, None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"], json!({"sent": 1, "failed": 0}));
    assert_eq!(server.mailer.sent_to("cy@example.com").len(), 2);
    assert_eq!(server.mailer.sent_to("ana@example.com").len(), 1);

    // Resend keeps the answer state, bumps the send count and restamps sentAt.
    let first_sent: chrono::DateTime<Utc> =
        serde_json::from_value(row(&summary, &cy_id)["sentAt"].clone()).expect("sentAt");
    tokio::time::sleep(Duration::from_millis(5)).await;
    let (status, body) = server
        .post(&format!("/sessions/{cy_booking}/resend"), &tutor, None)
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["responseStatus"], "PENDING");
    assert_eq!(body["data"]["sendCount"], 2);
    let resent: chrono::DateTime<Utc> =
        serde_json::from_value(body["data"]["sentAt"].clone()).expect("sentAt");
    assert!(resent > first_sent, "{first_sent} -> {resent}");

    let summary = server.summary(&tutor, &session_id).await;
    assert_eq!(row(&summary, &cy_id)["sentAt"], body["data"]["sentAt"]);

    let (status, _) = server
        .post(&format!("/sessions/{ana_booking}/resend"), &tutor, None)
        .await;
    assert_eq!(status, 409);

    // Confirming twice is harmless.
    let (status, body) = server
        .post(&format!("/sessions/{ana_booking}/confirm"), &ana, None)
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["responseStatus"], "CONFIRMED");

    // A declined booking cannot flip to confirmed.
    let (status, _) = server
        .post(&format!("/sessions/{ben_booking}/confirm"), &ben, None)
        .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn test_reschedule_request_stays_pending() {
    let server = TestServer::start().await;
    let (tutor, _) = server.register("Tara", "TUTOR").await;
    let (ana, ana_id) = server.register("Ana", "STUDENT").await;
    let session_id = server.create_session(&tutor, 1).await;
    server.invite(&tutor, &session_id, &[&ana_id]).await;
    let booking = server.booking_of(&ana).await;

    let (status, _) = server
        .post(
            &format!("/sessions/{booking}/reschedule"),
            &ana,
            Some(json!({"preferredTimes": []})),
        )
        .await;
    assert_eq!(status, 400);

    let later = Utc::now() + chrono::Duration::days(5);
    let (status, body) = server
        .post(
            &format!("/sessions/{booking}/reschedule"),
            &ana,
            Some(json!({
                "reason": "Travelling",
                "preferredTimes": [later, later + chrono::Duration::days(1)],
            })),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["responseStatus"], "PENDING");

    let summary = server.summary(&tutor, &session_id).await;
    assert_eq!(summary["counts"]["pending"], 1);
    assert_eq!(summary["counts"]["rescheduleRequested"], 1);
    let proposal = &row(&summary, &ana_id)["reschedule"];
    assert_eq!(proposal["reason"], "Travelling");
    assert_eq!(proposal["preferredTimes"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_students_cannot_touch_other_bookings() {
    let server = TestServer::start().await;
    let (tutor, _) = server.register("Tara", "TUTOR").await;
    let (ana, ana_id) = server.register("Ana", "STUDENT").await;
    let (ben, _) = server.register("Ben", "STUDENT").await;
    let session_id = server.create_session(&tutor, 4).await;
    server.invite(&tutor, &session_id, &[&ana_id]).await;
    let booking = server.booking_of(&ana).await;

    let (status, body) = server
        .post(&format!("/sessions/{booking}/confirm"), &ben, None)
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["success"], false);

    // Students cannot read the summary either.
    let (status, _) = server
        .get(&format!("/sessions/{session_id}/responses"), &ana)
        .await;
    assert_eq!(status, 403);

    // But the invited student can read the session itself.
    let (status, _) = server.get(&format!("/sessions/{session_id}"), &ana).await;
    assert_eq!(status, 200);
    let (status, _) = server.get(&format!("/sessions/{session_id}"), &ben).await;
    assert_eq!(status, 403);
}

#[tokio::test]
async fn test_cancelling_closes_open_invitations() {
    let server = TestServer::start().await;
    let (tutor, _) = server.register("Tara", "TUTOR").await;
    let (ana, ana_id) = server.register("Ana", "STUDENT").await;
    let (ben, ben_id) = server.register("Ben", "STUDENT").await;
    let session_id = server.create_session(&tutor, 4).await;
    server.invite(&tutor, &session_id, &[&ana_id, &ben_id]).await;
    let ana_booking = server.booking_of(&ana).await;
    let ben_booking = server.booking_of(&ben).await;
    server
        .post(&format!("/sessions/{ana_booking}/confirm"), &ana, None)
        .await;

    let (status, body) = server
        .post(
            &format!("/sessions/{session_id}/status"),
            &tutor,
            Some(json!({"status": "CANCELLED"})),
        )
        .await;
    assert_eq!(status, 200, "{body}");

    let summary = server.summary(&tutor, &session_id).await;
    assert_eq!(summary["counts"]["confirmed"], 1);
    assert_eq!(summary["counts"]["noResponse"], 1);
    assert_eq!(summary["counts"]["pending"], 0);

    let (status, _) = server
        .post(&format!("/sessions/{ben_booking}/confirm"), &ben, None)
        .await;
    assert_eq!(status, 409);

    // Terminal sessions stay terminal.
    let (status, _) = server
        .post(
            &format!("/sessions/{session_id}/status"),
            &tutor,
            Some(json!({"status": "SCHEDULED"})),
        )
        .await;
    assert_eq!(status, 409);
}

#[tokio::test]
async fn test_delete_session_cascades() {
    let server = TestServer::start().await;
    let (tutor, _) = server.register("Tara", "TUTOR").await;
    let (ana, ana_id) = server.register("Ana", "STUDENT").await;
    let session_id = server.create_session(&tutor, 4).await;
    server.invite(&tutor, &session_id, &[&ana_id]).await;

    let (status, body) = server
        .request(
            Method::DELETE,
            &format!("/sessions/{session_id}"),
            Some(&tutor),
            None,
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["bookingsRemoved"], 1);

    let (status, _) = server.get(&format!("/sessions/{session_id}"), &tutor).await;
    assert_eq!(status, 404);
    let (_, body) = server.get("/sessions/invitations", &ana).await;
    assert_eq!(body["data"], json!([]));
}

// ============================================================================
// Email tracking webhook
// ============================================================================

#[tokio::test]
async fn test_tracking_webhook_updates_engagement() {
    let server = TestServer::start().await;
    let (tutor, _) = server.register("Tara", "TUTOR").await;
    let (_, ana_id) = server.register("Ana", "STUDENT").await;
    let session_id = server.create_session(&tutor, 4).await;
    server.invite(&tutor, &session_id, &[&ana_id]).await;
    let message_id = server
        .mailer
        .last_message_id("ana@example.com")
        .expect("message id");

    let batch = json!({"events": [
        {"messageId": message_id, "event": "opened", "timestamp": Utc::now()},
        {"messageId": "someone-else", "event": "delivered", "timestamp": Utc::now()},
    ]});

    let response = server
        .client
        .post(format!("{}/webhooks/email", server.base_url))
        .header("x-webhook-secret", "wrong")
        .json(&batch)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status().as_u16(), 401);

    let response = server
        .client
        .post(format!("{}/webhooks/email", server.base_url))
        .header("x-webhook-secret", WEBHOOK_SECRET)
        .json(&batch)
        .send()
        .await
        .expect("Request failed");
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body["data"]["applied"], 1);
    assert_eq!(body["data"]["unmatched"], 1);

    let summary = server.summary(&tutor, &session_id).await;
    let engagement = &row(&summary, &ana_id)["engagement"];
    assert_eq!(
        engagement,
        &json!({"sent": true, "delivered": true, "opened": true, "clicked": false})
    );
}

// ============================================================================
// Administration
// ============================================================================

#[tokio::test]
async fn test_admin_deactivates_user_and_audits() {
    let server = TestServer::start().await;
    let admin = server.login("root@example.com", "root-password").await;
    let (tutor, tutor_id) = server.register("Tara", "TUTOR").await;

    let (status, body) = server.get("/admin/users", &admin).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));

    let (status, body) = server
        .request(
            Method::PATCH,
            &format!("/admin/users/{tutor_id}"),
            Some(&admin),
            Some(json!({"active": false})),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["data"]["active"], false);

    // The tutor's existing token stops working at once.
    let (status, body) = server.get("/auth/me", &tutor).await;
    assert_eq!(status, 401);
    assert_eq!(body["message"], "account is deactivated");

    let (status, body) = server.get("/admin/audit?limit=10", &admin).await;
    assert_eq!(status, 200);
    assert_eq!(body["data"][0]["action"], "USER_DEACTIVATED");
    assert_eq!(body["data"][0]["targetId"], tutor_id.as_str());

    // Admins cannot lock themselves out.
    let (_, me) = server.get("/auth/me", &admin).await;
    let admin_id = me["data"]["id"].as_str().expect("id").to_string();
    let (status, _) = server
        .request(
            Method::PATCH,
            &format!("/admin/users/{admin_id}"),
            Some(&admin),
            Some(json!({"active": false})),
        )
        .await;
    assert_eq!(status, 403);
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let server = TestServer::start().await;
    let (tutor, _) = server.register("Tara", "TUTOR").await;
    let (_, ana_id) = server.register("Ana", "STUDENT").await;
    let session_id = server.create_session(&tutor, 4).await;
    server.invite(&tutor, &session_id, &[&ana_id]).await;

    let path = std::env::temp_dir()
        .join(format!("edubridge-it-{}", uuid::Uuid::new_v4()))
        .join("data.json");
    server
        .state
        .store
        .lock()
        .await
        .save(&path)
        .await
        .expect("save");

    let restored = Store::load(&path).await.expect("load");
    assert_eq!(restored.users().len(), 3);
    let session_id: uuid::Uuid = session_id.parse().expect("uuid");
    assert_eq!(restored.bookings_for_session(session_id).len(), 1);

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

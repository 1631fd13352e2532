//! HTTP API for the EduBridge session service.
//!
//! Every handler is a thin adapter: it extracts the caller and the request,
//! calls into [`accounts`](crate::accounts), [`scheduling`](crate::scheduling)
//! or [`invitations`](crate::invitations), and wraps the result in the
//! [`ApiResponse`] envelope.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness probe
//! - `POST /auth/register`, `POST /auth/login`, `GET /auth/me` - Accounts
//! - `POST /sessions`, `GET /sessions`, `GET /sessions/today` - Scheduling
//! - `GET /sessions/invitations` - A student's invitations
//! - `GET|DELETE /sessions/:id`, `POST /sessions/:id/status` - One session
//! - `POST /sessions/:id/invite|remind`, `GET /sessions/:id/responses` - Tutor side
//! - `POST /sessions/:id/confirm|decline|reschedule|resend` - Per booking
//! - `POST /webhooks/email` - Provider tracking events
//! - `GET /admin/users`, `PATCH /admin/users/:id`, `GET /admin/audit` - Admin
//! - `GET /ws` - Live event feed
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use edubridge_core::{create_router, AppState, Config};
//! use edubridge_mailer::LogMailer;
//!
//! # async fn example() {
//! let state = AppState::new(Config::default(), Arc::new(LogMailer));
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use edubridge_mailer::TrackingBatch;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::accounts::{self, AuthPayload, LoginRequest, RegisterRequest, UpdateUserRequest};
use crate::audit::AuditEntry;
use crate::auth::AuthUser;
use crate::booking::{Booking, ResponseStatus};
use crate::error::EduError;
use crate::events;
use crate::invitations::{
    self, DeclineRequest, InvitationView, InviteOutcome, InviteRequest, ReminderOutcome,
    RescheduleBody, ResponseSummary, TrackingOutcome,
};
use crate::scheduling::{self, DeletedSession, StatusChange};
use crate::session::{NewSession, TutoringSession};
use crate::state::AppState;
use crate::user::UserView;

/// Header carrying the shared secret on provider webhooks.
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

// ============================================================================
// Envelope
// ============================================================================

/// Tagged response envelope.
///
/// Success carries `data`, failure carries `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error description on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Wraps a successful payload.
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            message: None,
        })
    }
}

impl ApiResponse<()> {
    /// Builds a failure envelope.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Always `"ok"`.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Query for `GET /sessions/invitations`.
#[derive(Debug, Default, Deserialize)]
pub struct InvitationQuery {
    /// Optional response status filter, case-insensitive.
    pub status: Option<String>,
}

/// Query for `GET /admin/audit`.
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    /// Maximum entries to return.
    pub limit: Option<usize>,
}

// ============================================================================
// API Error Type
// ============================================================================

/// Error returned by handlers and the auth extractor.
#[derive(Debug)]
pub struct ApiError(EduError);

impl ApiError {
    /// HTTP status for the wrapped error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            EduError::Validation(_) | EduError::ConfigValidationError { .. } => {
                StatusCode::BAD_REQUEST
            }
            EduError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            EduError::Forbidden(_) => StatusCode::FORBIDDEN,
            EduError::NotFound { .. } => StatusCode::NOT_FOUND,
            EduError::InvalidStateTransition { .. } | EduError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            EduError::ExternalService { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EduError> for ApiError {
    fn from(err: EduError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
            "internal server error".to_string()
        } else {
            debug!(status = status.as_u16(), error = %self.0, "Request rejected");
            self.0.to_string()
        };

        (status, Json(ApiResponse::failure(message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;
type Created<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all endpoints.
///
/// The router carries CORS (any origin) and request tracing middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(handle_register))
        .route("/login", post(handle_login))
        .route("/me", get(handle_me));

    let session_routes = Router::new()
        .route("/", post(handle_create_session).get(handle_list_sessions))
        .route("/today", get(handle_todays_sessions))
        .route("/invitations", get(handle_my_invitations))
        .route("/:id", get(handle_get_session).delete(handle_delete_session))
        .route("/:id/status", post(handle_change_status))
        .route("/:id/invite", post(handle_invite))
        .route("/:id/responses", get(handle_responses))
        .route("/:id/remind", post(handle_remind))
        .route("/:id/confirm", post(handle_confirm))
        .route("/:id/decline", post(handle_decline))
        .route("/:id/reschedule", post(handle_reschedule))
        .route("/:id/resend", post(handle_resend));

    let admin_routes = Router::new()
        .route("/users", get(handle_list_users))
        .route("/users/:id", patch(handle_update_user))
        .route("/audit", get(handle_audit_log));

    Router::new()
        .route("/health", get(handle_health))
        .nest("/auth", auth_routes)
        .nest("/sessions", session_routes)
        .nest("/admin", admin_routes)
        .route("/webhooks/email", post(handle_email_webhook))
        .route("/ws", get(events::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_health() -> Json<ApiResponse<Health>> {
    ApiResponse::ok(Health {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Created<AuthPayload> {
    let payload = accounts::register(&state, request).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(payload)))
}

async fn handle_login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<AuthPayload> {
    Ok(ApiResponse::ok(accounts::login(&state, request).await?))
}

async fn handle_me(State(state): State<Arc<AppState>>, caller: AuthUser) -> ApiResult<UserView> {
    Ok(ApiResponse::ok(accounts::me(&state, &caller).await?))
}

async fn handle_create_session(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(draft): Json<NewSession>,
) -> Created<TutoringSession> {
    let session = scheduling::create_session(&state, &caller, draft).await?;
    Ok((StatusCode::CREATED, ApiResponse::ok(session)))
}

async fn handle_list_sessions(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Vec<TutoringSession>> {
    Ok(ApiResponse::ok(
        scheduling::list_sessions(&state, &caller).await?,
    ))
}

async fn handle_todays_sessions(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Vec<TutoringSession>> {
    Ok(ApiResponse::ok(
        scheduling::todays_sessions(&state, &caller).await?,
    ))
}

/// Handler for `GET /sessions/invitations`.
///
/// An unknown `status` value is a validation error rather than an empty list.
async fn handle_my_invitations(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Query(query): Query<InvitationQuery>,
) -> ApiResult<Vec<InvitationView>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ResponseStatus>)
        .transpose()?;
    Ok(ApiResponse::ok(
        invitations::my_invitations(&state, &caller, status).await?,
    ))
}

async fn handle_get_session(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<TutoringSession> {
    Ok(ApiResponse::ok(
        scheduling::get_session(&state, &caller, id).await?,
    ))
}

async fn handle_delete_session(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<DeletedSession> {
    Ok(ApiResponse::ok(
        scheduling::delete_session(&state, &caller, id).await?,
    ))
}

async fn handle_change_status(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(change): Json<StatusChange>,
) -> ApiResult<TutoringSession> {
    Ok(ApiResponse::ok(
        scheduling::change_status(&state, &caller, id, change.status).await?,
    ))
}

async fn handle_invite(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<InviteRequest>,
) -> ApiResult<InviteOutcome> {
    Ok(ApiResponse::ok(
        invitations::invite(&state, &caller, id, request.student_ids).await?,
    ))
}

async fn handle_responses(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<ResponseSummary> {
    Ok(ApiResponse::ok(
        invitations::summary(&state, &caller, id).await?,
    ))
}

async fn handle_remind(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<ReminderOutcome> {
    Ok(ApiResponse::ok(
        invitations::remind(&state, &caller, id).await?,
    ))
}

async fn handle_confirm(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Booking> {
    Ok(ApiResponse::ok(
        invitations::confirm(&state, &caller, booking_id).await?,
    ))
}

/// Handler for `POST /sessions/:id/decline`.
///
/// The body is optional; a missing or blank body declines without a reason.
/// A body that is present must be valid JSON.
async fn handle_decline(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(booking_id): Path<Uuid>,
    body: Bytes,
) -> ApiResult<Booking> {
    let request = parse_decline_body(&body)?;
    Ok(ApiResponse::ok(
        invitations::decline(&state, &caller, booking_id, request.reason).await?,
    ))
}

fn parse_decline_body(body: &[u8]) -> crate::error::Result<DeclineRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(DeclineRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| EduError::validation(format!("invalid request body: {e}")))
}

/// Compares a provided webhook secret without short-circuiting on the
/// first differing byte.
fn secret_matches(provided: Option<&str>, expected: &str) -> bool {
    provided.is_some_and(|p| bool::from(p.as_bytes().ct_eq(expected.as_bytes())))
}

async fn handle_reschedule(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(booking_id): Path<Uuid>,
    Json(body): Json<RescheduleBody>,
) -> ApiResult<Booking> {
    Ok(ApiResponse::ok(
        invitations::request_reschedule(&state, &caller, booking_id, body).await?,
    ))
}

async fn handle_resend(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Booking> {
    Ok(ApiResponse::ok(
        invitations::resend(&state, &caller, booking_id).await?,
    ))
}

/// Handler for `POST /webhooks/email`.
///
/// When a webhook secret is configured the request must carry it in the
/// `x-webhook-secret` header.
async fn handle_email_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(batch): Json<TrackingBatch>,
) -> ApiResult<TrackingOutcome> {
    if let Some(expected) = state.config.mailer.webhook_secret.as_deref() {
        let provided = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|value| value.to_str().ok());
        if !secret_matches(provided, expected) {
            warn!("Rejected email webhook with missing or wrong secret");
            return Err(EduError::unauthorized("invalid webhook secret").into());
        }
    }

    Ok(ApiResponse::ok(
        invitations::apply_tracking(&state, batch).await,
    ))
}

async fn handle_list_users(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> ApiResult<Vec<UserView>> {
    Ok(ApiResponse::ok(accounts::list_users(&state, &caller).await?))
}

async fn handle_update_user(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path(id): Path<Uuid>,
    Json(update): Json<UpdateUserRequest>,
) -> ApiResult<UserView> {
    Ok(ApiResponse::ok(
        accounts::update_user(&state, &caller, id, update).await?,
    ))
}

async fn handle_audit_log(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Vec<AuditEntry>> {
    Ok(ApiResponse::ok(
        accounts::audit_log(&state, &caller, query.limit).await?,
    ))
}

// ============================================================================
// Tests
// ============================================================================

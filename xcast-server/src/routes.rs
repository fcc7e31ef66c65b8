//! HTTP routes for the scheduling API and the dispatch trigger
//!
//! Interactive routes authenticate through an opaque session token resolved
//! against the in-memory session store; the dispatch trigger authenticates
//! through a shared secret compared in constant time, before any repository
//! access. Responses use a `{ success, message?, data? }` envelope.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::error;

use libxcast::error::PlatformError;
use libxcast::scheduling::parse_schedule;
use libxcast::session::Session;
use libxcast::{ScheduledPost, SessionStore, XcastError, XcastService};

pub struct AppState {
    pub service: XcastService,
    pub sessions: Arc<SessionStore>,
    pub dispatch_api_key: String,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/q/health", get(health))
        .route("/api/posts", get(list_posts))
        .route("/api/posts/schedule", post(schedule_post))
        .route("/api/posts/update", post(update_post))
        .route("/api/posts/delete", post(delete_post))
        .route("/api/posts/post-now", post(post_now))
        .route("/api/cron-webhook", get(cron_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Response envelope and error mapping
// ============================================================================

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: None,
        data: Some(data),
    })
}

fn ok_with_message<T: Serialize>(message: &str, data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        message: Some(message.to_string()),
        data: Some(data),
    })
}

struct ApiError(XcastError);

impl From<XcastError> for ApiError {
    fn from(error: XcastError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            XcastError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            XcastError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            XcastError::Forbidden(_) => StatusCode::FORBIDDEN,
            XcastError::NotFound(_) => StatusCode::NOT_FOUND,
            // A credential the platform will not accept means the caller must
            // re-authorize
            XcastError::Platform(PlatformError::Authentication(_)) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Internal server error");
            "Internal server error".to_string()
        } else {
            self.0.to_string()
        };

        let body = Json(ApiResponse::<()> {
            success: false,
            message: Some(message),
            data: None,
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Session handling
// ============================================================================

const SESSION_HEADER: &str = "x-session-token";

fn session_from(headers: &HeaderMap, state: &AppState) -> Result<Session, ApiError> {
    let token = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| XcastError::Unauthorized("Missing session token".to_string()))?;

    state
        .sessions
        .get(token)
        .ok_or_else(|| XcastError::Unauthorized("Invalid or expired session".to_string()).into())
}

/// Validate (and if needed refresh) the session's platform credentials.
/// A refresh performed here is mirrored back into the session store.
async fn validate_session_credentials(
    state: &AppState,
    session: &Session,
) -> Result<(), ApiError> {
    state
        .service
        .tokens()
        .ensure_valid(&session.user_id, &session.credentials)
        .await?;
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "UP" }))
}

async fn list_posts(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<ScheduledPost>>>, ApiError> {
    let session = session_from(&headers, &state)?;
    validate_session_credentials(&state, &session).await?;

    let posts = state.service.posts().list(&session.user_id).await?;
    Ok(ok(posts))
}

#[derive(Deserialize)]
struct SchedulePostRequest {
    content: String,
    scheduled_for: String,
}

async fn schedule_post(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<SchedulePostRequest>,
) -> Result<Json<ApiResponse<Vec<ScheduledPost>>>, ApiError> {
    let session = session_from(&headers, &state)?;

    let scheduled_for = parse_schedule(&request.scheduled_for)?.timestamp();
    state
        .service
        .posts()
        .schedule(&session.user_id, &request.content, scheduled_for)
        .await?;

    let posts = state.service.posts().list(&session.user_id).await?;
    Ok(ok_with_message("Post scheduled successfully!", posts))
}

#[derive(Deserialize)]
struct UpdatePostRequest {
    id: String,
    content: Option<String>,
    scheduled_for: Option<String>,
}

async fn update_post(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<UpdatePostRequest>,
) -> Result<Json<ApiResponse<Vec<ScheduledPost>>>, ApiError> {
    let session = session_from(&headers, &state)?;
    validate_session_credentials(&state, &session).await?;

    let scheduled_for = match &request.scheduled_for {
        Some(raw) => Some(parse_schedule(raw)?.timestamp()),
        None => None,
    };

    state
        .service
        .posts()
        .update(
            &session.user_id,
            &request.id,
            request.content.as_deref(),
            scheduled_for,
        )
        .await?;

    let posts = state.service.posts().list(&session.user_id).await?;
    Ok(ok(posts))
}

#[derive(Deserialize)]
struct PostIdRequest {
    id: String,
}

async fn delete_post(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<PostIdRequest>,
) -> Result<Json<ApiResponse<Vec<ScheduledPost>>>, ApiError> {
    let session = session_from(&headers, &state)?;
    validate_session_credentials(&state, &session).await?;

    state
        .service
        .posts()
        .delete(&session.user_id, &request.id)
        .await?;

    let posts = state.service.posts().list(&session.user_id).await?;
    Ok(ok(posts))
}

async fn post_now(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<PostIdRequest>,
) -> Result<Json<ApiResponse<ScheduledPost>>, ApiError> {
    let session = session_from(&headers, &state)?;

    let post = state
        .service
        .posts()
        .post_now(&session.user_id, &request.id)
        .await?;

    Ok(ok(post))
}

async fn cron_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<libxcast::DispatchSummary>>, ApiError> {
    authorize_dispatch(&headers, &state)?;

    let summary = state.service.dispatcher().run_pass().await?;

    if summary.total == 0 {
        return Ok(ok_with_message("No posts due in this window", summary));
    }
    Ok(ok(summary))
}

/// Check the shared-secret bearer token before any repository access
fn authorize_dispatch(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| XcastError::Unauthorized("Missing dispatch credential".to_string()))?;

    // Constant-time comparison to avoid leaking the key through timing
    let matches: bool = token
        .as_bytes()
        .ct_eq(state.dispatch_api_key.as_bytes())
        .into();

    if !matches {
        return Err(XcastError::Unauthorized("Invalid dispatch credential".to_string()).into());
    }

    Ok(())
}

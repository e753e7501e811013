use super::state::{AppState, CallActivity};
use crate::error::CallError;
use crate::session::{SessionState, SessionStats};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartCallRequest {
    /// Opaque identity/token of the caller
    pub identity: String,

    /// Call endpoint (defaults to the configured one)
    pub endpoint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartCallResponse {
    pub session_id: Option<String>,
    pub state: SessionState,
}

#[derive(Debug, Serialize)]
pub struct StopCallResponse {
    pub state: SessionState,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct CallStatusResponse {
    pub state: SessionState,
    pub session_id: Option<String>,
    /// Absent while a call is starting
    pub stats: Option<SessionStats>,
    #[serde(flatten)]
    pub activity: CallActivity,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}

fn call_error_response(e: &CallError) -> Response {
    let status = match e {
        CallError::InvalidState(_) => StatusCode::CONFLICT,
        CallError::Permission(_) => StatusCode::FORBIDDEN,
        CallError::Connection(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /call/start
/// Start a call; returns once the channel is open and the call is ringing
pub async fn start_call(State(state): State<AppState>, Json(req): Json<StartCallRequest>) -> Response {
    let Some(endpoint) = req.endpoint.or_else(|| state.default_endpoint.clone()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "no endpoint given and none configured".to_string(),
        );
    };

    let mut session = state.session.lock().await;
    match session.start(&endpoint, &req.identity).await {
        Ok(()) => {
            info!("Call started via HTTP");
            (
                StatusCode::OK,
                Json(StartCallResponse {
                    session_id: session.session_id().map(str::to_string),
                    state: session.state(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to start call: {}", e);
            call_error_response(&e)
        }
    }
}

/// POST /call/stop
/// End the current call (no-op when idle)
pub async fn stop_call(State(state): State<AppState>) -> Response {
    let mut session = state.session.lock().await;
    match session.stop().await {
        Ok(()) => (
            StatusCode::OK,
            Json(StopCallResponse {
                state: session.state(),
                stats: session.stats(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to stop call: {}", e);
            call_error_response(&e)
        }
    }
}

/// GET /call/status
pub async fn call_status(State(state): State<AppState>) -> Response {
    let current = *state.state_rx.borrow();
    let (session_id, stats) = match state.session.try_lock() {
        Ok(session) => (session.session_id().map(str::to_string), Some(session.stats())),
        Err(_) => (None, None),
    };
    let activity = state.activity.read().await.clone();

    (
        StatusCode::OK,
        Json(CallStatusResponse {
            state: current,
            session_id,
            stats,
            activity,
        }),
    )
        .into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

use super::state::AppState;
use crate::session::{SessionState, SessionStats};
use crate::telephony::connect_stream_twiml;
use crate::transcript::TranscriptEvent;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{info, warn};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StopSessionResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(super) fn not_found(what: &str, id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("{} {} not found", what, id),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /incoming-call/:scenario_id
/// Answer a call by streaming its audio to /media-stream/:scenario_id
pub async fn incoming_call(
    State(state): State<AppState>,
    Path(scenario_id): Path<String>,
) -> Response {
    if !state.scenarios.contains(&scenario_id) {
        warn!("Incoming call for unknown scenario {}", scenario_id);
        return not_found("Scenario", &scenario_id);
    }

    info!("Incoming call for scenario {}", scenario_id);
    let twiml = connect_stream_twiml(&state.config.service.public_url, &scenario_id);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml")],
        twiml,
    )
        .into_response()
}

/// POST /sessions/:session_id/stop
/// Stop a call session
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(handle) = state.session(&session_id).await else {
        return not_found("Session", &session_id);
    };

    let already_closed = handle.state() == SessionState::Closed;
    if !already_closed {
        info!("Stopping session: {}", session_id);
        handle.stop();
    }

    (
        StatusCode::OK,
        Json(StopSessionResponse {
            session_id: session_id.clone(),
            status: if already_closed { "closed" } else { "stopping" }.to_string(),
            message: if already_closed {
                "Session already closed".to_string()
            } else {
                "Stop requested".to_string()
            },
            stats: handle.stats(),
        }),
    )
        .into_response()
}

/// GET /sessions/:session_id/status
/// Get status of a call session
pub async fn get_session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.session(&session_id).await {
        Some(handle) => (StatusCode::OK, Json(handle.stats())).into_response(),
        None => not_found("Session", &session_id),
    }
}

/// GET /sessions/:session_id/transcript
/// Get transcript for a session (accumulated so far)
pub async fn get_session_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if state.session(&session_id).await.is_none() {
        return not_found("Session", &session_id);
    }
    let transcript: Vec<TranscriptEvent> = state.transcripts.events(&session_id).await;
    (StatusCode::OK, Json(transcript)).into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

use super::handlers;
use super::media_stream;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Provider webhook + media stream
        .route(
            "/incoming-call/:scenario_id",
            post(handlers::incoming_call).get(handlers::incoming_call),
        )
        .route(
            "/media-stream/:scenario_id",
            get(media_stream::media_stream),
        )
        // Session queries and control
        .route(
            "/sessions/:session_id/status",
            get(handlers::get_session_status),
        )
        .route(
            "/sessions/:session_id/transcript",
            get(handlers::get_session_transcript),
        )
        .route("/sessions/:session_id/stop", post(handlers::stop_session))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

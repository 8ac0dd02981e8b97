//! HTTP API server for the telephony provider and operators
//!
//! This module provides:
//! - POST /incoming-call/:scenario_id - TwiML connecting the call to a media stream
//! - GET /media-stream/:scenario_id - Media-stream WebSocket, one call session per connection
//! - GET /sessions/:id/status - Query session status
//! - GET /sessions/:id/transcript - Get the transcript so far
//! - POST /sessions/:id/stop - Stop a session
//! - GET /health - Health check

mod handlers;
mod media_stream;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

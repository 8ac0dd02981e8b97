//! Call session management
//!
//! This module provides the `CallSession` abstraction that manages:
//! - Inbound media from the telephony stream
//! - The session's recognizer connection and turn detection
//! - Response generation, synthesis and paced playback
//! - Conversation history, transcript events and statistics

mod config;
mod history;
mod playback;
mod session;
mod state;
mod stats;

pub use config::SessionConfig;
pub use history::{ConversationHistory, ConversationTurn};
pub use playback::{Playback, PlaybackError};
pub use session::{CallSession, SessionHandle, SessionServices};
pub use state::SessionState;
pub use stats::{SessionMonitor, SessionStats};

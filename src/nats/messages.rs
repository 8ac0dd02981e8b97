use serde::{Deserialize, Serialize};

/// Completed turn published to NATS
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptTurnMessage {
    pub session_id: String,
    pub speaker: String, // "counterpart" or "participant"
    pub text: String,
    pub timestamp: String, // RFC3339 timestamp
}

//! Transcript events and the sinks that record them
//!
//! One `TranscriptEvent` is emitted per completed turn by either party.
//! Sinks are append-only; nothing is ever rewritten.

mod sinks;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::nats::TranscriptTurnMessage;

pub use sinks::{FanoutSink, JsonlTranscriptSink, MemoryTranscriptSink, NatsTranscriptSink};

/// Who spoke a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    /// The remote party on the phone line
    Counterpart,
    /// The simulated caller this bridge speaks for
    Participant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Counterpart => "counterpart",
            Speaker::Participant => "participant",
        }
    }

    /// Chat-completion role for this speaker, seen from the participant
    pub fn chat_role(&self) -> &'static str {
        match self {
            Speaker::Counterpart => "user",
            Speaker::Participant => "assistant",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One completed turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub timestamp: DateTime<Utc>,
    pub speaker: Speaker,
    pub text: String,
}

impl TranscriptEvent {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            speaker,
            text: text.into(),
        }
    }

    /// NATS payload for this event
    pub fn to_message(&self, session_id: &str) -> TranscriptTurnMessage {
        TranscriptTurnMessage {
            session_id: session_id.to_string(),
            speaker: self.speaker.as_str().to_string(),
            text: self.text.clone(),
            timestamp: self.timestamp.to_rfc3339(),
        }
    }
}

/// Append-only destination for transcript events
///
/// Implementations:
/// - `MemoryTranscriptSink`: per-session event lists served by the HTTP API
/// - `JsonlTranscriptSink`: one JSON line per event in a per-session file
/// - `NatsTranscriptSink`: publishes on `transcript.turn.<session_id>`
/// - `FanoutSink`: forwards to several sinks
#[async_trait::async_trait]
pub trait TranscriptSink: Send + Sync {
    /// Record one completed turn
    async fn record(&self, session_id: &str, event: &TranscriptEvent) -> anyhow::Result<()>;

    /// Sink name for logging
    fn name(&self) -> &str;
}

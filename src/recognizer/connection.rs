use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::AudioDomain;

/// Streaming recognizer settings sent with every connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerOptions {
    pub model: String,
    pub language: String,
    /// Encoding of the audio we forward (wire = mulaw, linear = linear16)
    pub encoding: AudioDomain,
    pub sample_rate: u32,
    pub channels: u16,
    pub punctuate: bool,
    pub interim_results: bool,
    /// Silence after speech before the recognizer emits a turn boundary
    pub utterance_end_ms: u32,
    pub vad_events: bool,
    pub endpointing_ms: u32,
}

impl Default for RecognizerOptions {
    fn default() -> Self {
        Self {
            model: "nova-2".to_string(),
            language: "en-US".to_string(),
            encoding: AudioDomain::Wire,
            sample_rate: 8000,
            channels: 1,
            punctuate: true,
            interim_results: true,
            utterance_end_ms: 1000,
            vad_events: true,
            endpointing_ms: 300,
        }
    }
}

impl RecognizerOptions {
    pub fn encoding_name(&self) -> &'static str {
        match self.encoding {
            AudioDomain::Wire => "mulaw",
            AudioDomain::Linear => "linear16",
        }
    }
}

/// Something the recognizer told us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// Interim hypothesis for the current segment
    Partial(String),
    /// Finalized segment text
    Final(String),
    /// The speaker finished an utterance
    UtteranceEnd,
    /// The connection closed
    Closed { reason: Option<String> },
    /// The connection failed
    Error(String),
}

/// Whether a connection is still usable for sending
///
/// Cleared by the connection's reader the moment it observes a close or
/// error, and by the bridge when a send fails. Never set again once cleared;
/// reconnecting creates a new flag.
#[derive(Debug, Clone)]
pub struct LivenessFlag(Arc<AtomicBool>);

impl LivenessFlag {
    /// A flag for a freshly established connection
    pub fn live() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Mark the connection dead; returns true if it was live until now
    pub fn clear(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Write half of a recognizer connection
#[async_trait::async_trait]
pub trait RecognizerSink: Send {
    /// Forward one chunk of audio
    async fn send_audio(&mut self, audio: &[u8]) -> Result<()>;

    /// Keep an idle connection from being dropped
    async fn keep_alive(&mut self) -> Result<()>;

    /// Ask the recognizer to flush and close
    async fn finish(&mut self) -> Result<()>;
}

/// An established recognizer connection
///
/// Events arrive on `events` in the order the recognizer produced them; the
/// channel ends after `Closed`/`Error`.
pub struct RecognizerLink {
    pub sink: Box<dyn RecognizerSink>,
    pub events: mpsc::Receiver<RecognizerEvent>,
    pub live: LivenessFlag,
}

/// Opens recognizer connections
///
/// Implementations:
/// - Deepgram streaming API over WebSocket
/// - Scripted connectors in tests
#[async_trait::async_trait]
pub trait RecognizerConnector: Send + Sync {
    /// Perform the handshake and return a live connection
    async fn connect(&self, options: &RecognizerOptions) -> Result<RecognizerLink>;

    /// Connector name for logging
    fn name(&self) -> &str;
}

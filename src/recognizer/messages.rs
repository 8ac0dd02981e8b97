use serde::{Deserialize, Serialize};
use tracing::debug;

use super::connection::RecognizerEvent;

/// Control message that keeps an idle stream open
pub const KEEP_ALIVE: &str = r#"{"type":"KeepAlive"}"#;

/// Control message asking the recognizer to flush and close
pub const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

/// Server → client message on the streaming recognizer socket
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamMessage {
    Results(ResultsMessage),
    UtteranceEnd(UtteranceEndMessage),
    #[serde(other)]
    Other,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsMessage {
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
    pub channel: ResultsChannel,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsChannel {
    pub alternatives: Vec<Alternative>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Alternative {
    pub transcript: String,
    pub confidence: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UtteranceEndMessage {
    pub last_word_end: Option<f64>,
}

impl ResultsMessage {
    /// Top alternative's transcript
    pub fn transcript(&self) -> &str {
        self.channel
            .alternatives
            .first()
            .map(|alt| alt.transcript.trim())
            .unwrap_or("")
    }
}

/// Translate one text frame from the recognizer into a bridge event
///
/// Blank results and message types the bridge does not use yield `None`.
pub fn parse_stream_message(text: &str) -> Option<RecognizerEvent> {
    match serde_json::from_str::<StreamMessage>(text) {
        Ok(StreamMessage::Results(results)) => {
            let transcript = results.transcript();
            if transcript.is_empty() {
                None
            } else if results.is_final {
                Some(RecognizerEvent::Final(transcript.to_string()))
            } else {
                Some(RecognizerEvent::Partial(transcript.to_string()))
            }
        }
        Ok(StreamMessage::UtteranceEnd(_)) => Some(RecognizerEvent::UtteranceEnd),
        Ok(StreamMessage::Other) => None,
        Err(e) => {
            debug!("Ignoring unparseable recognizer message: {}", e);
            None
        }
    }
}

//! Response generation and speech synthesis collaborators
//!
//! Both are plain request/response contracts. The session calls them one
//! after the other for each turn and never has more than one pair in flight.

mod farewell;
mod openai;

use anyhow::Result;

use crate::audio::SourceFormat;
use crate::scenario::Scenario;
use crate::session::ConversationTurn;

pub use farewell::{is_farewell, FAREWELL_PHRASES};
pub use openai::{build_messages, ChatMessage, OpenAiResponder, OpenAiSynthesizer};

/// Produces the participant's next line
#[async_trait::async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// `history` ends with the counterpart turn being answered
    async fn respond(&self, scenario: &Scenario, history: &[ConversationTurn]) -> Result<String>;

    fn name(&self) -> &str;
}

/// Synthesized speech in the synthesizer's output format
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: SourceFormat,
}

/// Turns text into audio
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// `voice` overrides the synthesizer's default voice
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<SynthesizedAudio>;

    fn name(&self) -> &str;
}

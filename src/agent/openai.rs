use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ResponseGenerator, SpeechSynthesizer, SynthesizedAudio};
use crate::audio::SourceFormat;
use crate::config::{ResponderConfig, SynthesisConfig};
use crate::scenario::Scenario;
use crate::session::ConversationTurn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Appended to every scenario prompt
const SPEAKING_INSTRUCTIONS: &str = "

ADDITIONAL INSTRUCTIONS:
- Keep your response to 1-3 sentences maximum. Sound natural and human.
- Do NOT narrate actions or emotions in brackets like [pauses] or [sighs].
- Do NOT break character or acknowledge you are an AI.
- If the conversation has achieved its goal and it feels natural to end, say a polite goodbye.
- If the other person seems to be wrapping up but you haven't achieved your goal, gently redirect.
- Respond ONLY with what you would say out loud: no stage directions, no internal thoughts.
";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

/// Chat messages for one response: persona prompt, then the conversation
pub fn build_messages(scenario: &Scenario, history: &[ConversationTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage {
        role: "system".to_string(),
        content: format!("{}{}", scenario.system_prompt, SPEAKING_INSTRUCTIONS),
    });
    messages.extend(history.iter().map(|turn| ChatMessage {
        role: turn.speaker.chat_role().to_string(),
        content: turn.text.clone(),
    }));
    messages
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// Chat-completions response generator (OpenAI-compatible API)
pub struct OpenAiResponder {
    config: ResponderConfig,
    client: reqwest::Client,
}

impl OpenAiResponder {
    pub fn new(config: ResponderConfig) -> Result<Self> {
        Ok(Self {
            config,
            client: http_client()?,
        })
    }
}

#[async_trait::async_trait]
impl ResponseGenerator for OpenAiResponder {
    async fn respond(&self, scenario: &Scenario, history: &[ConversationTurn]) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.config.model,
            messages: build_messages(scenario, history),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("Response generation request failed")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("Response generation error {}: {}", status, body);
        }

        let parsed: ChatResponse = res
            .json()
            .await
            .context("Response generation reply was not valid JSON")?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| anyhow!("Response generation returned no choices"))?;

        debug!("Generated {} chars for scenario {}", text.len(), scenario.id);
        Ok(text)
    }

    fn name(&self) -> &str {
        "openai-chat"
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
}

/// Text-to-speech over the OpenAI-compatible `/audio/speech` endpoint
pub struct OpenAiSynthesizer {
    config: SynthesisConfig,
    client: reqwest::Client,
    format: SourceFormat,
}

impl OpenAiSynthesizer {
    pub fn new(config: SynthesisConfig) -> Result<Self> {
        let format = match config.format.as_str() {
            "mp3" => SourceFormat::Mp3,
            "wav" => SourceFormat::Wav,
            "opus" | "aac" | "flac" => SourceFormat::Compressed,
            // Headerless 24kHz mono 16-bit little-endian
            "pcm" => SourceFormat::Pcm16 {
                sample_rate: 24_000,
                channels: 1,
            },
            other => bail!("Unsupported synthesis format: {}", other),
        };
        Ok(Self {
            config,
            client: http_client()?,
            format,
        })
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str, voice: Option<&str>) -> Result<SynthesizedAudio> {
        let url = format!("{}/audio/speech", self.config.base_url.trim_end_matches('/'));
        let body = SpeechRequest {
            model: &self.config.model,
            voice: voice.unwrap_or(&self.config.voice),
            input: text,
            response_format: &self.config.format,
        };

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("Synthesis request failed")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("Synthesis error {}: {}", status, body);
        }

        let bytes = res
            .bytes()
            .await
            .context("Failed to read synthesized audio")?
            .to_vec();
        if bytes.is_empty() {
            bail!("Synthesizer returned no audio");
        }

        Ok(SynthesizedAudio {
            bytes,
            format: self.format,
        })
    }

    fn name(&self) -> &str {
        "openai-tts"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Speaker;

    #[test]
    fn test_history_roles() {
        let scenario = Scenario::new("refill", "refill", "You need a prescription refill.");
        let history = vec![
            ConversationTurn::new(Speaker::Counterpart, "Thanks for calling, how can I help?"),
            ConversationTurn::new(Speaker::Participant, "I need a refill."),
            ConversationTurn::new(Speaker::Counterpart, "Which medication?"),
        ];

        let messages = build_messages(&scenario, &history);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.starts_with("You need a prescription refill."));
        assert!(messages[0].content.contains("1-3 sentences"));
        let roles: Vec<&str> = messages[1..].iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["user", "assistant", "user"]);
        assert_eq!(messages[3].content, "Which medication?");
    }

    #[test]
    fn test_synthesis_format() -> Result<()> {
        let mp3 = OpenAiSynthesizer::new(SynthesisConfig::default())?;
        assert_eq!(mp3.format, SourceFormat::Mp3);

        let bad = SynthesisConfig {
            format: "midi".to_string(),
            ..SynthesisConfig::default()
        };
        assert!(OpenAiSynthesizer::new(bad).is_err());
        Ok(())
    }
}

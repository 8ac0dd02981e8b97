use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::AudioDomain;
use crate::recognizer::{BridgeSettings, RecognizerOptions};

/// Environment variables override the file, e.g. `CALL_BRIDGE__RECOGNIZER__API_KEY`
pub const ENV_PREFIX: &str = "CALL_BRIDGE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub recognizer: RecognizerConfig,
    pub responder: ResponderConfig,
    pub synthesis: SynthesisConfig,
    pub session: SessionDefaults,
    pub transcripts: TranscriptConfig,
    pub scenarios: ScenarioConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// Externally reachable base URL, used to build media-stream URLs
    pub public_url: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "call-bridge".to_string(),
            public_url: "http://localhost:8080".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
    pub language: String,
    pub encoding: AudioDomain,
    pub sample_rate: u32,
    pub utterance_end_ms: u32,
    pub endpointing_ms: u32,
    pub turn_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub reconnect_backoff_ms: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        let options = RecognizerOptions::default();
        Self {
            url: crate::recognizer::deepgram::DEFAULT_LISTEN_URL.to_string(),
            api_key: String::new(),
            model: options.model,
            language: options.language,
            encoding: options.encoding,
            sample_rate: options.sample_rate,
            utterance_end_ms: options.utterance_end_ms,
            endpointing_ms: options.endpointing_ms,
            turn_timeout_secs: 20,
            keepalive_secs: 8,
            reconnect_backoff_ms: 1000,
        }
    }
}

impl RecognizerConfig {
    pub fn options(&self) -> RecognizerOptions {
        RecognizerOptions {
            model: self.model.clone(),
            language: self.language.clone(),
            encoding: self.encoding,
            sample_rate: self.sample_rate,
            utterance_end_ms: self.utterance_end_ms,
            endpointing_ms: self.endpointing_ms,
            ..RecognizerOptions::default()
        }
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            turn_timeout: Duration::from_secs(self.turn_timeout_secs),
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
        }
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o".to_string(),
            max_tokens: 150,
            temperature: 0.7,
        }
    }
}

/// Which transcoder converts synthesized audio to wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscoderKind {
    Native,
    Ffmpeg,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub voice: String,
    /// Response format requested from the synthesizer (mp3 or wav)
    pub format: String,
    pub transcoder: TranscoderKind,
    pub ffmpeg_path: String,
    /// Give up on an ffmpeg run after this long
    pub ffmpeg_timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            format: "mp3".to_string(),
            transcoder: TranscoderKind::Native,
            ffmpeg_path: "ffmpeg".to_string(),
            ffmpeg_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionDefaults {
    /// Pause after a farewell before hanging up
    pub hangup_grace_ms: u64,
    /// Delay between outbound frames; 0 paces each frame by its own duration
    pub frame_pace_ms: u64,
    /// How long a closed session stays queryable before it is evicted
    pub closed_retention_secs: u64,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            hangup_grace_ms: 3000,
            frame_pace_ms: 0,
            closed_retention_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Write one JSON-lines file per session here
    pub directory: Option<PathBuf>,
    /// Publish turns to this NATS server
    pub nats_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub catalog: PathBuf,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            catalog: PathBuf::from("config/scenarios.toml"),
        }
    }
}

impl Config {
    /// Load from a TOML file (extension optional) layered under environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load config: {}", path))?;

        settings
            .try_deserialize()
            .with_context(|| format!("Invalid config: {}", path))
    }
}

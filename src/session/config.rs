use std::time::Duration;

use crate::config::Config;
use crate::recognizer::{BridgeSettings, RecognizerOptions};
use crate::scenario::Scenario;

/// Configuration for one call session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "call-6f1c...")
    pub session_id: String,

    /// Persona the participant plays
    pub scenario: Scenario,

    /// Settings sent with every recognizer connection
    pub recognizer: RecognizerOptions,

    /// Turn timeout and reconnect backoff
    pub bridge: BridgeSettings,

    /// How often an idle recognizer connection is pinged
    pub keepalive_interval: Duration,

    /// Pause between a spoken farewell and hanging up
    pub hangup_grace: Duration,

    /// Fixed delay between outbound frames; `None` paces by frame duration
    pub frame_pace: Option<Duration>,
}

impl SessionConfig {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            session_id: format!("call-{}", uuid::Uuid::new_v4()),
            scenario,
            recognizer: RecognizerOptions::default(),
            bridge: BridgeSettings::default(),
            keepalive_interval: Duration::from_secs(8),
            hangup_grace: Duration::from_millis(3000),
            frame_pace: None,
        }
    }

    /// Session settings taken from the service config
    pub fn from_config(config: &Config, scenario: Scenario) -> Self {
        let frame_pace = match config.session.frame_pace_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        Self {
            recognizer: config.recognizer.options(),
            bridge: config.recognizer.bridge_settings(),
            keepalive_interval: config.recognizer.keepalive_interval(),
            hangup_grace: Duration::from_millis(config.session.hangup_grace_ms),
            frame_pace,
            ..Self::new(scenario)
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

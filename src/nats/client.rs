use anyhow::{Context, Result};
use async_nats::Client;
use tracing::{debug, info};

use super::messages::TranscriptTurnMessage;

/// Subject prefix for completed turns; the session id is appended
pub const TRANSCRIPT_SUBJECT_PREFIX: &str = "transcript.turn";

pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Connect to NATS server
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", url);

        let client = async_nats::connect(url)
            .await
            .context("Failed to connect to NATS")?;

        info!("Connected to NATS successfully");

        Ok(Self { client })
    }

    pub fn subject_for(session_id: &str) -> String {
        format!("{}.{}", TRANSCRIPT_SUBJECT_PREFIX, session_id)
    }

    /// Publish one completed turn
    pub async fn publish_turn(&self, message: &TranscriptTurnMessage) -> Result<()> {
        let subject = Self::subject_for(&message.session_id);
        let payload = serde_json::to_vec(message)?;

        self.client
            .publish(subject.clone(), payload.into())
            .await
            .context("Failed to publish transcript turn")?;

        debug!(
            "Published turn to {} (speaker={}, chars={})",
            subject,
            message.speaker,
            message.text.len()
        );

        Ok(())
    }

    /// Flush pending publishes
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")
    }
}

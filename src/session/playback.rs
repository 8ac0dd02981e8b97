use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::stats::SessionMonitor;
use crate::agent::SynthesizedAudio;
use crate::audio::{encode_outbound, CodecError, Transcoder};
use crate::telephony::{OutboundMessage, PLAYBACK_COMPLETE_MARK};

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("could not encode synthesized audio: {0}")]
    Codec(#[from] CodecError),

    #[error("outbound channel closed")]
    TransportClosed,
}

/// One turn's outbound audio, ready to stream
pub struct Playback {
    pub session_id: String,
    pub stream_sid: String,
    pub audio: SynthesizedAudio,
    pub transcoder: Arc<dyn Transcoder>,
    pub outbound: mpsc::Sender<OutboundMessage>,
    pub monitor: Arc<SessionMonitor>,
    /// Fixed inter-frame delay; `None` waits each frame's own duration
    pub pace: Option<Duration>,
}

impl Playback {
    /// Encode, chunk and stream the audio in real time, then send the
    /// completion mark. Returns the number of frames sent.
    pub async fn run(self) -> Result<usize, PlaybackError> {
        let frames =
            encode_outbound(self.transcoder.as_ref(), &self.audio.bytes, self.audio.format)
                .await?;
        debug!(
            "[{}] Streaming {} outbound frames",
            self.session_id,
            frames.len()
        );

        let mut next_send = Instant::now();
        for frame in &frames {
            // 8 wire bytes per millisecond
            let spacing = self
                .pace
                .unwrap_or_else(|| Duration::from_millis(frame.len() as u64 / 8));

            self.outbound
                .send(OutboundMessage::media(&self.stream_sid, frame))
                .await
                .map_err(|_| PlaybackError::TransportClosed)?;
            self.monitor.record_frame_sent();

            next_send += spacing;
            tokio::time::sleep_until(next_send).await;
        }

        self.outbound
            .send(OutboundMessage::mark(&self.stream_sid, PLAYBACK_COMPLETE_MARK))
            .await
            .map_err(|_| PlaybackError::TransportClosed)?;

        Ok(frames.len())
    }
}

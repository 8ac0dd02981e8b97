use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Codec domain of a frame's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioDomain {
    /// 8kHz mono mulaw, one byte per sample (telephony wire format)
    Wire,
    /// 8kHz mono 16-bit little-endian linear PCM
    Linear,
}

impl AudioDomain {
    /// Bytes per sample in this domain
    pub fn sample_width(self) -> usize {
        match self {
            AudioDomain::Wire => 1,
            AudioDomain::Linear => 2,
        }
    }
}

/// Direction a frame travels relative to the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Telephony → recognizer
    Inbound,
    /// Synthesizer → telephony
    Outbound,
}

/// An immutable chunk of audio bytes in one codec domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Monotonically increasing within one direction of one stream
    pub sequence: u64,
    /// Milliseconds since the stream's sequencer was created
    pub timestamp_ms: u64,
    /// Codec domain of `payload`
    pub domain: AudioDomain,
    /// Raw audio bytes
    pub payload: Vec<u8>,
}

impl AudioFrame {
    /// Playback duration of this frame at 8kHz
    pub fn duration_ms(&self) -> u64 {
        let samples = self.payload.len() / self.domain.sample_width();
        (samples as u64 * 1000) / 8000
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Stamps frames for one direction of one stream
#[derive(Debug)]
pub struct FrameSequencer {
    direction: Direction,
    next: u64,
    origin: Instant,
}

impl FrameSequencer {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            next: 0,
            origin: Instant::now(),
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Wrap `payload` into the next frame of this stream
    pub fn stamp(&mut self, domain: AudioDomain, payload: Vec<u8>) -> AudioFrame {
        let sequence = self.next;
        self.next += 1;
        AudioFrame {
            sequence,
            timestamp_ms: self.origin.elapsed().as_millis() as u64,
            domain,
            payload,
        }
    }

    /// Number of frames stamped so far
    pub fn issued(&self) -> u64 {
        self.next
    }
}

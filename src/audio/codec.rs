// G.711 mulaw conversion and wire-frame chunking
//
// The telephony side speaks 8kHz mono mulaw. The recognizer can take either
// mulaw directly or 16-bit linear PCM, and synthesized audio always ends up as
// mulaw split into fixed 160-byte frames for paced playback.

use thiserror::Error;

use super::frame::{AudioDomain, AudioFrame};

/// Telephony sample rate
pub const WIRE_SAMPLE_RATE: u32 = 8000;

/// Outbound wire frame size in bytes (20ms of 8kHz mono mulaw)
pub const FRAME_BYTES: usize = 160;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

static DECODE_TABLE: [i16; 256] = build_decode_table();

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload of {len} bytes is not a multiple of the {width}-byte sample width")]
    MalformedLength { len: usize, width: usize },

    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to decode synthesized audio: {0}")]
    Undecodable(String),

    #[error("resampling failed: {0}")]
    Resample(String),

    #[error("{tool} failed: {message}")]
    Utility { tool: String, message: String },

    #[error("{tool} did not finish within {secs}s")]
    TimedOut { tool: String, secs: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const fn mulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let exponent = ((u >> 4) & 0x07) as i32;
    let mantissa = (u & 0x0f) as i32;
    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if u & 0x80 != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

const fn build_decode_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = mulaw_to_linear(i as u8);
        i += 1;
    }
    table
}

/// Encode one 16-bit linear sample as mulaw
pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0x00
    };

    value = value.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && value & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = (value >> (exponent + 3)) & 0x0f;
    !(sign | (exponent << 4) | mantissa) as u8
}

/// Decode inbound telephony audio into 16-bit linear samples
///
/// `domain` names the encoding of `bytes`. Mulaw accepts any length; linear
/// payloads must hold whole 16-bit samples.
pub fn decode_inbound(bytes: &[u8], domain: AudioDomain) -> Result<Vec<i16>, CodecError> {
    let width = domain.sample_width();
    if bytes.len() % width != 0 {
        return Err(CodecError::MalformedLength {
            len: bytes.len(),
            width,
        });
    }

    Ok(match domain {
        AudioDomain::Wire => bytes.iter().map(|&b| DECODE_TABLE[b as usize]).collect(),
        AudioDomain::Linear => bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect(),
    })
}

/// Encode 8kHz mono linear samples as wire bytes
pub fn encode_wire(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| linear_to_mulaw(s)).collect()
}

/// Serialize linear samples as little-endian bytes
pub fn linear_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert a frame into `target`'s codec domain, keeping sequence and timestamp
pub fn convert_frame(frame: AudioFrame, target: AudioDomain) -> Result<AudioFrame, CodecError> {
    if frame.domain == target {
        return Ok(frame);
    }

    let samples = decode_inbound(&frame.payload, frame.domain)?;
    let payload = match target {
        AudioDomain::Wire => encode_wire(&samples),
        AudioDomain::Linear => linear_to_bytes(&samples),
    };

    Ok(AudioFrame {
        payload,
        domain: target,
        ..frame
    })
}

/// Split wire audio into `FRAME_BYTES` frames
///
/// The final frame keeps whatever remains and is never padded.
pub fn chunk_wire_audio(wire: &[u8]) -> Vec<Vec<u8>> {
    wire.chunks(FRAME_BYTES).map(<[u8]>::to_vec).collect()
}

use std::io::Cursor;
use std::process::Stdio;
use std::time::Duration;

use rubato::{FftFixedIn, Resampler};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::codec::{chunk_wire_audio, encode_wire, CodecError, WIRE_SAMPLE_RATE};

/// Container/encoding of a synthesized audio blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SourceFormat {
    /// MPEG layer III
    Mp3,
    /// RIFF/WAVE, any rate and channel count
    Wav,
    /// Other compressed containers symphonia can probe (OGG, FLAC, AAC)
    Compressed,
    /// Headerless 16-bit little-endian PCM
    Pcm16 { sample_rate: u32, channels: u16 },
    /// Already 8kHz mono mulaw
    Mulaw8k,
}

impl SourceFormat {
    fn extension(&self) -> Option<&'static str> {
        match self {
            SourceFormat::Mp3 => Some("mp3"),
            SourceFormat::Wav => Some("wav"),
            _ => None,
        }
    }
}

/// Converts synthesized audio into 8kHz mono mulaw
#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    async fn to_wire(&self, audio: &[u8], format: SourceFormat) -> Result<Vec<u8>, CodecError>;

    /// Transcoder name for logging
    fn name(&self) -> &str;
}

/// Convert synthesized audio to wire format and split it into paced frames
///
/// Any transcoder failure surfaces as an error; callers treat it as fatal to
/// the current outbound turn only.
pub async fn encode_outbound(
    transcoder: &dyn Transcoder,
    audio: &[u8],
    format: SourceFormat,
) -> Result<Vec<Vec<u8>>, CodecError> {
    let wire = transcoder.to_wire(audio, format).await?;
    debug!(
        "{} produced {} wire bytes from {} source bytes",
        transcoder.name(),
        wire.len(),
        audio.len()
    );
    Ok(chunk_wire_audio(&wire))
}

/// In-process transcoder: hound for WAV, symphonia for compressed formats,
/// rubato for rate conversion
#[derive(Debug, Default, Clone)]
pub struct NativeTranscoder;

impl NativeTranscoder {
    pub fn new() -> Self {
        Self
    }

    fn decode(audio: &[u8], format: SourceFormat) -> Result<PcmBuffer, CodecError> {
        match format {
            SourceFormat::Wav => decode_wav(audio),
            SourceFormat::Mp3 | SourceFormat::Compressed => decode_compressed(audio, format),
            SourceFormat::Pcm16 {
                sample_rate,
                channels,
            } => {
                if audio.len() % 2 != 0 {
                    return Err(CodecError::MalformedLength {
                        len: audio.len(),
                        width: 2,
                    });
                }
                Ok(PcmBuffer {
                    samples: audio
                        .chunks_exact(2)
                        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                        .collect(),
                    sample_rate,
                    channels,
                })
            }
            SourceFormat::Mulaw8k => Err(CodecError::UnsupportedFormat(
                "mulaw input needs no decoding".to_string(),
            )),
        }
    }
}

#[async_trait::async_trait]
impl Transcoder for NativeTranscoder {
    async fn to_wire(&self, audio: &[u8], format: SourceFormat) -> Result<Vec<u8>, CodecError> {
        if format == SourceFormat::Mulaw8k {
            return Ok(audio.to_vec());
        }

        let audio = audio.to_vec();
        tokio::task::spawn_blocking(move || {
            let pcm = Self::decode(&audio, format)?;
            let mono = downmix(&pcm.samples, pcm.channels);
            let resampled = resample(&mono, pcm.sample_rate, WIRE_SAMPLE_RATE)?;
            Ok(encode_wire(&resampled))
        })
        .await
        .map_err(|e| CodecError::Undecodable(format!("decoder task failed: {}", e)))?
    }

    fn name(&self) -> &str {
        "native"
    }
}

/// External transcoder shelling out to ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: String,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn input_args(format: SourceFormat) -> Vec<String> {
        match format {
            SourceFormat::Pcm16 {
                sample_rate,
                channels,
            } => vec![
                "-f".into(),
                "s16le".into(),
                "-ar".into(),
                sample_rate.to_string(),
                "-ac".into(),
                channels.to_string(),
            ],
            SourceFormat::Mulaw8k => vec!["-f".into(), "mulaw".into(), "-ar".into(), "8000".into()],
            _ => Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn to_wire(&self, audio: &[u8], format: SourceFormat) -> Result<Vec<u8>, CodecError> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(Self::input_args(format))
            .args(["-i", "pipe:0"])
            .args(["-ar", "8000", "-ac", "1", "-f", "mulaw", "-acodec", "pcm_mulaw", "pipe:1"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let mut stdin = child.stdin.take().ok_or_else(|| CodecError::Utility {
            tool: self.binary.clone(),
            message: "stdin unavailable".to_string(),
        })?;

        let input = audio.to_vec();
        let writer = tokio::spawn(async move {
            // ffmpeg may exit before reading everything; the exit status tells us why
            let _ = stdin.write_all(&input).await;
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CodecError::TimedOut {
                tool: self.binary.clone(),
                secs: self.timeout.as_secs(),
            })??;
        let _ = writer.await;

        if !output.status.success() {
            return Err(CodecError::Utility {
                tool: self.binary.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

struct PcmBuffer {
    samples: Vec<i16>,
    sample_rate: u32,
    channels: u16,
}

fn decode_wav(audio: &[u8]) -> Result<PcmBuffer, CodecError> {
    let reader = hound::WavReader::new(Cursor::new(audio))
        .map_err(|e| CodecError::Undecodable(e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .collect::<Result<_, _>>()
            .map_err(|e| CodecError::Undecodable(e.to_string()))?,
        (hound::SampleFormat::Int, bits) if bits <= 32 => reader
            .into_samples::<i32>()
            .map(|s| {
                s.map(|v| {
                    if bits >= 16 {
                        (v >> (bits - 16)) as i16
                    } else {
                        (v << (16 - bits)) as i16
                    }
                })
            })
            .collect::<Result<_, _>>()
            .map_err(|e| CodecError::Undecodable(e.to_string()))?,
        (hound::SampleFormat::Float, _) => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<_, _>>()
            .map_err(|e| CodecError::Undecodable(e.to_string()))?,
        (_, bits) => {
            return Err(CodecError::UnsupportedFormat(format!(
                "{}-bit WAV",
                bits
            )))
        }
    };

    Ok(PcmBuffer {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

fn decode_compressed(audio: &[u8], format: SourceFormat) -> Result<PcmBuffer, CodecError> {
    use symphonia::core::{
        audio::SampleBuffer,
        codecs::{DecoderOptions, CODEC_TYPE_NULL},
        errors::Error as SymphoniaError,
        formats::FormatOptions,
        io::MediaSourceStream,
        meta::MetadataOptions,
        probe::Hint,
    };

    let mss = MediaSourceStream::new(Box::new(Cursor::new(audio.to_vec())), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = format.extension() {
        hint.with_extension(ext);
    }

    let mut reader = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| CodecError::Undecodable(e.to_string()))?
        .format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| CodecError::Undecodable("no audio track".to_string()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| CodecError::UnsupportedFormat(e.to_string()))?;

    let mut samples = Vec::new();
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(1);

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(CodecError::Undecodable(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;

                let mut buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            // Corrupt frame; skip it
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(CodecError::Undecodable(e.to_string())),
        }
    }

    if sample_rate == 0 {
        return Err(CodecError::Undecodable("unknown sample rate".to_string()));
    }

    Ok(PcmBuffer {
        samples,
        sample_rate,
        channels,
    })
}

/// Average interleaved channels down to mono
fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Input block size for the FFT resampler
const RESAMPLE_CHUNK: usize = 1024;

/// Resample mono PCM with rubato's FFT resampler
///
/// The output is trimmed of the resampler's delay and cut to exactly
/// `len * to_rate / from_rate` samples.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Result<Vec<i16>, CodecError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let input: Vec<f32> = samples.iter().map(|&s| s as f32 / 32768.0).collect();
    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| CodecError::Resample(e.to_string()))?;

    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut chunks = input.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let wave: [&[f32]; 1] = [chunk];
        let block = resampler
            .process(&wave[..], None)
            .map_err(|e| CodecError::Resample(e.to_string()))?;
        out.extend_from_slice(&block[0]);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let wave: [&[f32]; 1] = [tail];
        let block = resampler
            .process_partial(Some(&wave[..]), None)
            .map_err(|e| CodecError::Resample(e.to_string()))?;
        out.extend_from_slice(&block[0]);
    }

    // Flush what is still inside the resampler's delay line
    while out.len() < delay + expected {
        let block = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| CodecError::Resample(e.to_string()))?;
        if block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    Ok(out
        .into_iter()
        .skip(delay)
        .take(expected)
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)
        .collect())
}

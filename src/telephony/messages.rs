use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mark sent after the last media frame of a spoken turn
pub const PLAYBACK_COMPLETE_MARK: &str = "audio_complete";

/// Provider → bridge message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundMessage {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        version: Option<String>,
    },
    Start {
        #[serde(rename = "sequenceNumber", default)]
        sequence_number: Option<String>,
        start: StreamStart,
    },
    Media {
        #[serde(rename = "sequenceNumber", default)]
        sequence_number: Option<String>,
        media: MediaPayload,
    },
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
    Mark {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
        mark: MarkLabel,
    },
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Parse one text frame from the media-stream socket
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Invalid media-stream message")
    }

    /// Provider sequence number, when present and numeric
    pub fn sequence(&self) -> Option<u64> {
        match self {
            InboundMessage::Start {
                sequence_number, ..
            }
            | InboundMessage::Media {
                sequence_number, ..
            } => sequence_number.as_deref().and_then(|s| s.parse().ok()),
            _ => None,
        }
    }
}

/// Stream and call identifiers announced by `start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Base64 wire audio carried by an inbound `media` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaPayload {
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub chunk: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    pub payload: String,
}

impl MediaPayload {
    /// Raw mulaw bytes
    pub fn decode(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.payload)
            .context("Media payload is not valid base64")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkLabel {
    pub name: String,
}

/// Bridge → provider message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundMessage {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkLabel,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundMessage {
    /// Wrap one wire frame for the given stream
    pub fn media(stream_sid: &str, frame: &[u8]) -> Self {
        OutboundMessage::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: base64::engine::general_purpose::STANDARD.encode(frame),
            },
        }
    }

    pub fn mark(stream_sid: &str, name: &str) -> Self {
        OutboundMessage::Mark {
            stream_sid: stream_sid.to_string(),
            mark: MarkLabel {
                name: name.to_string(),
            },
        }
    }

    /// Decoded audio of a media message; `None` for marks
    pub fn audio(&self) -> Option<Vec<u8>> {
        match self {
            OutboundMessage::Media { media, .. } => base64::engine::general_purpose::STANDARD
                .decode(&media.payload)
                .ok(),
            OutboundMessage::Mark { .. } => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to encode media-stream message")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start() -> Result<()> {
        let json = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "start": {
                "accountSid": "AC123",
                "streamSid": "MZ456",
                "callSid": "CA789",
                "tracks": ["inbound"],
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1},
                "customParameters": {}
            },
            "streamSid": "MZ456"
        }"#;

        match InboundMessage::parse(json)? {
            InboundMessage::Start { start, .. } => {
                assert_eq!(start.stream_sid, "MZ456");
                assert_eq!(start.call_sid, "CA789");
                let format = start.media_format.unwrap();
                assert_eq!(format.sample_rate, 8000);
                assert_eq!(format.channels, 1);
            }
            other => panic!("expected start, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_parse_media() -> Result<()> {
        let json = r#"{
            "event": "media",
            "sequenceNumber": "3",
            "media": {"track": "inbound", "chunk": "1", "timestamp": "5", "payload": "//8A"},
            "streamSid": "MZ456"
        }"#;

        let message = InboundMessage::parse(json)?;
        assert_eq!(message.sequence(), Some(3));
        match message {
            InboundMessage::Media { media, .. } => {
                assert_eq!(media.decode()?, vec![0xff, 0xff, 0x00]);
            }
            other => panic!("expected media, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_parse_control_messages() -> Result<()> {
        let connected = InboundMessage::parse(
            r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#,
        )?;
        assert!(matches!(connected, InboundMessage::Connected { .. }));

        let stop = InboundMessage::parse(
            r#"{"event":"stop","sequenceNumber":"5","streamSid":"MZ456","stop":{"callSid":"CA789"}}"#,
        )?;
        assert_eq!(
            stop,
            InboundMessage::Stop {
                stream_sid: Some("MZ456".to_string())
            }
        );

        let mark = InboundMessage::parse(
            r#"{"event":"mark","streamSid":"MZ456","mark":{"name":"audio_complete"}}"#,
        )?;
        assert!(matches!(mark, InboundMessage::Mark { mark, .. } if mark.name == PLAYBACK_COMPLETE_MARK));

        let dtmf = InboundMessage::parse(r#"{"event":"dtmf","dtmf":{"digit":"1"}}"#)?;
        assert_eq!(dtmf, InboundMessage::Unknown);
        Ok(())
    }

    #[test]
    fn test_invalid_payload_is_an_error() {
        let media = MediaPayload {
            track: None,
            chunk: None,
            timestamp: None,
            payload: "not base64!".to_string(),
        };
        assert!(media.decode().is_err());
    }

    #[test]
    fn test_outbound_media_envelope() -> Result<()> {
        let json = OutboundMessage::media("MZ456", &[0xff; 3]).to_json()?;
        assert_eq!(
            json,
            r#"{"event":"media","streamSid":"MZ456","media":{"payload":"////"}}"#
        );

        let mark = OutboundMessage::mark("MZ456", PLAYBACK_COMPLETE_MARK).to_json()?;
        assert_eq!(
            mark,
            r#"{"event":"mark","streamSid":"MZ456","mark":{"name":"audio_complete"}}"#
        );
        Ok(())
    }
}

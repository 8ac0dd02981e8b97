//! Telephony media-stream protocol
//!
//! JSON envelopes exchanged over the provider's media-stream WebSocket, and
//! the TwiML that points a call at that socket.

pub mod messages;
pub mod twiml;

pub use messages::{
    InboundMessage, MarkLabel, MediaFormat, MediaPayload, OutboundMedia, OutboundMessage,
    StreamStart, PLAYBACK_COMPLETE_MARK,
};
pub use twiml::{connect_stream_twiml, media_stream_url};

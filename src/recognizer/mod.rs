// Streaming speech recognition: connection handling and turn detection

pub mod accumulator;
pub mod bridge;
pub mod connection;
pub mod deepgram;
pub mod messages;

pub use accumulator::{TranscriptResult, TurnBuffer, TurnOutcome};
pub use bridge::{
    BridgeSettings, BridgeStats, DegradedReason, FeedOutcome, RecognitionBridge,
    RecognitionConnectionState,
};
pub use connection::{
    LivenessFlag, RecognizerConnector, RecognizerEvent, RecognizerLink, RecognizerOptions,
    RecognizerSink,
};
pub use deepgram::DeepgramConnector;

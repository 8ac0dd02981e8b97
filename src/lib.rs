pub mod agent;
pub mod audio;
pub mod config;
pub mod http;
pub mod nats;
pub mod recognizer;
pub mod scenario;
pub mod session;
pub mod telephony;
pub mod transcript;

pub use audio::{
    encode_outbound, AudioDomain, AudioFrame, CodecError, FfmpegTranscoder, NativeTranscoder,
    SourceFormat, Transcoder,
};
pub use config::Config;
pub use http::{create_router, AppState};
pub use nats::{NatsClient, TranscriptTurnMessage};
pub use recognizer::{
    DeepgramConnector, FeedOutcome, RecognitionBridge, RecognitionConnectionState,
    TranscriptResult, TurnOutcome,
};
pub use scenario::{Scenario, ScenarioCatalog, ScenarioResolver};
pub use session::{CallSession, SessionConfig, SessionHandle, SessionServices, SessionState, SessionStats};
pub use transcript::{Speaker, TranscriptEvent, TranscriptSink};

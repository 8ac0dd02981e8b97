#![allow(dead_code)]

use anyhow::{bail, Result};
use call_bridge::agent::{ResponseGenerator, SpeechSynthesizer, SynthesizedAudio};
use call_bridge::recognizer::{
    LivenessFlag, RecognizerConnector, RecognizerEvent, RecognizerLink, RecognizerOptions,
    RecognizerSink,
};
use call_bridge::session::{ConversationTurn, SessionServices};
use call_bridge::telephony::{InboundMessage, MediaPayload, OutboundMessage, StreamStart};
use call_bridge::transcript::MemoryTranscriptSink;
use call_bridge::{NativeTranscoder, Scenario, SourceFormat};
use base64::Engine;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// Recognizer
// ============================================================================

/// Test-side view of one connection opened by `ScriptedConnector`
#[derive(Clone)]
pub struct ConnectionProbe {
    pub events: mpsc::Sender<RecognizerEvent>,
    pub live: LivenessFlag,
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
    pub keepalives: Arc<AtomicUsize>,
    pub finished: Arc<AtomicBool>,
    pub fail_sends: Arc<AtomicBool>,
}

impl ConnectionProbe {
    pub async fn emit(&self, event: RecognizerEvent) {
        self.events.send(event).await.unwrap();
    }

    pub async fn partial(&self, text: &str) {
        self.emit(RecognizerEvent::Partial(text.to_string())).await;
    }

    pub async fn final_segment(&self, text: &str) {
        self.emit(RecognizerEvent::Final(text.to_string())).await;
    }

    pub async fn utterance_end(&self) {
        self.emit(RecognizerEvent::UtteranceEnd).await;
    }

    /// Simulate the recognizer closing the connection
    pub async fn close(&self) {
        self.live.clear();
        self.emit(RecognizerEvent::Closed {
            reason: Some("idle timeout".to_string()),
        })
        .await;
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

struct ScriptedSink {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    keepalives: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl RecognizerSink for ScriptedSink {
    async fn send_audio(&mut self, audio: &[u8]) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            bail!("broken pipe");
        }
        self.sent.lock().unwrap().push(audio.to_vec());
        Ok(())
    }

    async fn keep_alive(&mut self) -> Result<()> {
        self.keepalives.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Recognizer connector whose connections are driven by the test
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    connections: Arc<Mutex<Vec<ConnectionProbe>>>,
    fail_connects: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect attempts fail
    pub fn fail_next_connects(&self, n: usize) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn connection(&self, index: usize) -> ConnectionProbe {
        self.connections.lock().unwrap()[index].clone()
    }

    pub fn latest(&self) -> ConnectionProbe {
        self.connections.lock().unwrap().last().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RecognizerConnector for ScriptedConnector {
    async fn connect(&self, _options: &RecognizerOptions) -> Result<RecognizerLink> {
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            bail!("connection refused");
        }

        let (tx, rx) = mpsc::channel(64);
        let probe = ConnectionProbe {
            events: tx,
            live: LivenessFlag::live(),
            sent: Arc::new(Mutex::new(Vec::new())),
            keepalives: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicBool::new(false)),
            fail_sends: Arc::new(AtomicBool::new(false)),
        };
        let sink = ScriptedSink {
            sent: Arc::clone(&probe.sent),
            keepalives: Arc::clone(&probe.keepalives),
            finished: Arc::clone(&probe.finished),
            fail_sends: Arc::clone(&probe.fail_sends),
        };
        let live = probe.live.clone();
        self.connections.lock().unwrap().push(probe);

        Ok(RecognizerLink {
            sink: Box::new(sink),
            events: rx,
            live,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Responder / synthesizer
// ============================================================================

/// What the responder saw when it was called
#[derive(Debug, Clone)]
pub struct ResponderCall {
    pub history: Vec<ConversationTurn>,
    /// Transcript events already recorded for the session at call time
    pub events_recorded: usize,
}

pub struct MockResponder {
    replies: Mutex<Vec<String>>,
    transcripts: Arc<MemoryTranscriptSink>,
    session_id: Mutex<Option<String>>,
    pub calls: Mutex<Vec<ResponderCall>>,
    pub fail: AtomicBool,
}

impl MockResponder {
    /// Replies are handed out in order; the last one repeats
    pub fn new(replies: &[&str], transcripts: Arc<MemoryTranscriptSink>) -> Self {
        Self {
            replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
            transcripts,
            session_id: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn watch_session(&self, session_id: &str) {
        *self.session_id.lock().unwrap() = Some(session_id.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<ResponderCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ResponseGenerator for MockResponder {
    async fn respond(&self, _scenario: &Scenario, history: &[ConversationTurn]) -> Result<String> {
        let session_id = self.session_id.lock().unwrap().clone();
        let events_recorded = match session_id {
            Some(id) => self.transcripts.len(&id).await,
            None => 0,
        };
        self.calls.lock().unwrap().push(ResponderCall {
            history: history.to_vec(),
            events_recorded,
        });

        if self.fail.load(Ordering::SeqCst) {
            bail!("rate limited");
        }

        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.len() > 1 {
            replies.pop().unwrap()
        } else {
            replies.last().cloned().unwrap_or_default()
        };
        Ok(reply)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Synthesizes every line as a fixed block of wire audio
pub struct MockSynthesizer {
    pub audio: Vec<u8>,
    pub format: SourceFormat,
    pub lines: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    /// `len` bytes of mulaw silence
    pub fn wire(len: usize) -> Self {
        Self {
            audio: vec![0xff; len],
            format: SourceFormat::Mulaw8k,
            lines: Mutex::new(Vec::new()),
        }
    }

    /// Bytes claiming to be MP3 that no decoder accepts
    pub fn undecodable() -> Self {
        Self {
            audio: b"definitely not an mp3 stream".to_vec(),
            format: SourceFormat::Mp3,
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str, _voice: Option<&str>) -> Result<SynthesizedAudio> {
        self.lines.lock().unwrap().push(text.to_string());
        Ok(SynthesizedAudio {
            bytes: self.audio.clone(),
            format: self.format,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub struct Harness {
    pub connector: ScriptedConnector,
    pub responder: Arc<MockResponder>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub transcripts: Arc<MemoryTranscriptSink>,
    pub services: SessionServices,
}

impl Harness {
    pub fn new(replies: &[&str], synthesizer: MockSynthesizer) -> Self {
        let connector = ScriptedConnector::new();
        let transcripts = Arc::new(MemoryTranscriptSink::new());
        let responder = Arc::new(MockResponder::new(replies, Arc::clone(&transcripts)));
        let synthesizer = Arc::new(synthesizer);
        let services = SessionServices {
            connector: Arc::new(connector.clone()),
            responder: responder.clone(),
            synthesizer: synthesizer.clone(),
            transcoder: Arc::new(NativeTranscoder::new()),
            transcripts: transcripts.clone(),
        };
        Self {
            connector,
            responder,
            synthesizer,
            transcripts,
            services,
        }
    }
}

pub fn scenario() -> Scenario {
    Scenario::new(
        "rescheduling",
        "rescheduling",
        "You are calling to move your Thursday appointment.",
    )
}

pub fn start_message(stream_sid: &str) -> InboundMessage {
    InboundMessage::Start {
        sequence_number: Some("1".to_string()),
        start: StreamStart {
            stream_sid: stream_sid.to_string(),
            call_sid: "CA-test".to_string(),
            account_sid: None,
            tracks: vec!["inbound".to_string()],
            media_format: None,
            custom_parameters: HashMap::new(),
        },
    }
}

pub fn media_message(sequence: u64, audio: &[u8]) -> InboundMessage {
    InboundMessage::Media {
        sequence_number: Some(sequence.to_string()),
        media: MediaPayload {
            track: Some("inbound".to_string()),
            chunk: Some(sequence.to_string()),
            timestamp: None,
            payload: base64::engine::general_purpose::STANDARD.encode(audio),
        },
    }
}

/// Poll `condition` until it holds, yielding to other tasks in between
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met in time");
}

/// Drain everything currently queued on the outbound channel
pub fn drain_outbound(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

use super::config::SessionConfig;
use super::history::{ConversationHistory, ConversationTurn};
use super::playback::{Playback, PlaybackError};
use super::state::SessionState;
use super::stats::{SessionMonitor, SessionStats};
use crate::agent::{is_farewell, ResponseGenerator, SpeechSynthesizer, SynthesizedAudio};
use crate::audio::{AudioDomain, Direction, FrameSequencer, Transcoder};
use crate::recognizer::{RecognitionBridge, RecognizerConnector, TranscriptResult};
use crate::telephony::{InboundMessage, OutboundMessage};
use crate::transcript::{Speaker, TranscriptEvent, TranscriptSink};
use anyhow::{bail, Context, Result};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// External collaborators a session talks to
#[derive(Clone)]
pub struct SessionServices {
    pub connector: Arc<dyn RecognizerConnector>,
    pub responder: Arc<dyn ResponseGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub transcoder: Arc<dyn Transcoder>,
    pub transcripts: Arc<dyn TranscriptSink>,
}

/// Observe or stop a running session from outside its task
#[derive(Clone)]
pub struct SessionHandle {
    monitor: Arc<SessionMonitor>,
    stop: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &str {
        self.monitor.session_id()
    }

    pub fn state(&self) -> SessionState {
        self.monitor.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.monitor.snapshot()
    }

    pub fn closed_for(&self) -> Option<Duration> {
        self.monitor.closed_for()
    }

    /// Ask the session to close; returns immediately
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// Synthesized line waiting to be played
struct Reply {
    text: String,
    audio: SynthesizedAudio,
    /// Scenario opening line rather than a generated response
    opening: bool,
}

enum Flow {
    Continue,
    Close,
}

/// One phone call: inbound audio to the recognizer, turns to the responder,
/// synthesized replies back to the caller
///
/// Everything runs on a single control loop. Response generation and
/// playback are spawned tasks whose results come back to that loop, so the
/// session state is only ever touched in one place.
pub struct CallSession {
    /// Session configuration (scenario, recognizer options, timing)
    config: SessionConfig,

    /// Recognizer, responder, synthesizer, transcoder and transcript sinks
    services: SessionServices,

    /// Counters and state shared with `SessionHandle`
    monitor: Arc<SessionMonitor>,

    /// Recognizer connection and turn detection
    bridge: RecognitionBridge,

    /// Turns spoken so far by both parties
    history: ConversationHistory,

    state: SessionState,

    /// Provider stream id from `start`; outbound media is tagged with it
    stream_sid: Option<String>,

    /// Sequence numbers for inbound frames
    inbound_frames: FrameSequencer,

    /// Opening line already requested
    greeted: bool,

    /// Response generation + synthesis in flight
    reply_task: Option<JoinHandle<Result<Reply>>>,

    /// Outbound pacing loop in flight
    playback_task: Option<JoinHandle<Result<usize, PlaybackError>>>,

    /// The line being played is a farewell
    farewell_pending: bool,

    /// When to hang up after a farewell
    hangup_at: Option<Instant>,

    /// Flipped to true by `SessionHandle::stop`
    stop_rx: watch::Receiver<bool>,
}

impl CallSession {
    /// Create a session and the handle used to observe and stop it
    pub fn new(config: SessionConfig, services: SessionServices) -> (Self, SessionHandle) {
        info!(
            "Creating call session: {} (scenario={})",
            config.session_id, config.scenario.id
        );

        let monitor = Arc::new(SessionMonitor::new(
            config.session_id.clone(),
            config.scenario.id.clone(),
        ));
        let (stop_tx, stop_rx) = watch::channel(false);
        let bridge = RecognitionBridge::new(
            config.session_id.clone(),
            Arc::clone(&services.connector),
            config.recognizer.clone(),
            config.bridge.clone(),
        );

        let handle = SessionHandle {
            monitor: Arc::clone(&monitor),
            stop: Arc::new(stop_tx),
        };

        let session = Self {
            config,
            services,
            monitor,
            bridge,
            history: ConversationHistory::new(),
            state: SessionState::Idle,
            stream_sid: None,
            inbound_frames: FrameSequencer::new(Direction::Inbound),
            greeted: false,
            reply_task: None,
            playback_task: None,
            farewell_pending: false,
            hangup_at: None,
            stop_rx,
        };

        (session, handle)
    }

    pub fn session_id(&self) -> &str {
        &self.config.session_id
    }

    pub fn history(&self) -> &[ConversationTurn] {
        self.history.turns()
    }

    /// Drive the call until the stream ends, a stop is requested, or the
    /// participant hangs up after a farewell
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        outbound: mpsc::Sender<OutboundMessage>,
    ) -> Result<SessionStats> {
        let session_id = self.config.session_id.clone();

        self.transition(SessionState::Listening);
        if let Err(e) = self.bridge.open().await {
            warn!("[{}] {:#}; retrying on first frame", session_id, e);
        }
        self.sync_bridge_stats();

        // A zero period turns keep-alive off
        let period = self.config.keepalive_interval;
        let mut keepalive = (!period.is_zero()).then(|| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut stop_open = true;

        loop {
            let listening = self.state == SessionState::Listening && self.hangup_at.is_none();
            let hangup_at = self.hangup_at;

            let flow = tokio::select! {
                changed = self.stop_rx.changed(), if stop_open => match changed {
                    Ok(()) if *self.stop_rx.borrow() => {
                        info!("[{}] Stop requested", session_id);
                        Flow::Close
                    }
                    Ok(()) => Flow::Continue,
                    Err(_) => {
                        stop_open = false;
                        Flow::Continue
                    }
                },
                message = inbound.recv() => match message {
                    Some(message) => self.on_inbound(message).await,
                    None => {
                        info!("[{}] Media stream closed", session_id);
                        Flow::Close
                    }
                },
                joined = join_task(&mut self.reply_task) => {
                    self.reply_task = None;
                    self.on_reply(joined, &outbound).await
                }
                joined = join_task(&mut self.playback_task) => {
                    self.playback_task = None;
                    self.on_playback_done(joined)
                }
                result = self.bridge.await_turn_end(), if listening => {
                    self.on_turn_end(result).await
                }
                _ = tick_opt(&mut keepalive) => {
                    self.bridge.keep_alive().await;
                    Flow::Continue
                }
                _ = sleep_until_opt(hangup_at), if hangup_at.is_some() => {
                    info!("[{}] Hanging up", session_id);
                    Flow::Close
                }
            };

            if let Flow::Close = flow {
                break;
            }
        }

        self.close().await;
        Ok(self.monitor.snapshot())
    }

    async fn on_inbound(&mut self, message: InboundMessage) -> Flow {
        match message {
            InboundMessage::Connected { protocol, .. } => {
                debug!(
                    "[{}] Media stream connected (protocol={})",
                    self.config.session_id,
                    protocol.as_deref().unwrap_or("unknown")
                );
            }
            InboundMessage::Start { start, .. } => {
                info!(
                    "[{}] Stream started (stream={}, call={})",
                    self.config.session_id, start.stream_sid, start.call_sid
                );
                self.monitor.set_call_sid(&start.call_sid);
                self.stream_sid = Some(start.stream_sid);
                self.speak_opening_line();
            }
            InboundMessage::Media { media, .. } => match media.decode() {
                Ok(bytes) => {
                    let frame = self.inbound_frames.stamp(AudioDomain::Wire, bytes);
                    let outcome = self.bridge.feed(frame).await;
                    self.monitor.record_feed(outcome);
                    self.sync_bridge_stats();
                }
                Err(e) => {
                    warn!("[{}] Dropping media frame: {:#}", self.config.session_id, e);
                    self.monitor.record_dropped_frame();
                }
            },
            InboundMessage::Stop { .. } => {
                info!("[{}] Stream stopped by provider", self.config.session_id);
                return Flow::Close;
            }
            InboundMessage::Mark { mark, .. } => {
                debug!("[{}] Provider reached mark {}", self.config.session_id, mark.name);
            }
            InboundMessage::Unknown => {
                debug!("[{}] Ignoring unknown media-stream event", self.config.session_id);
            }
        }
        Flow::Continue
    }

    fn speak_opening_line(&mut self) {
        if self.greeted || self.state != SessionState::Listening {
            return;
        }
        let Some(line) = self.config.scenario.opening_line().map(str::to_string) else {
            return;
        };
        self.greeted = true;

        info!("[{}] Speaking opening line", self.config.session_id);
        self.transition(SessionState::AwaitingResponse);

        let synthesizer = Arc::clone(&self.services.synthesizer);
        let voice = self.config.scenario.voice.clone();
        self.reply_task = Some(tokio::spawn(async move {
            let audio = synthesizer
                .synthesize(&line, voice.as_deref())
                .await
                .context("Synthesis of opening line failed")?;
            Ok(Reply {
                text: line,
                audio,
                opening: true,
            })
        }));
    }

    async fn on_turn_end(&mut self, result: TranscriptResult) -> Flow {
        self.sync_bridge_stats();

        if result.is_empty() {
            debug!("[{}] Turn ended without speech; still listening", self.config.session_id);
            return Flow::Continue;
        }

        self.monitor.record_turn(result.outcome);
        let text = result.text.trim().to_string();
        info!("[{}] Counterpart: {}", self.config.session_id, text);
        self.append_turn(Speaker::Counterpart, &text).await;

        self.transition(SessionState::AwaitingResponse);

        let responder = Arc::clone(&self.services.responder);
        let synthesizer = Arc::clone(&self.services.synthesizer);
        let scenario = self.config.scenario.clone();
        let history = self.history.turns().to_vec();
        self.reply_task = Some(tokio::spawn(async move {
            let text = responder
                .respond(&scenario, &history)
                .await
                .context("Response generation failed")?;
            let text = text.trim().to_string();
            if text.is_empty() {
                bail!("Response generator returned no text");
            }
            let audio = synthesizer
                .synthesize(&text, scenario.voice.as_deref())
                .await
                .context("Synthesis failed")?;
            Ok(Reply {
                text,
                audio,
                opening: false,
            })
        }));

        Flow::Continue
    }

    async fn on_reply(
        &mut self,
        joined: Result<Result<Reply>, JoinError>,
        outbound: &mpsc::Sender<OutboundMessage>,
    ) -> Flow {
        let reply = match joined {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!("[{}] {:#}; back to listening", self.config.session_id, e);
                self.transition(SessionState::Listening);
                return Flow::Continue;
            }
            Err(e) => {
                error!("[{}] Response task failed: {}", self.config.session_id, e);
                self.transition(SessionState::Listening);
                return Flow::Continue;
            }
        };

        info!("[{}] Participant: {}", self.config.session_id, reply.text);
        self.append_turn(Speaker::Participant, &reply.text).await;
        self.monitor.record_response();
        self.farewell_pending = !reply.opening && is_farewell(&reply.text);

        let Some(stream_sid) = self.stream_sid.clone() else {
            warn!(
                "[{}] Stream has not started; skipping playback",
                self.config.session_id
            );
            self.transition(SessionState::Listening);
            self.schedule_hangup();
            return Flow::Continue;
        };

        self.transition(SessionState::Speaking);
        let playback = Playback {
            session_id: self.config.session_id.clone(),
            stream_sid,
            audio: reply.audio,
            transcoder: Arc::clone(&self.services.transcoder),
            outbound: outbound.clone(),
            monitor: Arc::clone(&self.monitor),
            pace: self.config.frame_pace,
        };
        self.playback_task = Some(tokio::spawn(playback.run()));

        Flow::Continue
    }

    fn on_playback_done(&mut self, joined: Result<Result<usize, PlaybackError>, JoinError>) -> Flow {
        match joined {
            Ok(Ok(frames)) => {
                debug!("[{}] Playback complete ({} frames)", self.config.session_id, frames);
            }
            Ok(Err(PlaybackError::TransportClosed)) => {
                info!("[{}] Media stream closed during playback", self.config.session_id);
                return Flow::Close;
            }
            Ok(Err(e)) => {
                warn!("[{}] Playback aborted: {}", self.config.session_id, e);
                self.monitor.record_playback_aborted();
            }
            Err(e) => {
                error!("[{}] Playback task failed: {}", self.config.session_id, e);
            }
        }

        self.transition(SessionState::Listening);
        self.schedule_hangup();
        Flow::Continue
    }

    fn schedule_hangup(&mut self) {
        if std::mem::take(&mut self.farewell_pending) {
            let grace = self.config.hangup_grace;
            info!(
                "[{}] Farewell spoken; hanging up in {}ms",
                self.config.session_id,
                grace.as_millis()
            );
            self.hangup_at = Some(Instant::now() + grace);
        }
    }

    async fn append_turn(&mut self, speaker: Speaker, text: &str) {
        self.history.append(speaker, text);
        let event = TranscriptEvent::new(speaker, text);
        if let Err(e) = self
            .services
            .transcripts
            .record(&self.config.session_id, &event)
            .await
        {
            warn!(
                "[{}] Failed to record transcript event: {:#}",
                self.config.session_id, e
            );
        }
    }

    async fn close(&mut self) {
        self.transition(SessionState::Closing);

        if let Some(task) = self.reply_task.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(task) = self.playback_task.take() {
            task.abort();
            let _ = task.await;
        }

        self.bridge.close().await;
        self.sync_bridge_stats();
        self.transition(SessionState::Closed);

        info!(
            "[{}] Call session closed ({} turns in history)",
            self.config.session_id,
            self.history.len()
        );
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        debug!("[{}] {} -> {}", self.config.session_id, self.state, next);
        self.state = next;
        self.monitor.set_state(next);
    }

    fn sync_bridge_stats(&self) {
        self.monitor.record_bridge(&self.bridge.stats());
    }
}

/// Await a task slot; pending forever while the slot is empty
async fn join_task<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => pending().await,
    }
}

async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

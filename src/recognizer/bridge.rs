use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::accumulator::{TranscriptResult, TurnBuffer, TurnOutcome};
use super::connection::{RecognizerConnector, RecognizerEvent, RecognizerLink, RecognizerOptions};
use crate::audio::{convert_frame, AudioFrame};

/// Lifecycle of the session's recognizer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecognitionConnectionState {
    Disconnected,
    Connecting,
    Listening,
    Draining,
}

/// Why a frame did not reach the recognizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedReason {
    /// The send itself failed; the connection is now flagged dead
    SendFailed,
    /// No connection could be established
    ConnectFailed,
    /// A recent connect attempt failed and the retry window has not passed
    Backoff,
    /// The frame could not be converted to the recognizer's encoding
    Malformed,
    /// The bridge has been closed
    Closed,
}

/// Result of forwarding one frame
///
/// Degraded outcomes never interrupt the call; they are reported so callers
/// and tests can see that audio was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Forwarded,
    Degraded(DegradedReason),
}

impl FeedOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, FeedOutcome::Degraded(_))
    }
}

/// Timing knobs for the bridge
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// How long to wait for a turn boundary before settling with partial text
    pub turn_timeout: Duration,
    /// Minimum gap between failed connect attempts
    pub reconnect_backoff: Duration,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            turn_timeout: Duration::from_secs(20),
            reconnect_backoff: Duration::from_secs(1),
        }
    }
}

/// Counters exposed through session stats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeStats {
    pub frames_forwarded: u64,
    pub degraded_sends: u64,
    pub connections_opened: u32,
    pub reconnects: u32,
    pub clean_turns: u32,
    pub degraded_turns: u32,
}

enum Waited {
    Event(Option<RecognizerEvent>),
    Elapsed,
}

/// One session's streaming recognizer connection and turn detection
///
/// Recognizer events are delivered as messages and folded into the current
/// `TurnBuffer` whenever the bridge is fed or awaited, so all state changes
/// happen on the owning session's task.
pub struct RecognitionBridge {
    /// Session identifier, used as the log prefix
    session_id: String,

    /// Opens recognizer connections
    connector: Arc<dyn RecognizerConnector>,

    /// Stream settings sent on every connect
    options: RecognizerOptions,

    settings: BridgeSettings,

    /// Current lifecycle state
    state: RecognitionConnectionState,

    /// Live (or stale, until torn down) connection
    link: Option<RecognizerLink>,

    /// False once the current link's event channel has ended
    events_open: bool,

    /// Connection loss already logged at warn level
    loss_logged: bool,

    /// Fragments of the open turn, all from the current connection
    buffer: TurnBuffer,

    /// Turns settled outside a wait, handed out before the open turn
    settled: VecDeque<TranscriptResult>,

    /// End-of-utterance seen but not yet settled
    boundary_pending: bool,

    /// Timeout for the open wait cycle, armed on its first poll
    turn_deadline: Option<Instant>,

    /// No connect attempts before this instant
    retry_after: Option<Instant>,

    /// Set by `close`; nothing is accepted afterwards
    closed: bool,

    stats: BridgeStats,
}

impl RecognitionBridge {
    pub fn new(
        session_id: impl Into<String>,
        connector: Arc<dyn RecognizerConnector>,
        options: RecognizerOptions,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            connector,
            options,
            settings,
            state: RecognitionConnectionState::Disconnected,
            link: None,
            events_open: false,
            loss_logged: false,
            buffer: TurnBuffer::new(),
            settled: VecDeque::new(),
            boundary_pending: false,
            turn_deadline: None,
            retry_after: None,
            closed: false,
            stats: BridgeStats::default(),
        }
    }

    pub fn state(&self) -> RecognitionConnectionState {
        self.state
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Whether the current connection is believed usable
    pub fn is_live(&self) -> bool {
        self.link.as_ref().is_some_and(|link| link.live.is_live())
    }

    /// Open the first connection
    pub async fn open(&mut self) -> Result<()> {
        info!(
            "[{}] Opening recognizer via {}",
            self.session_id,
            self.connector.name()
        );
        self.ensure_connected().await
    }

    /// Reconnect if the liveness flag says the current connection is gone
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.closed {
            bail!("recognition bridge is closed");
        }

        self.drain_events();
        if self.is_live() {
            return Ok(());
        }

        if let Some(retry_after) = self.retry_after {
            if Instant::now() < retry_after {
                bail!("recognizer reconnect backoff active");
            }
        }

        if let Some(mut stale) = self.link.take() {
            // Whatever the old connection heard closes its own turn; the new
            // connection starts a fresh one
            while let Ok(event) = stale.events.try_recv() {
                self.fold_event(event);
            }
            if self.boundary_pending || !self.buffer.is_empty() {
                let outcome = if self.boundary_pending {
                    TurnOutcome::Clean
                } else {
                    TurnOutcome::Degraded
                };
                let result = self.settle(outcome);
                if result.is_degraded() {
                    warn!(
                        "[{}] Recognizer lost mid-turn; settling with text heard before the loss",
                        self.session_id
                    );
                }
                self.settled.push_back(result);
            }
            if let Err(e) = stale.sink.finish().await {
                debug!("[{}] Stale connection finish failed: {}", self.session_id, e);
            }
            self.stats.reconnects += 1;
            info!("[{}] Reconnecting to recognizer", self.session_id);
        }

        self.state = RecognitionConnectionState::Connecting;
        self.events_open = false;

        match self.connector.connect(&self.options).await {
            Ok(link) => {
                self.link = Some(link);
                self.events_open = true;
                self.loss_logged = false;
                self.retry_after = None;
                self.stats.connections_opened += 1;
                self.state = RecognitionConnectionState::Listening;
                debug!("[{}] Recognizer connected", self.session_id);
                Ok(())
            }
            Err(e) => {
                self.state = RecognitionConnectionState::Disconnected;
                self.retry_after = Some(Instant::now() + self.settings.reconnect_backoff);
                Err(e.context("Failed to connect to recognizer"))
            }
        }
    }

    /// Forward one inbound frame
    ///
    /// Send failures are not raised: the liveness flag is cleared so the next
    /// frame reconnects, and the outcome reports the loss.
    pub async fn feed(&mut self, frame: AudioFrame) -> FeedOutcome {
        if self.closed {
            return FeedOutcome::Degraded(DegradedReason::Closed);
        }

        let frame = match convert_frame(frame, self.options.encoding) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[{}] Dropping inbound frame: {}", self.session_id, e);
                return FeedOutcome::Degraded(DegradedReason::Malformed);
            }
        };

        self.drain_events();
        if !self.is_live() {
            if self
                .retry_after
                .is_some_and(|retry_after| Instant::now() < retry_after)
            {
                return FeedOutcome::Degraded(DegradedReason::Backoff);
            }
            if let Err(e) = self.ensure_connected().await {
                warn!("[{}] {:#}", self.session_id, e);
                return FeedOutcome::Degraded(DegradedReason::ConnectFailed);
            }
        }

        if self.state == RecognitionConnectionState::Draining {
            self.state = RecognitionConnectionState::Listening;
        }

        let Some(link) = self.link.as_mut() else {
            return FeedOutcome::Degraded(DegradedReason::ConnectFailed);
        };

        match link.sink.send_audio(&frame.payload).await {
            Ok(()) => {
                self.stats.frames_forwarded += 1;
                FeedOutcome::Forwarded
            }
            Err(e) => {
                self.stats.degraded_sends += 1;
                self.mark_lost(&format!("send failed: {}", e));
                FeedOutcome::Degraded(DegradedReason::SendFailed)
            }
        }
    }

    /// Wait for the current turn to end
    ///
    /// Resolves on the recognizer's end-of-utterance event with the settled
    /// text, or once the turn timeout passes with whatever text had
    /// accumulated, marked degraded. The deadline is armed on the first poll
    /// of a turn and survives cancellation, so this can sit in a `select!`.
    ///
    /// A turn cut short by a reconnect was already settled with the text
    /// heard before the loss; it is returned first.
    pub async fn await_turn_end(&mut self) -> TranscriptResult {
        if let Some(result) = self.settled.pop_front() {
            return result;
        }

        let timeout = self.settings.turn_timeout;
        let deadline = *self
            .turn_deadline
            .get_or_insert_with(|| Instant::now() + timeout);

        loop {
            self.drain_events();
            if self.boundary_pending {
                return self.settle(TurnOutcome::Clean);
            }

            let waited = match self.link.as_mut() {
                Some(link) if self.events_open => tokio::select! {
                    event = link.events.recv() => Waited::Event(event),
                    _ = tokio::time::sleep_until(deadline) => Waited::Elapsed,
                },
                _ => {
                    tokio::time::sleep_until(deadline).await;
                    Waited::Elapsed
                }
            };

            match waited {
                Waited::Event(Some(event)) => self.fold_event(event),
                Waited::Event(None) => self.on_events_closed(),
                Waited::Elapsed => {
                    let result = self.settle(TurnOutcome::Degraded);
                    let secs = timeout.as_secs();
                    if result.is_empty() {
                        warn!(
                            "[{}] No turn boundary within {}s; no speech detected",
                            self.session_id, secs
                        );
                    } else {
                        warn!(
                            "[{}] No turn boundary within {}s; using partial transcript",
                            self.session_id, secs
                        );
                    }
                    return result;
                }
            }
        }
    }

    /// Ping an idle connection
    pub async fn keep_alive(&mut self) {
        if self.closed || !self.is_live() {
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if let Err(e) = link.sink.keep_alive().await {
            self.mark_lost(&format!("keep-alive failed: {}", e));
        }
    }

    /// Close the connection; the bridge accepts nothing afterwards
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.turn_deadline = None;
        self.state = RecognitionConnectionState::Disconnected;

        if let Some(mut link) = self.link.take() {
            link.live.clear();
            if let Err(e) = link.sink.finish().await {
                debug!("[{}] Recognizer finish failed: {}", self.session_id, e);
            }
        }
        info!("[{}] Recognizer connection closed", self.session_id);
    }

    fn drain_events(&mut self) {
        loop {
            let next = match self.link.as_mut() {
                Some(link) if self.events_open => link.events.try_recv(),
                _ => return,
            };
            match next {
                Ok(event) => self.fold_event(event),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.on_events_closed();
                    return;
                }
            }
        }
    }

    fn fold_event(&mut self, event: RecognizerEvent) {
        match event {
            RecognizerEvent::Partial(text) => self.buffer.set_partial(&text),
            RecognizerEvent::Final(text) => {
                debug!("[{}] Final segment: {}", self.session_id, text);
                self.buffer.push_final(&text);
            }
            RecognizerEvent::UtteranceEnd => self.boundary_pending = true,
            RecognizerEvent::Closed { reason } => {
                self.mark_lost(reason.as_deref().unwrap_or("closed by recognizer"))
            }
            RecognizerEvent::Error(message) => self.mark_lost(&message),
        }
    }

    fn on_events_closed(&mut self) {
        self.events_open = false;
        self.mark_lost("event stream ended");
    }

    fn mark_lost(&mut self, reason: &str) {
        if let Some(link) = &self.link {
            link.live.clear();
        }
        if self.loss_logged {
            debug!("[{}] Recognizer still down: {}", self.session_id, reason);
        } else {
            self.loss_logged = true;
            warn!(
                "[{}] Recognizer connection lost ({}); will reconnect on next frame",
                self.session_id, reason
            );
        }
    }

    fn settle(&mut self, outcome: TurnOutcome) -> TranscriptResult {
        let result = self.buffer.settle(outcome);
        self.boundary_pending = false;
        self.turn_deadline = None;
        if self.state == RecognitionConnectionState::Listening {
            self.state = RecognitionConnectionState::Draining;
        }

        match outcome {
            TurnOutcome::Clean => self.stats.clean_turns += 1,
            TurnOutcome::Degraded => self.stats.degraded_turns += 1,
        }

        result
    }
}

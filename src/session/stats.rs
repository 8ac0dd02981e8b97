use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::Instant;

use super::state::SessionState;
use crate::recognizer::{BridgeStats, FeedOutcome, TurnOutcome};

/// Statistics about a call session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub scenario_id: String,

    /// Provider call identifier, once the stream has started
    pub call_sid: Option<String>,

    pub state: SessionState,

    /// When the session was created
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Inbound media frames received from the provider
    pub frames_received: u64,

    /// Inbound frames that reached the recognizer
    pub frames_forwarded: u64,

    /// Inbound frames lost to a dead or unavailable recognizer
    pub frames_degraded: u64,

    /// Outbound media frames sent to the provider
    pub frames_sent: u64,

    /// Non-empty counterpart turns
    pub turns_completed: u32,

    /// Turns settled by the timeout rather than a boundary event
    pub degraded_turns: u32,

    /// Participant lines spoken (opening line included)
    pub responses: u32,

    /// Outbound turns abandoned because of a codec failure
    pub playback_aborted: u32,

    pub recognizer_connections: u32,

    pub recognizer_reconnects: u32,
}

/// Live counters for one session, shared with the HTTP API
pub struct SessionMonitor {
    session_id: String,
    scenario_id: String,
    started_at: DateTime<Utc>,
    call_sid: OnceLock<String>,
    closed_at: OnceLock<Instant>,
    state: AtomicU8,
    frames_received: AtomicU64,
    frames_forwarded: AtomicU64,
    frames_degraded: AtomicU64,
    frames_sent: AtomicU64,
    turns_completed: AtomicU32,
    degraded_turns: AtomicU32,
    responses: AtomicU32,
    playback_aborted: AtomicU32,
    recognizer_connections: AtomicU32,
    recognizer_reconnects: AtomicU32,
}

impl SessionMonitor {
    pub fn new(session_id: impl Into<String>, scenario_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            scenario_id: scenario_id.into(),
            started_at: Utc::now(),
            call_sid: OnceLock::new(),
            closed_at: OnceLock::new(),
            state: AtomicU8::new(SessionState::Idle.as_u8()),
            frames_received: AtomicU64::new(0),
            frames_forwarded: AtomicU64::new(0),
            frames_degraded: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            turns_completed: AtomicU32::new(0),
            degraded_turns: AtomicU32::new(0),
            responses: AtomicU32::new(0),
            playback_aborted: AtomicU32::new(0),
            recognizer_connections: AtomicU32::new(0),
            recognizer_reconnects: AtomicU32::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
        if state == SessionState::Closed {
            let _ = self.closed_at.set(Instant::now());
        }
    }

    /// Time since the session closed; `None` while it is still running
    pub fn closed_for(&self) -> Option<Duration> {
        self.closed_at.get().map(Instant::elapsed)
    }

    pub(crate) fn set_call_sid(&self, call_sid: &str) {
        let _ = self.call_sid.set(call_sid.to_string());
    }

    pub(crate) fn record_feed(&self, outcome: FeedOutcome) {
        self.frames_received.fetch_add(1, Ordering::SeqCst);
        match outcome {
            FeedOutcome::Forwarded => self.frames_forwarded.fetch_add(1, Ordering::SeqCst),
            FeedOutcome::Degraded(_) => self.frames_degraded.fetch_add(1, Ordering::SeqCst),
        };
    }

    /// Inbound media that never reached the bridge (bad payload)
    pub(crate) fn record_dropped_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::SeqCst);
        self.frames_degraded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_turn(&self, outcome: TurnOutcome) {
        self.turns_completed.fetch_add(1, Ordering::SeqCst);
        if outcome == TurnOutcome::Degraded {
            self.degraded_turns.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn record_response(&self) {
        self.responses.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_playback_aborted(&self) {
        self.playback_aborted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_bridge(&self, stats: &BridgeStats) {
        self.recognizer_connections
            .store(stats.connections_opened, Ordering::SeqCst);
        self.recognizer_reconnects
            .store(stats.reconnects, Ordering::SeqCst);
    }

    /// Get current session statistics
    pub fn snapshot(&self) -> SessionStats {
        let duration = Utc::now().signed_duration_since(self.started_at);

        SessionStats {
            session_id: self.session_id.clone(),
            scenario_id: self.scenario_id.clone(),
            call_sid: self.call_sid.get().cloned(),
            state: self.state(),
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_received: self.frames_received.load(Ordering::SeqCst),
            frames_forwarded: self.frames_forwarded.load(Ordering::SeqCst),
            frames_degraded: self.frames_degraded.load(Ordering::SeqCst),
            frames_sent: self.frames_sent.load(Ordering::SeqCst),
            turns_completed: self.turns_completed.load(Ordering::SeqCst),
            degraded_turns: self.degraded_turns.load(Ordering::SeqCst),
            responses: self.responses.load(Ordering::SeqCst),
            playback_aborted: self.playback_aborted.load(Ordering::SeqCst),
            recognizer_connections: self.recognizer_connections.load(Ordering::SeqCst),
            recognizer_reconnects: self.recognizer_reconnects.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::DegradedReason;

    #[test]
    fn test_feed_counters() {
        let monitor = SessionMonitor::new("call-1", "refill");
        monitor.record_feed(FeedOutcome::Forwarded);
        monitor.record_feed(FeedOutcome::Forwarded);
        monitor.record_feed(FeedOutcome::Degraded(DegradedReason::SendFailed));
        monitor.record_dropped_frame();

        let stats = monitor.snapshot();
        assert_eq!(stats.frames_received, 4);
        assert_eq!(stats.frames_forwarded, 2);
        assert_eq!(stats.frames_degraded, 2);
        assert_eq!(stats.state, SessionState::Idle);
    }

    #[test]
    fn test_call_sid_is_set_once() {
        let monitor = SessionMonitor::new("call-1", "refill");
        monitor.set_call_sid("CA1");
        monitor.set_call_sid("CA2");
        assert_eq!(monitor.snapshot().call_sid.as_deref(), Some("CA1"));
    }
}

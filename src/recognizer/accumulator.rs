use serde::{Deserialize, Serialize};

/// How a turn was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The recognizer signalled end of utterance
    Clean,
    /// The local timeout fired first; text is whatever had accumulated
    Degraded,
}

/// A settled utterance handed to the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub text: String,
    pub outcome: TurnOutcome,
}

impl TranscriptResult {
    pub fn is_degraded(&self) -> bool {
        self.outcome == TurnOutcome::Degraded
    }

    /// Whether the turn carries no speech at all
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Recognition fragments for the turn currently in progress
///
/// Finalized segments are appended and never revised. The interim partial
/// covers speech after the last final and is replaced on every update.
#[derive(Debug, Clone, Default)]
pub struct TurnBuffer {
    finals: Vec<String>,
    partial: Option<String>,
}

impl TurnBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the interim hypothesis
    pub fn set_partial(&mut self, text: &str) {
        let text = text.trim();
        self.partial = if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        };
    }

    /// Append a finalized segment; it supersedes the interim hypothesis
    pub fn push_final(&mut self, text: &str) {
        self.partial = None;
        let text = text.trim();
        if !text.is_empty() {
            self.finals.push(text.to_string());
        }
    }

    pub fn finals(&self) -> &[String] {
        &self.finals
    }

    pub fn partial(&self) -> Option<&str> {
        self.partial.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.finals.is_empty() && self.partial.is_none()
    }

    /// Everything heard so far: finals in order, then any trailing partial
    pub fn text(&self) -> String {
        self.finals
            .iter()
            .map(String::as_str)
            .chain(self.partial.as_deref())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Close this turn, leaving a fresh buffer in its place
    pub fn settle(&mut self, outcome: TurnOutcome) -> TranscriptResult {
        let closed = std::mem::take(self);
        TranscriptResult {
            text: closed.text(),
            outcome,
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Listening,
    AwaitingResponse,
    Speaking,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether the session has stopped accepting work
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closing | SessionState::Closed)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Listening => 1,
            SessionState::AwaitingResponse => 2,
            SessionState::Speaking => 3,
            SessionState::Closing => 4,
            SessionState::Closed => 5,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Listening,
            2 => SessionState::AwaitingResponse,
            3 => SessionState::Speaking,
            4 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::AwaitingResponse => "awaiting_response",
            SessionState::Speaking => "speaking",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_encoding() {
        for state in [
            SessionState::Idle,
            SessionState::Listening,
            SessionState::AwaitingResponse,
            SessionState::Speaking,
            SessionState::Closing,
            SessionState::Closed,
        ] {
            assert_eq!(SessionState::from_u8(state.as_u8()), state);
        }
        assert_eq!(
            serde_json::to_string(&SessionState::AwaitingResponse).unwrap(),
            "\"awaiting_response\""
        );
    }
}

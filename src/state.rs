//! Player state machine: `PlayerState`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Buffering,
    Ready,
    End,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlayerState::Idle => "IDLE",
            PlayerState::Buffering => "BUFFERING",
            PlayerState::Ready => "READY",
            PlayerState::End => "END",
        };
        f.write_str(s)
    }
}

impl PlayerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlayerState::End)
    }
}

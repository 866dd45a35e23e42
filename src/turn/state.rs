//! Turn-taking states

use std::fmt;

/// Where the assistant is in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    /// Idle, listening only for a wake phrase
    AwaitingWake,
    /// Speaking a short acknowledgement after the wake phrase
    Acknowledging,
    /// Listening for the user's request
    CapturingCommand,
    /// Speaking the reply
    Speaking,
    /// Listening for a follow-up request within the silence timeout
    AwaitingFollowUp,
}

impl TurnState {
    /// Whether capture may admit frames in this state
    ///
    /// Capture and speech output are mutually exclusive.
    #[must_use]
    pub const fn accepts_input(self) -> bool {
        matches!(
            self,
            Self::AwaitingWake | Self::CapturingCommand | Self::AwaitingFollowUp
        )
    }

    /// The listening phase run in this state, if any
    #[must_use]
    pub const fn listen_phase(self) -> Option<ListenPhase> {
        match self {
            Self::AwaitingWake => Some(ListenPhase::Wake),
            Self::CapturingCommand => Some(ListenPhase::Command),
            Self::AwaitingFollowUp => Some(ListenPhase::FollowUp),
            Self::Acknowledging | Self::Speaking => None,
        }
    }

    /// All states, in conversational order
    pub const ALL: [Self; 5] = [
        Self::AwaitingWake,
        Self::Acknowledging,
        Self::CapturingCommand,
        Self::Speaking,
        Self::AwaitingFollowUp,
    ];
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingWake => "awaiting_wake",
            Self::Acknowledging => "acknowledging",
            Self::CapturingCommand => "capturing_command",
            Self::Speaking => "speaking",
            Self::AwaitingFollowUp => "awaiting_follow_up",
        };
        f.write_str(name)
    }
}

/// One listening window; each gets a fresh recognizer and an empty queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenPhase {
    /// Waiting for a wake phrase
    Wake,
    /// Capturing the request after a wake phrase
    Command,
    /// Capturing a follow-up after a reply; subject to the silence timeout
    FollowUp,
}

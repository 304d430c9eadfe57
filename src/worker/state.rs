//! Worker loop state machine.

use serde::{Deserialize, Serialize};

/// Where the worker loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// Between iterations.
    Idle,
    /// Running an election attempt.
    Electing,
    /// Sole flag holder.
    Holding,
    /// Other flags seen; backing off.
    Contested,
    /// Holding, scanning the queue.
    Searching,
    /// Queue was empty; backing off.
    NoneFound,
    /// Working copy isolated; election released.
    Claimed,
    /// Job payload running.
    Executing,
    /// Job finished and bookkeeping cleared.
    Done,
}

impl LoopState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: LoopState) -> bool {
        use LoopState::*;

        matches!(
            (self, target),
            (Idle, Electing) |
            (Electing, Holding) | (Electing, Contested) |
            (Contested, Electing) |
            (Holding, Searching) |
            (Searching, NoneFound) | (Searching, Claimed) |
            (NoneFound, Idle) |
            (Claimed, Executing) |
            (Executing, Done) |
            (Done, Idle)
        )
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Electing => "electing",
            Self::Holding => "holding",
            Self::Contested => "contested",
            Self::Searching => "searching",
            Self::NoneFound => "none_found",
            Self::Claimed => "claimed",
            Self::Executing => "executing",
            Self::Done => "done",
        };
        write!(f, "{s}")
    }
}

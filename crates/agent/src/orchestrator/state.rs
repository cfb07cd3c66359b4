//! Invocation lifecycle.

use serde::Serialize;

/// Where an invocation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    /// Consuming the model stream for `turn`.
    Streaming { turn: u32 },
    /// The stream ended with `remaining` queued calls not yet started.
    AwaitingTools { turn: u32, remaining: usize },
    /// One call is running; `remaining` includes it.
    Executing { turn: u32, remaining: usize },
    Completed,
    Cancelled,
    Failed,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// The turn this state belongs to, if any.
    pub fn turn(&self) -> Option<u32> {
        match self {
            Self::Streaming { turn } | Self::AwaitingTools { turn, .. } | Self::Executing { turn, .. } => {
                Some(*turn)
            }
            _ => None,
        }
    }
}

/// Inputs that move the lifecycle forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The caller started the invocation.
    Invoke,
    /// The model stream for the current turn ended cleanly.
    StreamEnded { queued: usize },
    /// The next queued call is starting.
    ToolStarted,
    /// The running call produced its result.
    ToolFinished,
    /// The next turn would exceed the configured limit.
    TurnLimitReached,
    Cancel,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {from:?} on {signal:?}")]
pub struct InvalidTransition {
    pub from: TurnState,
    pub signal: Signal,
}

/// Pure transition function of the invocation lifecycle.
pub fn transition(from: TurnState, signal: Signal) -> Result<TurnState, InvalidTransition> {
    use Signal::*;
    use TurnState::*;

    let next = match (from, signal) {
        (Idle, Invoke) => Streaming { turn: 1 },

        (Streaming { .. }, StreamEnded { queued: 0 }) => Completed,
        (Streaming { turn }, StreamEnded { queued }) => AwaitingTools { turn, remaining: queued },
        (Streaming { .. }, TurnLimitReached) => Completed,

        (AwaitingTools { turn, remaining }, ToolStarted) => Executing { turn, remaining },

        (Executing { turn, remaining }, ToolFinished) if remaining > 1 => AwaitingTools {
            turn,
            remaining: remaining - 1,
        },
        (Executing { turn, .. }, ToolFinished) => Streaming { turn: turn + 1 },

        (state, Cancel) if !state.is_terminal() => Cancelled,
        (state, Fail) if !state.is_terminal() => Failed,

        (from, signal) => return Err(InvalidTransition { from, signal }),
    };

    Ok(next)
}

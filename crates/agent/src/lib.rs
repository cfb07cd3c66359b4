//! The turn orchestrator: the heart of Weft.
//!
//! An invocation follows a **Stream → Decode → Execute** cycle:
//!
//! 1. **Stream** the model's output for the current history
//! 2. **Decode** text and tool calls as they arrive, forwarding text live
//! 3. **Execute** queued tool calls in discovery order, behind the approval gate
//! 4. **Append** the results as a tool entry and loop back to step 1
//!
//! The loop continues until a turn requests no tools, the turn limit is
//! reached, the caller cancels, or the model fails.

pub mod approval;
pub mod decoder;
pub mod history;
pub mod orchestrator;
pub mod sink;
pub mod stream_event;

#[cfg(test)]
mod test_helpers;

pub use approval::{ApprovalCell, ApprovalOverride};
pub use decoder::{DecodeErrorKind, DecodedItem, Decoder};
pub use history::TurnOutput;
pub use orchestrator::{
    DEFAULT_MAX_TURNS, DecodeIssue, InvocationError, InvocationOutput, InvocationStatus, SessionInvocation,
    TurnOrchestrator, TurnState,
};
pub use sink::{ChannelSink, EventSink};
pub use stream_event::{StreamEvent, TranscriptItem};

//! History assembly.
//!
//! The history handed back to callers (and replayed to the model on the
//! next turn) is rebuilt from prior history plus the per-turn outputs of the
//! current invocation. Only three entry shapes appear: the user's input,
//! the model's text for a turn, and one tool-role entry holding every
//! response part from that turn's results.

use weft_core::{ConversationEntry, Part, ToolResult};

/// What one turn contributed to history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutput {
    /// The input entry opening this turn. Only the first turn has one.
    pub user: Option<ConversationEntry>,

    /// Concatenated content deltas the model produced.
    pub assistant_text: String,

    /// Results in execution order.
    pub tool_results: Vec<ToolResult>,
}

impl TurnOutput {
    pub fn opening(user: ConversationEntry) -> Self {
        Self {
            user: Some(user),
            ..Self::default()
        }
    }
}

/// Build the history for `prior` followed by `turns`.
///
/// Per turn, in order: the user entry if present, a model entry if the text
/// is non-empty, a tool entry if any results were recorded. Tool calls are
/// never stored as model parts.
pub fn assemble(prior: &[ConversationEntry], turns: &[TurnOutput]) -> Vec<ConversationEntry> {
    let mut history = prior.to_vec();

    for turn in turns {
        if let Some(user) = &turn.user {
            history.push(user.clone());
        }

        if !turn.assistant_text.is_empty() {
            history.push(ConversationEntry::model(turn.assistant_text.clone()));
        }

        if !turn.tool_results.is_empty() {
            let parts: Vec<Part> = turn
                .tool_results
                .iter()
                .flat_map(|r| r.response_parts.iter().cloned())
                .collect();
            history.push(ConversationEntry::tool(parts));
        }
    }

    history
}

//! A model source that replays canned turns.
//!
//! Used by gateway and end-to-end tests, and by `weft serve --scripted` for
//! exercising clients without a model endpoint.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Mutex;
use tracing::debug;
use weft_core::{ModelError, ModelEvent, ModelStream, ModelStreamSource, TurnRequest};

/// Replays one scripted turn per `open` call, in order.
///
/// Once the script is exhausted every further `open` fails with
/// [`ModelError::NotConfigured`], unless the source was built with
/// [`ScriptedSource::repeating`].
pub struct ScriptedSource {
    turns: Vec<Vec<ModelEvent>>,
    next: Mutex<usize>,
    repeat: bool,
}

impl ScriptedSource {
    pub fn new(turns: Vec<Vec<ModelEvent>>) -> Self {
        Self {
            turns,
            next: Mutex::new(0),
            repeat: false,
        }
    }

    /// Cycle through the script forever.
    pub fn repeating(turns: Vec<Vec<ModelEvent>>) -> Self {
        Self {
            repeat: true,
            ..Self::new(turns)
        }
    }

    /// A single text-only turn.
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![vec![ModelEvent::Content(text.into())]])
    }

    /// Turns opened so far.
    pub fn opened(&self) -> usize {
        *self.next.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ModelStreamSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open(&self, request: TurnRequest) -> Result<ModelStream, ModelError> {
        let index = {
            let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
            let index = *next;
            *next += 1;
            index
        };

        let turn = if self.repeat && !self.turns.is_empty() {
            self.turns.get(index % self.turns.len())
        } else {
            self.turns.get(index)
        };

        let Some(events) = turn.cloned() else {
            return Err(ModelError::NotConfigured(format!(
                "script exhausted after {} turns",
                self.turns.len()
            )));
        };

        debug!(prompt_id = %request.prompt_id, turn = request.turn, events = events.len(), "Replaying scripted turn");
        Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
    }
}

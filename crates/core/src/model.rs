//! Model stream source: the abstraction over LLM backends.
//!
//! A source knows how to send the conversation so far to a model and hand
//! back an async sequence of [`ModelEvent`]s for one turn. The orchestrator
//! never sees transport details; it only consumes events.
//!
//! Implementations: OpenAI-compatible endpoints, scripted sources for tests.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::message::{ConversationEntry, PromptId};

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Everything a source needs to open one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub prompt_id: PromptId,

    /// 1-based turn number within the invocation
    pub turn: u32,

    /// Full history up to and including this turn's input entry
    pub history: Vec<ConversationEntry>,

    /// Tools the model may call natively
    pub tools: Vec<ToolDefinition>,
}

/// One item of model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ModelEvent {
    /// A raw text delta. May carry inline tool-call sentinels.
    Content(String),

    /// A provider-native structured tool call.
    ToolCallRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

/// The event stream of a single turn.
pub type ModelStream = BoxStream<'static, Result<ModelEvent, ModelError>>;

/// The core model source trait.
///
/// The orchestrator calls `open()` once per turn and drains the returned
/// stream. Errors from `open()` or from the stream are fatal to the run.
#[async_trait]
pub trait ModelStreamSource: Send + Sync {
    /// A human-readable name for this source (e.g., "openai-compat", "scripted").
    fn name(&self) -> &str;

    /// Open the model stream for one turn.
    async fn open(&self, request: TurnRequest) -> Result<ModelStream, ModelError>;
}

//! Transcript items and the live events an invocation emits.
//!
//! `TranscriptItem` is the client-facing record of what happened in a run:
//! assistant text per turn, each tool call, each tool result. `StreamEvent`
//! wraps those plus raw content deltas and the terminal events so the
//! gateway can forward them to clients over SSE.

use serde::{Deserialize, Serialize};
use weft_core::{ConversationEntry, PromptId, ToolCallDescriptor, ToolResult};

/// One client-visible entry of an invocation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptItem {
    /// The model's text for one turn.
    Assistant { content: String },

    /// The orchestrator is about to run a tool.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// A tool finished (or was refused).
    ToolResult {
        id: String,
        name: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl TranscriptItem {
    pub fn tool_call(call: &ToolCallDescriptor) -> Self {
        Self::ToolCall {
            id: call.id.clone().unwrap_or_default(),
            name: call.name.clone(),
            arguments: call.arguments(),
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self::ToolResult {
            id: result.call_id.clone(),
            name: result.name.clone(),
            ok: result.ok,
            response_text: if result.ok { result.response_text() } else { None },
            error: result.error.clone(),
        }
    }

    /// SSE event name for this item.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Assistant { .. } => "assistant",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}

/// Events emitted during a streamed invocation.
///
/// Order on the wire:
/// - `content`: text deltas, as the model produces them
/// - `assistant`, `tool_call`, `tool_result`: transcript items
/// - `decode_error`: a tool call that was skipped because it could not be decoded
/// - `history`: the assembled history, once
/// - `done` or `error`: exactly one, last
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Content { text: String },

    Transcript { item: TranscriptItem },

    DecodeError { turn: u32, kind: String, name: String },

    History { history: Vec<ConversationEntry> },

    Done { prompt_id: PromptId },

    Error { message: String },
}

impl StreamEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::Transcript { item } => item.event_type(),
            Self::DecodeError { .. } => "decode_error",
            Self::History { .. } => "history",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// SSE data payload. Content is sent as plain text, everything else as JSON.
    pub fn data(&self) -> String {
        let value = match self {
            Self::Content { text } => return text.clone(),
            Self::Transcript { item } => serde_json::to_value(item),
            Self::DecodeError { turn, kind, name } => Ok(serde_json::json!({ "turn": turn, "kind": kind, "name": name })),
            Self::History { history } => serde_json::to_value(history),
            Self::Done { prompt_id } => Ok(serde_json::json!({ "prompt_id": prompt_id })),
            Self::Error { message } => Ok(serde_json::json!({ "message": message })),
        };
        value.map(|v| v.to_string()).unwrap_or_default()
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::ToolOutcome;

    #[test]
    fn transcript_item_wire_shape() {
        let call = ToolCallDescriptor::structured(Some("0".into()), "list_directory", serde_json::json!({"path": "/tmp"}));
        let json = serde_json::to_value(TranscriptItem::tool_call(&call)).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["name"], "list_directory");
        assert_eq!(json["arguments"]["path"], "/tmp");
    }

    #[test]
    fn failed_result_carries_error_not_output() {
        let call = ToolCallDescriptor::structured(Some("1".into()), "read_file", serde_json::json!({}));
        let result = ToolResult::from_outcome(&call, ToolOutcome::failed("no such file"));
        match TranscriptItem::tool_result(&result) {
            TranscriptItem::ToolResult { ok, response_text, error, .. } => {
                assert!(!ok);
                assert!(response_text.is_none());
                assert_eq!(error.as_deref(), Some("no such file"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn event_type_names() {
        assert_eq!(StreamEvent::Content { text: "x".into() }.event_type(), "content");
        assert_eq!(
            StreamEvent::Transcript { item: TranscriptItem::Assistant { content: "x".into() } }.event_type(),
            "assistant"
        );
        assert_eq!(StreamEvent::History { history: vec![] }.event_type(), "history");
        assert_eq!(StreamEvent::Done { prompt_id: PromptId::from("p") }.event_type(), "done");
        assert_eq!(StreamEvent::Error { message: "x".into() }.event_type(), "error");
    }

    #[test]
    fn data_payloads() {
        assert_eq!(StreamEvent::Content { text: "Hello".into() }.data(), "Hello");
        assert_eq!(
            StreamEvent::Done { prompt_id: PromptId::from("p-1") }.data(),
            r#"{"prompt_id":"p-1"}"#
        );
        let data = StreamEvent::Error { message: "boom".into() }.data();
        assert_eq!(data, r#"{"message":"boom"}"#);
        assert!(StreamEvent::Error { message: "boom".into() }.is_terminal());
        assert!(!StreamEvent::History { history: vec![] }.is_terminal());
    }

    #[test]
    fn decode_error_payload() {
        let event = StreamEvent::DecodeError {
            turn: 2,
            kind: "empty-arguments".into(),
            name: "read_file".into(),
        };
        assert_eq!(event.event_type(), "decode_error");
        let data: serde_json::Value = serde_json::from_str(&event.data()).unwrap();
        assert_eq!(data, serde_json::json!({"turn": 2, "kind": "empty-arguments", "name": "read_file"}));
        assert!(!event.is_terminal());
    }
}

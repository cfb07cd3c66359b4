//! Streaming tool-call decoder.
//!
//! Model output reaches the orchestrator in two shapes: provider-native
//! structured tool calls, and raw text that may carry inline tool calls
//! delimited by sentinel tokens. [`Decoder`] routes each event to the path
//! that understands it and yields a uniform stream of [`DecodedItem`]s.

mod native;
pub mod sentinel;

use serde::Serialize;
use weft_core::{ModelEvent, ToolCallDescriptor};

pub use native::NativePassthrough;
pub use sentinel::{ParserState, Phase, SentinelScanner, parse_specifier};

/// Why a tool call could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecodeErrorKind {
    /// The argument payload was empty or whitespace
    EmptyArguments,
    /// The argument payload was not valid JSON
    InvalidArguments,
    /// The specifier yielded no callable name
    MissingFunctionName,
    /// The stream ended inside a call
    #[serde(rename = "incomplete-call")]
    Incomplete,
}

impl DecodeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyArguments => "empty-arguments",
            Self::InvalidArguments => "invalid-arguments",
            Self::MissingFunctionName => "missing-function-name",
            Self::Incomplete => "incomplete-call",
        }
    }
}

impl std::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded unit of model output.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedItem {
    /// Plain text for the user.
    ContentDelta(String),
    /// A complete, well-formed tool call.
    ToolCall(ToolCallDescriptor),
    /// A call that was recognized but could not be decoded.
    DecodeError {
        kind: DecodeErrorKind,
        partial: ToolCallDescriptor,
    },
}

/// Turns model events into decoded items.
///
/// One decoder serves one turn. Call [`Decoder::flush`] when the stream
/// ends so held text is released and an unterminated call is reported.
#[derive(Debug, Default)]
pub struct Decoder {
    native: NativePassthrough,
    scanner: SentinelScanner,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one event.
    pub fn decode(&mut self, event: ModelEvent) -> Vec<DecodedItem> {
        match event {
            ModelEvent::Content(text) => self.scanner.feed(&text),
            ModelEvent::ToolCallRequest { id, name, args } => vec![self.native.translate(id, name, args)],
        }
    }

    /// Finish the turn.
    pub fn flush(&mut self) -> Vec<DecodedItem> {
        self.scanner.flush()
    }

    pub fn scanner_state(&self) -> &ParserState {
        self.scanner.state()
    }
}

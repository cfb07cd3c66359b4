//! Provider-native tool calls.

use serde_json::Value;
use tracing::debug;
use weft_core::ToolCallDescriptor;

use super::{DecodeErrorKind, DecodedItem};

/// Translates structured tool-call events into descriptors.
///
/// Some providers send arguments as a JSON-encoded string instead of an
/// object; those are parsed here so downstream code only sees values.
#[derive(Debug, Default)]
pub struct NativePassthrough;

impl NativePassthrough {
    pub fn translate(&self, id: Option<String>, name: String, args: Value) -> DecodedItem {
        let name = name.trim().to_string();
        let (raw_arguments, parsed) = match args {
            Value::String(text) => {
                let parsed = if text.trim().is_empty() {
                    Ok(Value::Object(Default::default()))
                } else {
                    serde_json::from_str::<Value>(&text)
                };
                (text, parsed.ok())
            }
            Value::Null => ("{}".to_string(), Some(Value::Object(Default::default()))),
            other => (other.to_string(), Some(other)),
        };

        let descriptor = ToolCallDescriptor {
            id: id.filter(|id| !id.is_empty()),
            name,
            raw_arguments,
            parsed_arguments: parsed,
        };

        if descriptor.name.is_empty() {
            return DecodedItem::DecodeError {
                kind: DecodeErrorKind::MissingFunctionName,
                partial: descriptor,
            };
        }

        if descriptor.parsed_arguments.is_none() {
            debug!(tool = %descriptor.name, "Native tool call carried unparseable arguments");
            return DecodedItem::DecodeError {
                kind: DecodeErrorKind::InvalidArguments,
                partial: descriptor,
            };
        }

        DecodedItem::ToolCall(descriptor)
    }
}

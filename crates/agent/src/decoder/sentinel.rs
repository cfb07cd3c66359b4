//! Inline tool-call scanner.
//!
//! Some models do not emit structured tool calls; they write them into the
//! text stream using reserved sentinel tokens:
//!
//! ```text
//! Let me check.<|tool_calls_section_begin|>
//!   <|tool_call_begin|>functions.list_directory:0
//!   <|tool_call_argument_begin|>{"path":"/tmp"}
//!   <|tool_call_end|>
//! <|tool_calls_section_end|>
//! ```
//!
//! The scanner is fed arbitrary fragments of that stream. Anything that might
//! be the start of a sentinel is held back in [`ParserState`] and re-scanned
//! with the next fragment, so the decoded items do not depend on where the
//! fragments were split.

use tracing::{debug, warn};
use weft_core::ToolCallDescriptor;

use super::{DecodeErrorKind, DecodedItem};

pub const SECTION_BEGIN: &str = "<|tool_calls_section_begin|>";
pub const CALL_BEGIN: &str = "<|tool_call_begin|>";
pub const ARGUMENT_BEGIN: &str = "<|tool_call_argument_begin|>";
pub const CALL_END: &str = "<|tool_call_end|>";
pub const SECTION_END: &str = "<|tool_calls_section_end|>";

const SENTINELS: [(&str, Sentinel); 5] = [
    (SECTION_BEGIN, Sentinel::SectionBegin),
    (CALL_BEGIN, Sentinel::CallBegin),
    (ARGUMENT_BEGIN, Sentinel::ArgumentBegin),
    (CALL_END, Sentinel::CallEnd),
    (SECTION_END, Sentinel::SectionEnd),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sentinel {
    SectionBegin,
    CallBegin,
    ArgumentBegin,
    CallEnd,
    SectionEnd,
}

/// Where the scanner is inside the microformat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// Plain text; emitted as content.
    #[default]
    Outside,
    /// Between section-begin and section-end, outside any call.
    InSection,
    /// After call-begin, reading the call specifier.
    InCall,
    /// After argument-begin, reading the raw argument payload.
    InArgument,
}

/// The mutable state carried between successive `feed` calls.
#[derive(Debug, Clone, Default)]
pub struct ParserState {
    /// Unconsumed input held back because it may be a split sentinel.
    pub content_buffer: String,
    /// Whether an explicit section-begin has been seen and not yet closed.
    pub section_open: bool,
    /// Specifier text (in `InCall`) or argument text (in `InArgument`).
    pub current_call_buffer: String,
    /// Specifier captured at argument-begin.
    pub current_specifier: Option<String>,
    pub phase: Phase,
}

impl ParserState {
    fn reset_call(&mut self) {
        self.current_call_buffer.clear();
        self.current_specifier = None;
    }

    fn after_call(&self) -> Phase {
        if self.section_open { Phase::InSection } else { Phase::Outside }
    }
}

/// Split a call specifier into `(name, id)`.
///
/// `functions.list_directory:0` → `("list_directory", Some("0"))`,
/// `functions.read_file` → `("read_file", None)`. A non-numeric suffix after
/// `:` is stripped and yields no id.
pub fn parse_specifier(specifier: &str) -> (String, Option<String>) {
    let specifier = specifier.trim();
    let (base, id) = match specifier.rsplit_once(':') {
        Some((base, suffix)) => {
            let suffix = suffix.trim();
            let id = (!suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
                .then(|| suffix.to_string());
            (base, id)
        }
        None => (specifier, None),
    };
    let name = base.rsplit('.').next().unwrap_or_default().trim().to_string();
    (name, id)
}

/// Build the final item for a completed call.
fn finish_call(specifier: &str, raw_arguments: &str) -> DecodedItem {
    let (name, id) = parse_specifier(specifier);
    let mut descriptor = ToolCallDescriptor {
        id,
        name,
        raw_arguments: raw_arguments.to_string(),
        parsed_arguments: None,
    };

    if descriptor.name.is_empty() {
        return DecodedItem::DecodeError {
            kind: DecodeErrorKind::MissingFunctionName,
            partial: descriptor,
        };
    }

    let payload = raw_arguments.trim();
    if payload.is_empty() {
        return DecodedItem::DecodeError {
            kind: DecodeErrorKind::EmptyArguments,
            partial: descriptor,
        };
    }

    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => {
            descriptor.parsed_arguments = Some(value);
            DecodedItem::ToolCall(descriptor)
        }
        Err(e) => {
            debug!(tool = %descriptor.name, error = %e, "Inline tool call arguments are not JSON");
            DecodedItem::DecodeError {
                kind: DecodeErrorKind::InvalidArguments,
                partial: descriptor,
            }
        }
    }
}

/// Find the earliest sentinel in `text`.
fn next_sentinel(text: &str) -> Option<(usize, Sentinel, usize)> {
    SENTINELS
        .iter()
        .filter_map(|(token, kind)| text.find(token).map(|pos| (pos, *kind, token.len())))
        .min_by_key(|(pos, _, _)| *pos)
}

/// Length of the longest suffix of `text` that is a proper prefix of a sentinel.
fn partial_sentinel_len(text: &str) -> usize {
    // Every sentinel starts with '<', so candidates start at a char boundary.
    text.char_indices()
        .rev()
        .take_while(|(i, _)| text.len() - i < CALL_BEGIN.len().max(ARGUMENT_BEGIN.len()))
        .filter(|(_, c)| *c == '<')
        .map(|(i, _)| &text[i..])
        .filter(|suffix| {
            SENTINELS
                .iter()
                .any(|(token, _)| token.len() > suffix.len() && token.starts_with(suffix))
        })
        .map(str::len)
        .max()
        .unwrap_or(0)
}

/// The delimiter-scanning decode path.
#[derive(Debug, Default)]
pub struct SentinelScanner {
    state: ParserState,
}

impl SentinelScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ParserState {
        &self.state
    }

    /// Scan one text fragment.
    pub fn feed(&mut self, chunk: &str) -> Vec<DecodedItem> {
        let mut input = std::mem::take(&mut self.state.content_buffer);
        input.push_str(chunk);

        let mut items = Vec::new();
        let mut rest = input.as_str();

        loop {
            match next_sentinel(rest) {
                Some((pos, sentinel, len)) => {
                    self.absorb_text(&rest[..pos], &mut items);
                    self.apply(sentinel, &mut items);
                    rest = &rest[pos + len..];
                }
                None => {
                    let hold = partial_sentinel_len(rest);
                    let (text, held) = rest.split_at(rest.len() - hold);
                    self.absorb_text(text, &mut items);
                    self.state.content_buffer = held.to_string();
                    break;
                }
            }
        }

        items
    }

    /// End of stream: release held text, abort any open call.
    pub fn flush(&mut self) -> Vec<DecodedItem> {
        let held = std::mem::take(&mut self.state.content_buffer);
        let mut items = Vec::new();
        self.absorb_text(&held, &mut items);

        match self.state.phase {
            Phase::InCall | Phase::InArgument => {
                let (specifier, arguments) = match self.state.current_specifier.take() {
                    Some(spec) => (spec, std::mem::take(&mut self.state.current_call_buffer)),
                    None => (std::mem::take(&mut self.state.current_call_buffer), String::new()),
                };
                let (name, id) = parse_specifier(&specifier);
                warn!(tool = %name, "Model stream ended inside an inline tool call");
                items.push(DecodedItem::DecodeError {
                    kind: DecodeErrorKind::Incomplete,
                    partial: ToolCallDescriptor {
                        id,
                        name,
                        raw_arguments: arguments,
                        parsed_arguments: None,
                    },
                });
            }
            Phase::Outside | Phase::InSection => {}
        }

        self.state = ParserState::default();
        items
    }

    fn absorb_text(&mut self, text: &str, items: &mut Vec<DecodedItem>) {
        if text.is_empty() {
            return;
        }
        match self.state.phase {
            Phase::Outside => match items.last_mut() {
                Some(DecodedItem::ContentDelta(existing)) => existing.push_str(text),
                _ => items.push(DecodedItem::ContentDelta(text.to_string())),
            },
            // Whitespace between calls is not content.
            Phase::InSection => {}
            Phase::InCall | Phase::InArgument => self.state.current_call_buffer.push_str(text),
        }
    }

    fn apply(&mut self, sentinel: Sentinel, items: &mut Vec<DecodedItem>) {
        let state = &mut self.state;
        match (state.phase, sentinel) {
            (Phase::Outside | Phase::InSection, Sentinel::SectionBegin) => {
                state.section_open = true;
                state.phase = Phase::InSection;
            }
            (Phase::Outside | Phase::InSection, Sentinel::CallBegin) => {
                state.reset_call();
                state.phase = Phase::InCall;
            }
            (Phase::InSection, Sentinel::SectionEnd) => {
                state.section_open = false;
                state.phase = Phase::Outside;
            }
            (Phase::InCall, Sentinel::ArgumentBegin) => {
                state.current_specifier = Some(std::mem::take(&mut state.current_call_buffer));
                state.phase = Phase::InArgument;
            }
            (Phase::InCall, Sentinel::CallEnd) => {
                let specifier = std::mem::take(&mut state.current_call_buffer);
                items.push(finish_call(&specifier, ""));
                state.reset_call();
                state.phase = state.after_call();
            }
            (Phase::InArgument, Sentinel::CallEnd) => {
                let specifier = state.current_specifier.take().unwrap_or_default();
                let arguments = std::mem::take(&mut state.current_call_buffer);
                items.push(finish_call(&specifier, &arguments));
                state.reset_call();
                state.phase = state.after_call();
            }
            (Phase::InCall | Phase::InArgument, Sentinel::CallBegin | Sentinel::SectionEnd) => {
                // A new structure started before this call closed: drop it.
                let specifier = state
                    .current_specifier
                    .take()
                    .unwrap_or_else(|| state.current_call_buffer.clone());
                warn!(specifier = %specifier.trim(), "Dropping unterminated inline tool call");
                state.reset_call();
                if sentinel == Sentinel::CallBegin {
                    state.phase = Phase::InCall;
                } else {
                    state.section_open = false;
                    state.phase = Phase::Outside;
                }
            }
            (phase, sentinel) => {
                debug!(?phase, ?sentinel, "Ignoring out-of-place tool call sentinel");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(chunks: &[&str]) -> Vec<DecodedItem> {
        let mut scanner = SentinelScanner::new();
        let mut items = Vec::new();
        for chunk in chunks {
            items.extend(scanner.feed(chunk));
        }
        items.extend(scanner.flush());
        coalesce(items)
    }

    /// Merge adjacent content deltas so split points do not matter.
    fn coalesce(items: Vec<DecodedItem>) -> Vec<DecodedItem> {
        let mut out: Vec<DecodedItem> = Vec::new();
        for item in items {
            match (out.last_mut(), item) {
                (Some(DecodedItem::ContentDelta(prev)), DecodedItem::ContentDelta(next)) => {
                    prev.push_str(&next)
                }
                (_, item) => out.push(item),
            }
        }
        out
    }

    const TWO_CALLS: &str = concat!(
        "Checking both.",
        "<|tool_calls_section_begin|>",
        "<|tool_call_begin|>functions.list_directory:0",
        "<|tool_call_argument_begin|>{\"path\":\"/tmp\"}",
        "<|tool_call_end|>",
        "<|tool_call_begin|>functions.read_file:1",
        "<|tool_call_argument_begin|>{\"path\":\"/tmp/a.txt\"}",
        "<|tool_call_end|>",
        "<|tool_calls_section_end|>",
    );

    #[test]
    fn specifier_name_and_id_extraction() {
        assert_eq!(
            parse_specifier("functions.list_directory:0"),
            ("list_directory".into(), Some("0".into()))
        );
        assert_eq!(
            parse_specifier("system.functions.nested.tool:1"),
            ("tool".into(), Some("1".into()))
        );
        assert_eq!(parse_specifier("simple_func:2"), ("simple_func".into(), Some("2".into())));
        assert_eq!(parse_specifier("functions.read_file"), ("read_file".into(), None));
        assert_eq!(parse_specifier("  functions.read_file:12 \n"), ("read_file".into(), Some("12".into())));
        assert_eq!(parse_specifier(""), (String::new(), None));
    }

    #[test]
    fn plain_text_passes_through() {
        let items = feed_all(&["Hello, ", "world"]);
        assert_eq!(items, vec![DecodedItem::ContentDelta("Hello, world".into())]);
    }

    #[test]
    fn content_is_emitted_immediately_outside_sections() {
        let mut scanner = SentinelScanner::new();
        let items = scanner.feed("Let me check.");
        assert_eq!(items, vec![DecodedItem::ContentDelta("Let me check.".into())]);
    }

    #[test]
    fn two_chunk_example_emits_call_only_after_call_end() {
        let mut scanner = SentinelScanner::new();
        let first = scanner.feed(
            "Let me check.<|tool_calls_section_begin|><|tool_call_begin|>functions.list_directory:0<|tool_call_argument_begin|>{\"path\"",
        );
        assert_eq!(first, vec![DecodedItem::ContentDelta("Let me check.".into())]);
        assert_eq!(scanner.state().phase, Phase::InArgument);

        let second = scanner.feed(":\"/tmp\"}<|tool_call_end|><|tool_calls_section_end|>");
        assert_eq!(second.len(), 1);
        match &second[0] {
            DecodedItem::ToolCall(call) => {
                assert_eq!(call.name, "list_directory");
                assert_eq!(call.id.as_deref(), Some("0"));
                assert_eq!(call.parsed_arguments, Some(serde_json::json!({"path": "/tmp"})));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
        assert_eq!(scanner.state().phase, Phase::Outside);
        assert!(scanner.flush().is_empty());
    }

    #[test]
    fn chunk_boundary_invariance_for_every_split_point() {
        let whole = feed_all(&[TWO_CALLS]);
        assert_eq!(whole.len(), 3);

        for i in 0..=TWO_CALLS.len() {
            let (a, b) = TWO_CALLS.split_at(i);
            assert_eq!(feed_all(&[a, b]), whole, "split at {i}");
        }
    }

    #[test]
    fn chunk_boundary_invariance_byte_by_byte() {
        let whole = feed_all(&[TWO_CALLS]);
        let chunks: Vec<String> = TWO_CALLS.chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        assert_eq!(feed_all(&refs), whole);
    }

    #[test]
    fn chunk_boundary_invariance_three_way_splits() {
        let whole = feed_all(&[TWO_CALLS]);
        for i in (0..TWO_CALLS.len()).step_by(7) {
            for j in (i..=TWO_CALLS.len()).step_by(11) {
                let parts = [&TWO_CALLS[..i], &TWO_CALLS[i..j], &TWO_CALLS[j..]];
                assert_eq!(feed_all(&parts), whole, "split at {i}/{j}");
            }
        }
    }

    #[test]
    fn text_after_section_end_is_content_again() {
        let items = feed_all(&[
            "<|tool_calls_section_begin|><|tool_call_begin|>functions.read_file<|tool_call_argument_begin|>{}<|tool_call_end|><|tool_calls_section_end|>Done.",
        ]);
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], DecodedItem::ToolCall(c) if c.id.is_none() && c.name == "read_file"));
        assert_eq!(items[1], DecodedItem::ContentDelta("Done.".into()));
    }

    #[test]
    fn text_inside_section_is_never_content() {
        let items = feed_all(&[
            "<|tool_calls_section_begin|>  stray words  <|tool_call_begin|>f:0<|tool_call_argument_begin|>{}<|tool_call_end|>\n<|tool_calls_section_end|>",
        ]);
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], DecodedItem::ToolCall(_)));
    }

    #[test]
    fn empty_arguments_error() {
        let items = feed_all(&[
            "<|tool_calls_section_begin|><|tool_call_begin|>functions.read_file:0<|tool_call_argument_begin|>  <|tool_call_end|><|tool_calls_section_end|>",
        ]);
        assert!(matches!(
            &items[0],
            DecodedItem::DecodeError { kind: DecodeErrorKind::EmptyArguments, partial } if partial.name == "read_file"
        ));
    }

    #[test]
    fn call_without_argument_sentinel_is_empty_arguments() {
        let items = feed_all(&["<|tool_call_begin|>functions.read_file:3<|tool_call_end|>"]);
        assert!(matches!(
            &items[0],
            DecodedItem::DecodeError { kind: DecodeErrorKind::EmptyArguments, partial } if partial.id.as_deref() == Some("3")
        ));
    }

    #[test]
    fn invalid_json_error_keeps_raw_arguments() {
        let items = feed_all(&[
            "<|tool_calls_section_begin|><|tool_call_begin|>functions.read_file:0<|tool_call_argument_begin|>{bad json<|tool_call_end|><|tool_calls_section_end|>",
        ]);
        match &items[0] {
            DecodedItem::DecodeError { kind, partial } => {
                assert_eq!(*kind, DecodeErrorKind::InvalidArguments);
                assert_eq!(partial.raw_arguments, "{bad json");
                assert!(partial.parsed_arguments.is_none());
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn missing_function_name_error() {
        let items = feed_all(&[
            "<|tool_calls_section_begin|><|tool_call_begin|><|tool_call_argument_begin|>{}<|tool_call_end|><|tool_calls_section_end|>",
        ]);
        assert!(matches!(
            &items[0],
            DecodedItem::DecodeError { kind: DecodeErrorKind::MissingFunctionName, .. }
        ));
    }

    #[test]
    fn stray_call_end_is_dropped_and_scanning_resumes() {
        let items = feed_all(&[
            "before<|tool_call_end|>after<|tool_calls_section_begin|><|tool_call_begin|>f:0<|tool_call_argument_begin|>{\"a\":1}<|tool_call_end|><|tool_calls_section_end|>",
        ]);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], DecodedItem::ContentDelta("beforeafter".into()));
        assert!(matches!(&items[1], DecodedItem::ToolCall(c) if c.name == "f"));
    }

    #[test]
    fn unterminated_call_is_dropped_when_next_call_begins() {
        let items = feed_all(&[
            "<|tool_calls_section_begin|><|tool_call_begin|>a:0<|tool_call_argument_begin|>{\"x\"<|tool_call_begin|>b:1<|tool_call_argument_begin|>{}<|tool_call_end|><|tool_calls_section_end|>",
        ]);
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], DecodedItem::ToolCall(c) if c.name == "b"));
    }

    #[test]
    fn flush_reports_incomplete_call_without_panicking() {
        let mut scanner = SentinelScanner::new();
        scanner.feed("<|tool_calls_section_begin|><|tool_call_begin|>functions.read_file:0<|tool_call_argument_begin|>{\"path\":");
        let items = scanner.flush();
        match &items[..] {
            [DecodedItem::DecodeError { kind, partial }] => {
                assert_eq!(*kind, DecodeErrorKind::Incomplete);
                assert_eq!(partial.name, "read_file");
                assert_eq!(partial.raw_arguments, "{\"path\":");
            }
            other => panic!("unexpected flush output {other:?}"),
        }
        assert_eq!(scanner.state().phase, Phase::Outside);
    }

    #[test]
    fn held_partial_sentinel_is_released_as_content_on_flush() {
        let mut scanner = SentinelScanner::new();
        let items = scanner.feed("a < b and <|tool");
        assert_eq!(items, vec![DecodedItem::ContentDelta("a < b and ".into())]);
        assert_eq!(scanner.state().content_buffer, "<|tool");
        assert_eq!(scanner.flush(), vec![DecodedItem::ContentDelta("<|tool".into())]);
    }

    #[test]
    fn bare_call_without_section_is_accepted() {
        let items = feed_all(&["Hi<|tool_call_begin|>functions.read_file:0<|tool_call_argument_begin|>{}<|tool_call_end|> bye"]);
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[1], DecodedItem::ToolCall(_)));
        assert_eq!(items[2], DecodedItem::ContentDelta(" bye".into()));
    }

    #[test]
    fn multibyte_text_around_sentinels() {
        let text = "héllo ✓<|tool_call_begin|>fn:0<|tool_call_argument_begin|>{\"q\":\"日本\"}<|tool_call_end|>";
        let whole = feed_all(&[text]);
        for (i, _) in text.char_indices() {
            let (a, b) = text.split_at(i);
            assert_eq!(feed_all(&[a, b]), whole);
        }
    }
}

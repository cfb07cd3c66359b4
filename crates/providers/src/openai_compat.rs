//! OpenAI-compatible model stream source.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, llama.cpp server, LM Studio,
//! Moonshot/Kimi, and any endpoint exposing a streaming
//! `/v1/chat/completions`.
//!
//! Text deltas are forwarded unchanged as [`ModelEvent::Content`], so models
//! that write inline sentinel tool calls are decoded downstream. Native
//! `tool_calls` deltas are accumulated by index and released as
//! [`ModelEvent::ToolCallRequest`] when the choice finishes.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, trace, warn};
use weft_config::ModelConfig;
use weft_core::{ConversationEntry, ModelError, ModelEvent, ModelStream, ModelStreamSource, Part, Role, ToolDefinition, TurnRequest};

/// A model source backed by an OpenAI-compatible HTTP endpoint.
pub struct OpenAiCompatSource {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiCompatSource {
    /// Create a source for `base_url` (e.g. `http://localhost:11434/v1`).
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::NotConfigured(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            name: "openai-compat".into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            client,
        })
    }

    /// Create a source from the `[model]` config section.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        if config.api_url.trim().is_empty() {
            return Err(ModelError::NotConfigured("model.api_url is empty".into()));
        }
        let mut source = Self::new(
            &config.api_url,
            config.api_key.clone(),
            &config.model,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        source.temperature = config.temperature;
        source.max_tokens = config.max_tokens;
        Ok(source)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Convert history entries to OpenAI chat messages.
    ///
    /// Tool results cannot be paired with assistant `tool_calls`, so they
    /// are replayed as a user message instead. Function-call parts that a
    /// caller sent back in history are rendered inline as text.
    fn to_api_messages(history: &[ConversationEntry]) -> Vec<ApiMessage> {
        history
            .iter()
            .filter_map(|entry| {
                let (role, content) = match entry.role {
                    Role::User => ("user", entry.text()),
                    Role::Model => ("assistant", Self::render_model_entry(entry)),
                    Role::Tool => ("user", Self::render_tool_entry(entry)),
                };
                if content.is_empty() {
                    return None;
                }
                Some(ApiMessage {
                    role: role.into(),
                    content,
                })
            })
            .collect()
    }

    fn render_model_entry(entry: &ConversationEntry) -> String {
        entry
            .parts
            .iter()
            .map(|part| match part {
                Part::FunctionCall { name, args, .. } => format!("\n[called `{name}` with {args}]"),
                other => other.as_text(),
            })
            .collect::<String>()
            .trim_start()
            .to_string()
    }

    fn render_tool_entry(entry: &ConversationEntry) -> String {
        entry
            .parts
            .iter()
            .map(|part| match part {
                Part::FunctionResponse { id, name, .. } => match id {
                    Some(id) => format!("Result of tool `{name}` (call {id}):\n{}", part.as_text()),
                    None => format!("Result of tool `{name}`:\n{}", part.as_text()),
                },
                other => other.as_text(),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(&self, request: &TurnRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::to_api_messages(&request.history),
            "temperature": self.temperature,
            "stream": true,
        });

        if let Some(max_tokens) = self.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }

        body
    }
}

#[async_trait]
impl ModelStreamSource for OpenAiCompatSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, request: TurnRequest) -> Result<ModelStream, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request);

        debug!(
            source = %self.name,
            model = %self.model,
            prompt_id = %request.prompt_id,
            turn = request.turn,
            "Sending streaming request"
        );

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await.map_err(|e| ModelError::Network(e.to_string()))?;
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ModelError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ModelError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Model endpoint returned error");
            return Err(ModelError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let source_name = self.name.clone();

        // Read the SSE byte stream and forward parsed events
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut parser = SseParser::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(ModelError::StreamInterrupted(e.to_string()))).await;
                        return;
                    }
                };

                for event in parser.push(&bytes) {
                    if tx.send(Ok(event)).await.is_err() {
                        trace!(source = %source_name, "Receiver dropped, closing stream");
                        return;
                    }
                }
                if parser.is_done() {
                    return;
                }
            }

            // Stream ended without [DONE]: release whatever was accumulated
            for event in parser.finish() {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Incremental parser for an OpenAI chat-completions SSE body.
#[derive(Default)]
struct SseParser {
    buffer: Vec<u8>,
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    done: bool,
}

impl SseParser {
    /// Feed raw bytes; returns events completed by them.
    fn push(&mut self, bytes: &[u8]) -> Vec<ModelEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        // Buffer bytes, not text: a UTF-8 sequence may straddle two chunks.
        self.buffer.extend_from_slice(bytes);

        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&raw[..line_end]).trim_end_matches('\r').to_string();

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                events.extend(self.finish());
                break;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(stream_resp) => {
                    let Some(choice) = stream_resp.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                        events.push(ModelEvent::Content(content));
                    }

                    for tc_delta in choice.delta.tool_calls.unwrap_or_default() {
                        let acc = self.tool_calls.entry(tc_delta.index).or_default();
                        if let Some(id) = tc_delta.id {
                            acc.id = Some(id);
                        }
                        if let Some(func) = tc_delta.function {
                            if let Some(name) = func.name {
                                acc.name.push_str(&name);
                            }
                            if let Some(args) = func.arguments {
                                acc.arguments.push_str(&args);
                            }
                        }
                    }

                    if choice.finish_reason.is_some() {
                        events.extend(self.drain_tool_calls());
                    }
                }
                Err(e) => {
                    trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                }
            }
        }

        events
    }

    /// End of body: release accumulated tool calls.
    fn finish(&mut self) -> Vec<ModelEvent> {
        self.done = true;
        self.drain_tool_calls()
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn drain_tool_calls(&mut self) -> Vec<ModelEvent> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(ToolCallAccumulator::into_event)
            .collect()
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta: arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    /// Arguments stay a JSON string; the decoder parses and validates them.
    fn into_event(self) -> ModelEvent {
        ModelEvent::ToolCallRequest {
            id: self.id,
            name: self.name,
            args: serde_json::Value::String(self.arguments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::PromptId;

    fn sse(lines: &[&str]) -> String {
        lines.iter().map(|l| format!("data: {l}\n\n")).collect()
    }

    #[test]
    fn from_config_uses_model_settings() {
        let config = ModelConfig {
            api_url: "http://localhost:8000/v1/".into(),
            model: "kimi-k2".into(),
            max_tokens: Some(512),
            ..ModelConfig::default()
        };
        let source = OpenAiCompatSource::from_config(&config).unwrap();
        assert_eq!(source.base_url, "http://localhost:8000/v1");
        assert_eq!(source.model(), "kimi-k2");
        assert_eq!(source.max_tokens, Some(512));
        assert!(source.api_key.is_none());
    }

    #[test]
    fn empty_api_url_is_not_configured() {
        let config = ModelConfig {
            api_url: " ".into(),
            ..ModelConfig::default()
        };
        assert!(matches!(
            OpenAiCompatSource::from_config(&config),
            Err(ModelError::NotConfigured(_))
        ));
    }

    #[test]
    fn history_conversion() {
        let history = vec![
            ConversationEntry::user("list /tmp"),
            ConversationEntry::model("Checking."),
            ConversationEntry::tool(vec![Part::FunctionResponse {
                id: Some("0".into()),
                name: "list_directory".into(),
                response: serde_json::json!({"output": "a.txt"}),
            }]),
            ConversationEntry::model(""),
        ];
        let messages = OpenAiCompatSource::to_api_messages(&history);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[2].role, "user");
        assert!(messages[2].content.contains("list_directory"));
        assert!(messages[2].content.contains("(call 0)"));
        assert!(messages[2].content.ends_with("a.txt"));
    }

    #[test]
    fn function_call_parts_in_resent_history_are_kept() {
        let history: Vec<ConversationEntry> = serde_json::from_value(serde_json::json!([
            {"role": "model", "parts": [
                {"type": "text", "text": "Looking."},
                {"type": "function_call", "id": "0", "name": "read_file", "args": {"path": "a"}}
            ]},
            {"role": "model", "parts": [
                {"type": "function_call", "name": "list_directory", "args": {}}
            ]}
        ]))
        .unwrap();
        assert!(matches!(&history[0].parts[1], Part::FunctionCall { id: Some(id), .. } if id == "0"));

        let messages = OpenAiCompatSource::to_api_messages(&history);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "assistant");
        assert_eq!(messages[0].content, "Looking.\n[called `read_file` with {\"path\":\"a\"}]");
        assert_eq!(messages[1].content, "[called `list_directory` with {}]");
    }

    #[test]
    fn tool_definition_conversion() {
        let tools = vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let api_tools = OpenAiCompatSource::to_api_tools(&tools);
        assert_eq!(api_tools.len(), 1);
        assert_eq!(api_tools[0].function.name, "read_file");
        assert_eq!(api_tools[0].r#type, "function");
    }

    #[test]
    fn request_body_shape() {
        let source = OpenAiCompatSource::new("http://x/v1", None, "m", Duration::from_secs(1)).unwrap();
        let request = TurnRequest {
            prompt_id: PromptId::from("p"),
            turn: 1,
            history: vec![ConversationEntry::user("hi")],
            tools: vec![],
        };
        let body = source.request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], "m");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert!(body.get("tools").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    // --- SSE parsing tests ---

    #[test]
    fn content_deltas_become_content_events() {
        let mut parser = SseParser::default();
        let body = sse(&[
            r#"{"choices":[{"delta":{"role":"assistant"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}"#,
            "[DONE]",
        ]);
        let events = parser.push(body.as_bytes());
        assert_eq!(
            events,
            vec![ModelEvent::Content("Hel".into()), ModelEvent::Content("lo".into())]
        );
        assert!(parser.is_done());
    }

    #[test]
    fn lines_split_across_byte_chunks() {
        let mut parser = SseParser::default();
        let body = sse(&[r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#]);
        let (a, b) = body.split_at(17);
        assert!(parser.push(a.as_bytes()).is_empty());
        assert_eq!(parser.push(b.as_bytes()), vec![ModelEvent::Content("Hello".into())]);
    }

    #[test]
    fn tool_call_deltas_are_accumulated_until_finish() {
        let mut parser = SseParser::default();
        let first = sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"read_file","arguments":""}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"path\""}}]},"finish_reason":null}]}"#,
        ]);
        assert!(parser.push(first.as_bytes()).is_empty());

        let second = sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"a.txt\"}"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ]);
        let events = parser.push(second.as_bytes());
        assert_eq!(
            events,
            vec![ModelEvent::ToolCallRequest {
                id: Some("call_a".into()),
                name: "read_file".into(),
                args: serde_json::Value::String(r#"{"path":"a.txt"}"#.into()),
            }]
        );
    }

    #[test]
    fn parallel_tool_calls_keep_index_order() {
        let mut parser = SseParser::default();
        let body = sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"list_directory","arguments":"{}"}},{"index":0,"id":"call_a","function":{"name":"read_file","arguments":"{}"}}]},"finish_reason":null}]}"#,
            "[DONE]",
        ]);
        let names: Vec<String> = parser
            .push(body.as_bytes())
            .into_iter()
            .filter_map(|e| match e {
                ModelEvent::ToolCallRequest { name, .. } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["read_file", "list_directory"]);
    }

    #[test]
    fn finish_without_done_releases_tool_calls() {
        let mut parser = SseParser::default();
        let body = sse(&[
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"read_file","arguments":"{}"}}]},"finish_reason":null}]}"#,
        ]);
        assert!(parser.push(body.as_bytes()).is_empty());
        assert_eq!(parser.finish().len(), 1);
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn multibyte_text_split_mid_character() {
        let mut parser = SseParser::default();
        let body = sse(&[r#"{"choices":[{"delta":{"content":"日本"},"finish_reason":null}]}"#]);
        let bytes = body.as_bytes();
        let cut = body.find('日').unwrap() + 1;
        assert!(parser.push(&bytes[..cut]).is_empty());
        assert_eq!(parser.push(&bytes[cut..]), vec![ModelEvent::Content("日本".into())]);
    }

    #[test]
    fn comments_and_garbage_are_ignored() {
        let mut parser = SseParser::default();
        let body = ": keep-alive\n\ndata: not json\n\nevent: ping\n\n";
        assert!(parser.push(body.as_bytes()).is_empty());
        assert!(!parser.is_done());
    }

    #[test]
    fn inline_sentinels_pass_through_as_content() {
        let mut parser = SseParser::default();
        let body = sse(&[r#"{"choices":[{"delta":{"content":"<|tool_call_begin|>functions.read_file:0"},"finish_reason":null}]}"#]);
        assert_eq!(
            parser.push(body.as_bytes()),
            vec![ModelEvent::Content("<|tool_call_begin|>functions.read_file:0".into())]
        );
    }
}

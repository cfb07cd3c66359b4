//! Tool calls, tool results, and the executor abstraction.
//!
//! The orchestrator only talks to a [`ToolExecutor`]. [`ToolRegistry`] is the
//! stock executor: a name → [`Tool`] map that turns each tool's output into
//! response parts the model can read on the next turn.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ToolError;
use crate::message::Part;
use crate::model::ToolDefinition;

/// A decoded request to run one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDescriptor {
    /// Call id. `None` until the orchestrator assigns the index within the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the tool to execute
    pub name: String,

    /// Argument text exactly as the model produced it
    pub raw_arguments: String,

    /// Arguments parsed as JSON, when parsing succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed_arguments: Option<serde_json::Value>,
}

impl ToolCallDescriptor {
    /// Build a descriptor from an already-structured call.
    pub fn structured(id: Option<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id,
            name: name.into(),
            raw_arguments: args.to_string(),
            parsed_arguments: Some(args),
        }
    }

    /// The arguments to hand to a tool; an empty object when nothing parsed.
    pub fn arguments(&self) -> serde_json::Value {
        self.parsed_arguments
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// What an executor reports back for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_parts: Option<Vec<Part>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_display: Option<String>,
}

impl ToolOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// The recorded result of one executed call. Exactly one per descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The id of the descriptor this result answers
    pub call_id: String,

    pub name: String,

    pub ok: bool,

    /// Parts appended to the synthetic tool-role entry
    #[serde(default)]
    pub response_parts: Vec<Part>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_display: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// Build the result for `call` from an executor outcome.
    ///
    /// When the executor produced no parts, a single `function_response`
    /// part is synthesized so the model always sees an answer.
    pub fn from_outcome(call: &ToolCallDescriptor, outcome: ToolOutcome) -> Self {
        let call_id = call.id.clone().unwrap_or_default();
        let ok = outcome.error.is_none();
        let response_parts = match outcome.response_parts {
            Some(parts) => parts,
            None => {
                let response = match (&outcome.error, &outcome.result_display) {
                    (Some(err), _) => serde_json::json!({ "error": err }),
                    (None, Some(display)) => serde_json::json!({ "output": display }),
                    (None, None) => serde_json::json!({ "output": "" }),
                };
                vec![Part::FunctionResponse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    response,
                }]
            }
        };

        Self {
            call_id,
            name: call.name.clone(),
            ok,
            response_parts,
            result_display: outcome.result_display,
            error: outcome.error,
        }
    }

    /// Text shown in transcripts: the display string, else the parts' text.
    pub fn response_text(&self) -> Option<String> {
        if let Some(display) = &self.result_display {
            return Some(display.clone());
        }
        if self.response_parts.is_empty() {
            return None;
        }
        Some(
            self.response_parts
                .iter()
                .map(Part::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

/// Runs tool calls on behalf of the orchestrator.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute one call. Never fails; failures are reported in the outcome.
    ///
    /// The token is the invocation's cancellation signal. Executors may
    /// observe it, but the orchestrator never preempts a started call.
    async fn execute(&self, call: &ToolCallDescriptor, cancel: &CancellationToken) -> ToolOutcome;

    /// Definitions advertised to the model for native tool calling.
    fn definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }
}

/// Plain output of a [`Tool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// A single capability the registry can run.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "list_directory", "read_file").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Run a tool by name with already-parsed arguments.
    pub async fn run(&self, name: &str, arguments: serde_json::Value) -> std::result::Result<ToolOutput, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(arguments).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, call: &ToolCallDescriptor, _cancel: &CancellationToken) -> ToolOutcome {
        debug!(tool = %call.name, call_id = ?call.id, "Running registered tool");

        match self.run(&call.name, call.arguments()).await {
            Ok(output) if output.success => ToolOutcome {
                error: None,
                response_parts: Some(vec![Part::FunctionResponse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    response: match output.data {
                        Some(data) => serde_json::json!({ "output": output.output, "data": data }),
                        None => serde_json::json!({ "output": output.output }),
                    },
                }]),
                result_display: Some(output.output),
            },
            Ok(output) => ToolOutcome::failed(output.output),
            Err(e) => ToolOutcome::failed(e.to_string()),
        }
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.names()
            .into_iter()
            .filter_map(|name| self.get(name).map(|t| t.to_definition()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str { "echo" }
        fn description(&self) -> &str { "Echoes back the input" }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolOutput, ToolError> {
            match arguments["text"].as_str() {
                Some(text) => Ok(ToolOutput {
                    success: true,
                    output: text.to_string(),
                    data: None,
                }),
                None => Err(ToolError::InvalidArguments("Missing 'text' argument".into())),
            }
        }
    }

    fn echo_call(args: serde_json::Value) -> ToolCallDescriptor {
        ToolCallDescriptor::structured(Some("0".into()), "echo", args)
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn registry_definitions() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let defs = ToolExecutor::definitions(&registry);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));

        let call = echo_call(serde_json::json!({"text": "hello world"}));
        let outcome = ToolExecutor::execute(&registry, &call, &CancellationToken::new()).await;
        assert!(outcome.error.is_none());
        assert_eq!(outcome.result_display.as_deref(), Some("hello world"));
        let parts = outcome.response_parts.unwrap();
        assert!(matches!(
            &parts[0],
            Part::FunctionResponse { id: Some(id), name, .. } if id == "0" && name == "echo"
        ));
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let call = ToolCallDescriptor::structured(None, "nonexistent", serde_json::json!({}));
        let outcome = ToolExecutor::execute(&registry, &call, &CancellationToken::new()).await;
        assert!(outcome.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn registry_reports_tool_errors_as_outcomes() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let call = echo_call(serde_json::json!({}));
        let outcome = ToolExecutor::execute(&registry, &call, &CancellationToken::new()).await;
        assert!(outcome.error.unwrap().contains("Missing 'text'"));
    }

    #[test]
    fn result_synthesizes_function_response_when_executor_gives_no_parts() {
        let call = echo_call(serde_json::json!({"text": "x"}));
        let result = ToolResult::from_outcome(&call, ToolOutcome::failed("boom"));
        assert!(!result.ok);
        assert_eq!(result.call_id, "0");
        assert_eq!(result.response_parts.len(), 1);
        assert_eq!(result.response_text().as_deref(), Some(r#"{"error":"boom"}"#));
    }

    #[test]
    fn descriptor_arguments_default_to_empty_object() {
        let call = ToolCallDescriptor {
            id: None,
            name: "echo".into(),
            raw_arguments: "{bad".into(),
            parsed_arguments: None,
        };
        assert_eq!(call.arguments(), serde_json::json!({}));
    }
}

//! Shared test helpers for orchestrator tests.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use weft_core::{
    ModelError, ModelEvent, ModelStream, ModelStreamSource, Part, PermissionDecision, PermissionProvider,
    ToolCallDescriptor, ToolDefinition, ToolExecutor, ToolOutcome, TurnRequest,
};

/// One scripted turn of model output.
#[derive(Clone, Default)]
pub struct ScriptedTurn {
    events: Vec<Result<ModelEvent, ModelError>>,
    hang: bool,
}

impl ScriptedTurn {
    pub fn text(text: &str) -> Self {
        Self::default().content(text)
    }

    pub fn content(mut self, text: &str) -> Self {
        self.events.push(Ok(ModelEvent::Content(text.into())));
        self
    }

    pub fn call(mut self, id: Option<&str>, name: &str, args: serde_json::Value) -> Self {
        self.events.push(Ok(ModelEvent::ToolCallRequest {
            id: id.map(String::from),
            name: name.into(),
            args,
        }));
        self
    }

    pub fn fail(mut self, error: ModelError) -> Self {
        self.events.push(Err(error));
        self
    }

    /// Never end the stream after the scripted events.
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// A source that replays one scripted turn per `open` call.
///
/// Panics if more turns are opened than were scripted.
pub struct ScriptedSource {
    turns: Mutex<Vec<ScriptedTurn>>,
    requests: Mutex<Vec<TurnRequest>>,
    open_error: Option<ModelError>,
}

impl ScriptedSource {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().rev().collect()),
            requests: Mutex::new(Vec::new()),
            open_error: None,
        }
    }

    pub fn failing_open(error: ModelError) -> Self {
        Self {
            open_error: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelStreamSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted_test"
    }

    async fn open(&self, request: TurnRequest) -> Result<ModelStream, ModelError> {
        self.requests.lock().unwrap().push(request);
        if let Some(err) = &self.open_error {
            return Err(err.clone());
        }

        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| panic!("ScriptedSource: no more turns scripted"));

        let events = futures::stream::iter(turn.events);
        if turn.hang {
            Ok(events.chain(futures::stream::pending()).boxed())
        } else {
            Ok(events.boxed())
        }
    }
}

/// An executor that records every call and answers with `ran <name>`.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<ToolCallDescriptor>>,
    failing: HashSet<String>,
    cancel_on_first: Option<CancellationToken>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.into());
        self
    }

    /// Fire `token` while the first call is executing.
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_first = Some(token);
        self
    }

    pub fn calls(&self) -> Vec<ToolCallDescriptor> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, call: &ToolCallDescriptor, _cancel: &CancellationToken) -> ToolOutcome {
        let first = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(call.clone());
            calls.len() == 1
        };
        if first {
            if let Some(token) = &self.cancel_on_first {
                token.cancel();
            }
        }

        if self.failing.contains(&call.name) {
            return ToolOutcome::failed(format!("{} exploded", call.name));
        }

        ToolOutcome {
            error: None,
            response_parts: Some(vec![Part::FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response: serde_json::json!({ "output": format!("ran {}", call.name) }),
            }]),
            result_display: Some(format!("ran {}", call.name)),
        }
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "read_file".into(),
            description: "Read a file".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]
    }
}

/// Allows only the named tools.
pub struct AllowList(pub Vec<&'static str>);

#[async_trait]
impl PermissionProvider for AllowList {
    async fn check(&self, call: &ToolCallDescriptor) -> PermissionDecision {
        if self.0.contains(&call.name.as_str()) {
            PermissionDecision::Allow
        } else {
            PermissionDecision::Deny {
                reason: "not on the allow list".into(),
            }
        }
    }
}

//! `/v1` API routes.
//!
//! `POST /v1/generate` runs one invocation. With `"stream": false` (the
//! default) the caller gets a single JSON document once the invocation
//! ends. With `"stream": true` the response is an SSE stream:
//!
//! | event         | data                      |
//! |---------------|---------------------------|
//! | `content`     | plain text delta          |
//! | `assistant`   | transcript item (JSON)    |
//! | `tool_call`   | transcript item (JSON)    |
//! | `tool_result` | transcript item (JSON)    |
//! | `decode_error`| `{"turn", "kind", "name"}`|
//! | `history`     | conversation entries      |
//! | `done`        | `{"prompt_id": ...}`      |
//! | `error`       | `{"message": ...}`        |
//!
//! The gateway keeps no conversation state; callers resend `history`.
//! Dropping the connection cancels the invocation in both modes. The run
//! itself lives in a spawned task, so a tool that has already started
//! still finishes.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse, Json, Response,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
    routing::post,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use weft_agent::{
    ChannelSink, DecodeIssue, InvocationOutput, InvocationStatus, SessionInvocation, StreamEvent, TranscriptItem,
};
use weft_core::{ConversationEntry, PromptId};

use crate::SharedState;

/// Build the `/v1` router.
pub fn v1_router() -> Router<SharedState> {
    Router::new().route("/generate", post(generate_handler))
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub input: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub history: Vec<ConversationEntry>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub output: String,
    pub prompt_id: PromptId,
    pub status: InvocationStatus,
    pub messages: Vec<TranscriptItem>,
    pub history: Vec<ConversationEntry>,
    /// Tool calls skipped because they could not be decoded.
    pub decode_errors: Vec<DecodeIssue>,
}

impl From<InvocationOutput> for GenerateResponse {
    fn from(out: InvocationOutput) -> Self {
        Self {
            output: out.final_text,
            prompt_id: out.prompt_id,
            status: out.status,
            messages: out.transcript,
            history: out.history,
            decode_errors: out.decode_errors,
        }
    }
}

/// Body of a `502` answer: the model failed part way through.
#[derive(Debug, Serialize)]
pub struct FailureResponse {
    pub error: String,
    pub prompt_id: PromptId,
    pub messages: Vec<TranscriptItem>,
    pub history: Vec<ConversationEntry>,
    pub decode_errors: Vec<DecodeIssue>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// `POST /v1/generate`
async fn generate_handler(State(state): State<SharedState>, Json(payload): Json<GenerateRequest>) -> Response {
    if payload.input.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "input must not be empty".into(),
            }),
        )
            .into_response();
    }

    let GenerateRequest {
        input,
        stream,
        prompt_id,
        history,
    } = payload;

    let mut invocation = SessionInvocation::new()
        .with_history(history)
        .with_approval(state.approval);
    if let Some(id) = prompt_id.filter(|id| !id.is_empty()) {
        invocation = invocation.with_prompt_id(PromptId::from(&id));
    }

    info!(prompt_id = %invocation.prompt_id, stream, "Generate request");

    if stream {
        return stream_invocation(state, invocation, input).into_response();
    }

    // Dropping this handler (client gone) fires the token; the spawned run
    // observes it and winds down on its own.
    let _guard = invocation.cancellation.clone().drop_guard();
    let prompt_id = invocation.prompt_id.clone();
    let orchestrator = state.orchestrator.clone();
    let task = tokio::spawn(async move { orchestrator.run(invocation, &input).await });

    let result = match task.await {
        Ok(result) => result,
        Err(err) => {
            error!(prompt_id = %prompt_id, error = %err, "Invocation task ended abnormally");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "invocation ended abnormally".into(),
                }),
            )
                .into_response();
        }
    };

    match result {
        Ok(output) => Json(GenerateResponse::from(output)).into_response(),
        Err(err) => {
            error!(prompt_id = %err.partial.prompt_id, error = %err.source, "Invocation failed");
            let partial = *err.partial;
            (
                StatusCode::BAD_GATEWAY,
                Json(FailureResponse {
                    error: err.source.to_string(),
                    prompt_id: partial.prompt_id,
                    messages: partial.transcript,
                    history: partial.history,
                    decode_errors: partial.decode_errors,
                }),
            )
                .into_response()
        }
    }
}

fn stream_invocation(
    state: SharedState,
    invocation: SessionInvocation,
    input: String,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = invocation.cancellation.clone();
    let mut sink = ChannelSink::new(tx, cancel.clone());

    tokio::spawn(async move {
        if let Err(err) = state.orchestrator.run_streaming(invocation, &input, &mut sink).await {
            error!(prompt_id = %err.partial.prompt_id, error = %err.source, "Streaming invocation failed");
        }
    });

    Sse::new(event_stream(rx, cancel)).keep_alive(KeepAlive::default())
}

/// Turn orchestrator events into SSE frames.
///
/// The stream owns a drop guard on `cancel`, so dropping the response
/// cancels the invocation feeding `rx`.
fn event_stream(
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    let guard = cancel.drop_guard();
    UnboundedReceiverStream::new(rx).map(move |event| {
        let _guard = &guard;
        Ok(to_sse(&event))
    })
}

fn to_sse(event: &StreamEvent) -> SseEvent {
    SseEvent::default().event(event.event_type()).data(sse_data(event))
}

/// SSE frames are line based; bare carriage returns would split a data line.
fn sse_data(event: &StreamEvent) -> String {
    event.data().replace("\r\n", "\n").replace('\r', "\n")
}

//! The turn orchestrator.
//!
//! One invocation drives the model through as many turns as it needs:
//!
//! 1. Open the model stream with the history so far
//! 2. Decode events into content and tool calls, forwarding content live
//! 3. When the stream ends, run each queued call in discovery order
//! 4. Feed the results back as a tool entry and open the next turn
//! 5. Stop when a turn queues no calls, the turn limit is hit, the caller
//!    cancels, or the model fails
//!
//! Cancellation is cooperative. It is observed while waiting on the model
//! and between tool calls, and again once an approval prompt returns; a call
//! handed to the executor always completes and its result is recorded.

mod state;


use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use weft_core::{
    ApprovalMode, ConversationEntry, ModelError, ModelStreamSource, PermissionDecision, PermissionProvider, PromptId,
    ToolCallDescriptor, ToolDefinition, ToolError, ToolExecutor, ToolOutcome, ToolResult, TurnRequest,
};

use crate::approval::ApprovalCell;
use crate::decoder::{DecodeErrorKind, DecodedItem, Decoder};
use crate::history::{self, TurnOutput};
use crate::sink::{Emitter, EventSink};
use crate::stream_event::{StreamEvent, TranscriptItem};

pub use state::{InvalidTransition, Signal, TurnState, transition};

/// Default safety limit on model turns per invocation.
pub const DEFAULT_MAX_TURNS: u32 = 25;

/// Per-invocation inputs besides the user's text.
#[derive(Debug, Clone)]
pub struct SessionInvocation {
    pub prompt_id: PromptId,
    pub cancellation: CancellationToken,
    pub prior_history: Vec<ConversationEntry>,
    /// Approval mode for this invocation only. `None` uses the host's setting.
    pub approval: Option<ApprovalMode>,
}

impl SessionInvocation {
    pub fn new() -> Self {
        Self {
            prompt_id: PromptId::new(),
            cancellation: CancellationToken::new(),
            prior_history: Vec::new(),
            approval: None,
        }
    }

    pub fn with_prompt_id(mut self, prompt_id: PromptId) -> Self {
        self.prompt_id = prompt_id;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationEntry>) -> Self {
        self.prior_history = history;
        self
    }

    pub fn with_approval(mut self, mode: ApprovalMode) -> Self {
        self.approval = Some(mode);
        self
    }
}

impl Default for SessionInvocation {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Completed,
    Cancelled,
    Failed,
}

/// A tool call the decoder could not turn into a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodeIssue {
    pub turn: u32,
    pub kind: DecodeErrorKind,
    pub call: ToolCallDescriptor,
}

/// Everything an invocation produced.
#[derive(Debug, Clone)]
pub struct InvocationOutput {
    pub prompt_id: PromptId,
    pub status: InvocationStatus,
    /// All content deltas of all turns, concatenated.
    pub final_text: String,
    pub transcript: Vec<TranscriptItem>,
    /// Prior history plus this invocation's entries.
    pub history: Vec<ConversationEntry>,
    /// Turns opened against the model.
    pub turns: u32,
    pub decode_errors: Vec<DecodeIssue>,
}

/// The model failed. Carries everything produced before the failure.
#[derive(Debug, thiserror::Error)]
#[error("invocation {} failed: {source}", .partial.prompt_id)]
pub struct InvocationError {
    pub source: ModelError,
    pub partial: Box<InvocationOutput>,
}

/// How one model stream ended.
enum StreamEnd {
    Finished(Vec<ToolCallDescriptor>),
    Cancelled,
}

/// Mutable state of one invocation.
struct Run {
    prompt_id: PromptId,
    prior: Vec<ConversationEntry>,
    pending_input: Option<ConversationEntry>,
    turns: Vec<TurnOutput>,
    transcript: Vec<TranscriptItem>,
    final_text: String,
    decode_errors: Vec<DecodeIssue>,
    state: TurnState,
}

impl Run {
    fn new(prompt_id: PromptId, prior: Vec<ConversationEntry>, input: &str) -> Self {
        Self {
            prompt_id,
            prior,
            pending_input: Some(ConversationEntry::user(input)),
            turns: Vec::new(),
            transcript: Vec::new(),
            final_text: String::new(),
            decode_errors: Vec::new(),
            state: TurnState::Idle,
        }
    }

    fn advance(&mut self, signal: Signal) {
        match transition(self.state, signal) {
            Ok(next) => self.state = next,
            Err(e) => error!(prompt_id = %self.prompt_id, error = %e, "Invocation lifecycle violated"),
        }
    }

    fn open_turn(&mut self) {
        let turn = self.pending_input.take().map(TurnOutput::opening).unwrap_or_default();
        self.turns.push(turn);
    }

    fn current_turn(&mut self) -> Option<&mut TurnOutput> {
        self.turns.last_mut()
    }

    /// The input is part of history even if no turn was opened.
    fn history(&self) -> Vec<ConversationEntry> {
        let mut history = history::assemble(&self.prior, &self.turns);
        history.extend(self.pending_input.iter().cloned());
        history
    }

    fn record(&mut self, item: TranscriptItem, emitter: &mut Emitter<'_>) {
        self.transcript.push(item.clone());
        emitter.emit(StreamEvent::Transcript { item });
    }

    /// Record the current turn's text as an assistant item.
    fn close_stream(&mut self, emitter: &mut Emitter<'_>) {
        let text = self
            .current_turn()
            .map(|t| t.assistant_text.clone())
            .unwrap_or_default();
        if !text.is_empty() {
            self.record(TranscriptItem::Assistant { content: text }, emitter);
        }
    }

    fn absorb(&mut self, turn: u32, item: DecodedItem, queue: &mut Vec<ToolCallDescriptor>, emitter: &mut Emitter<'_>) {
        match item {
            DecodedItem::ContentDelta(text) => {
                self.final_text.push_str(&text);
                if let Some(current) = self.current_turn() {
                    current.assistant_text.push_str(&text);
                }
                emitter.emit(StreamEvent::Content { text });
            }
            DecodedItem::ToolCall(mut call) => {
                if call.id.is_none() {
                    call.id = Some(queue.len().to_string());
                }
                debug!(prompt_id = %self.prompt_id, turn, tool = %call.name, call_id = ?call.id, "Tool call queued");
                queue.push(call);
            }
            DecodedItem::DecodeError { kind, partial } => {
                warn!(
                    prompt_id = %self.prompt_id,
                    turn,
                    tool = %partial.name,
                    kind = %kind,
                    "Dropping tool call that could not be decoded"
                );
                emitter.emit(StreamEvent::DecodeError {
                    turn,
                    kind: kind.as_str().to_string(),
                    name: partial.name.clone(),
                });
                self.decode_errors.push(DecodeIssue {
                    turn,
                    kind,
                    call: partial,
                });
            }
        }
    }

    fn finish(self, status: InvocationStatus, history: Vec<ConversationEntry>) -> InvocationOutput {
        InvocationOutput {
            prompt_id: self.prompt_id,
            status,
            final_text: self.final_text,
            transcript: self.transcript,
            history,
            turns: self.turns.len() as u32,
            decode_errors: self.decode_errors,
        }
    }
}

/// Drives model turns and tool execution for invocations.
///
/// One orchestrator can serve many invocations concurrently; all
/// per-invocation state lives in the `run` call.
pub struct TurnOrchestrator {
    source: Arc<dyn ModelStreamSource>,
    executor: Arc<dyn ToolExecutor>,
    permissions: Option<Arc<dyn PermissionProvider>>,
    approval_cell: Option<Arc<ApprovalCell>>,
    default_approval: ApprovalMode,
    max_turns: u32,
}

impl TurnOrchestrator {
    pub fn new(source: Arc<dyn ModelStreamSource>, executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            source,
            executor,
            permissions: None,
            approval_cell: None,
            default_approval: ApprovalMode::Confirm,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    /// Gate consulted for every call when the effective mode is `Confirm`.
    pub fn with_permission_provider(mut self, provider: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = Some(provider);
        self
    }

    /// Share the host's approval setting. Invocations without their own mode
    /// read it; invocations with one override it for their duration.
    pub fn with_approval_cell(mut self, cell: Arc<ApprovalCell>) -> Self {
        self.approval_cell = Some(cell);
        self
    }

    pub fn with_default_approval(mut self, mode: ApprovalMode) -> Self {
        self.default_approval = mode;
        self
    }

    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = max.max(1);
        self
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Run an invocation to completion, buffering everything.
    pub async fn run(&self, invocation: SessionInvocation, input: &str) -> Result<InvocationOutput, InvocationError> {
        self.drive(invocation, input, None).await
    }

    /// Run an invocation, emitting events to `sink` as they happen.
    ///
    /// The sink sees content deltas and transcript items live, then the
    /// history, then exactly one `done` or `error`.
    pub async fn run_streaming(
        &self,
        invocation: SessionInvocation,
        input: &str,
        sink: &mut dyn EventSink,
    ) -> Result<InvocationOutput, InvocationError> {
        self.drive(invocation, input, Some(sink)).await
    }

    async fn drive(
        &self,
        invocation: SessionInvocation,
        input: &str,
        sink: Option<&mut dyn EventSink>,
    ) -> Result<InvocationOutput, InvocationError> {
        let SessionInvocation {
            prompt_id,
            cancellation,
            prior_history,
            approval,
        } = invocation;
        let mut emitter = Emitter::new(sink);

        // Held until this function returns, on every path.
        let _override = match (approval, &self.approval_cell) {
            (Some(mode), Some(cell)) => Some(cell.scoped_override(mode).await),
            _ => None,
        };
        let approval = approval
            .or_else(|| self.approval_cell.as_ref().map(|cell| cell.get()))
            .unwrap_or(self.default_approval);

        info!(
            prompt_id = %prompt_id,
            source = self.source.name(),
            ?approval,
            max_turns = self.max_turns,
            prior_entries = prior_history.len(),
            "Starting invocation"
        );

        let mut run = Run::new(prompt_id, prior_history, input);
        let outcome = self.run_turns(&mut run, &cancellation, approval, &mut emitter).await;

        let history = run.history();
        emitter.emit(StreamEvent::History {
            history: history.clone(),
        });

        match outcome {
            Ok(status) => {
                info!(
                    prompt_id = %run.prompt_id,
                    ?status,
                    turns = run.turns.len(),
                    tools = run.turns.iter().map(|t| t.tool_results.len()).sum::<usize>(),
                    "Invocation finished"
                );
                emitter.emit(StreamEvent::Done {
                    prompt_id: run.prompt_id.clone(),
                });
                Ok(run.finish(status, history))
            }
            Err(source) => {
                warn!(prompt_id = %run.prompt_id, error = %source, "Invocation failed");
                emitter.emit(StreamEvent::Error {
                    message: source.to_string(),
                });
                Err(InvocationError {
                    source,
                    partial: Box::new(run.finish(InvocationStatus::Failed, history)),
                })
            }
        }
    }

    async fn run_turns(
        &self,
        run: &mut Run,
        cancel: &CancellationToken,
        approval: ApprovalMode,
        emitter: &mut Emitter<'_>,
    ) -> Result<InvocationStatus, ModelError> {
        run.advance(Signal::Invoke);
        let tools = self.executor.definitions();

        while let TurnState::Streaming { turn } = run.state {
            if turn > self.max_turns {
                warn!(prompt_id = %run.prompt_id, max_turns = self.max_turns, "Turn limit reached, stopping");
                run.advance(Signal::TurnLimitReached);
                break;
            }
            if cancel.is_cancelled() {
                info!(prompt_id = %run.prompt_id, turn, "Cancelled before opening turn");
                run.advance(Signal::Cancel);
                break;
            }

            run.open_turn();
            match self.stream_turn(run, turn, &tools, cancel, emitter).await {
                Ok(StreamEnd::Finished(queue)) => {
                    run.advance(Signal::StreamEnded { queued: queue.len() });
                    if !queue.is_empty() {
                        self.execute_queue(run, turn, queue, cancel, approval, emitter).await;
                    }
                }
                Ok(StreamEnd::Cancelled) => {
                    info!(prompt_id = %run.prompt_id, turn, "Cancelled while streaming");
                    run.advance(Signal::Cancel);
                }
                Err(e) => {
                    run.advance(Signal::Fail);
                    return Err(e);
                }
            }
        }

        Ok(match run.state {
            TurnState::Cancelled => InvocationStatus::Cancelled,
            _ => InvocationStatus::Completed,
        })
    }

    /// Consume one model stream. Content is forwarded as it arrives; calls
    /// are queued in discovery order.
    async fn stream_turn(
        &self,
        run: &mut Run,
        turn: u32,
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
        emitter: &mut Emitter<'_>,
    ) -> Result<StreamEnd, ModelError> {
        let request = TurnRequest {
            prompt_id: run.prompt_id.clone(),
            turn,
            history: run.history(),
            tools: tools.to_vec(),
        };
        debug!(prompt_id = %run.prompt_id, turn, entries = request.history.len(), "Opening model stream");

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            opened = self.source.open(request) => opened?,
        };

        let mut decoder = Decoder::new();
        let mut queue = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                event = stream.next() => Some(event),
            };

            match next {
                None => {
                    if !queue.is_empty() {
                        debug!(prompt_id = %run.prompt_id, turn, discarded = queue.len(), "Dropping unstarted tool calls");
                    }
                    run.close_stream(emitter);
                    return Ok(StreamEnd::Cancelled);
                }
                Some(Some(Ok(event))) => {
                    for item in decoder.decode(event) {
                        run.absorb(turn, item, &mut queue, emitter);
                    }
                }
                Some(Some(Err(e))) => {
                    run.close_stream(emitter);
                    return Err(e);
                }
                Some(None) => break,
            }
        }

        for item in decoder.flush() {
            run.absorb(turn, item, &mut queue, emitter);
        }
        run.close_stream(emitter);
        Ok(StreamEnd::Finished(queue))
    }

    /// Run queued calls sequentially, in order.
    async fn execute_queue(
        &self,
        run: &mut Run,
        turn: u32,
        queue: Vec<ToolCallDescriptor>,
        cancel: &CancellationToken,
        approval: ApprovalMode,
        emitter: &mut Emitter<'_>,
    ) {
        let total = queue.len();
        for (index, call) in queue.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!(prompt_id = %run.prompt_id, turn, skipped = total - index, "Cancelled between tool calls");
                run.advance(Signal::Cancel);
                return;
            }

            run.advance(Signal::ToolStarted);
            run.record(TranscriptItem::tool_call(&call), emitter);

            let started = Instant::now();
            let outcome = self.execute_call(&call, approval, cancel).await;
            let result = ToolResult::from_outcome(&call, outcome);

            info!(
                prompt_id = %run.prompt_id,
                turn,
                tool = %call.name,
                call_id = %result.call_id,
                ok = result.ok,
                duration_ms = started.elapsed().as_millis() as u64,
                "Tool finished"
            );

            run.record(TranscriptItem::tool_result(&result), emitter);
            if let Some(current) = run.current_turn() {
                current.tool_results.push(result);
            }
            run.advance(Signal::ToolFinished);
        }
    }

    /// Apply the approval policy, then hand the call to the executor.
    async fn execute_call(
        &self,
        call: &ToolCallDescriptor,
        approval: ApprovalMode,
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        if approval == ApprovalMode::Confirm {
            let decision = match &self.permissions {
                Some(provider) => provider.check(call).await,
                None => PermissionDecision::Deny {
                    reason: "confirmation required but no permission provider is configured".into(),
                },
            };
            if let PermissionDecision::Deny { reason } = decision {
                warn!(tool = %call.name, call_id = ?call.id, %reason, "Tool call denied");
                return ToolOutcome::failed(
                    ToolError::PermissionDenied {
                        tool_name: call.name.clone(),
                        reason,
                    }
                    .to_string(),
                );
            }
            // The gate may have waited on a person; the caller can cancel meanwhile.
            if cancel.is_cancelled() {
                info!(tool = %call.name, call_id = ?call.id, "Cancelled while awaiting approval");
                return ToolOutcome::failed(ToolError::Cancelled(call.name.clone()).to_string());
            }
        }

        self.executor.execute(call, cancel).await
    }
}

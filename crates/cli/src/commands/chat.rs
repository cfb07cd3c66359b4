//! `weft chat`: Interactive or single-message chat mode.
//!
//! Content is printed as it streams. Tool calls are shown inline and, in
//! confirm mode, approved one by one at the prompt. Ctrl+C cancels the
//! running prompt; at the input prompt it exits.

use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use weft_agent::{ApprovalCell, EventSink, InvocationStatus, SessionInvocation, StreamEvent, TranscriptItem, TurnOrchestrator};
use weft_config::AppConfig;
use weft_core::{ApprovalMode, ConversationEntry, PermissionDecision, PermissionProvider, ToolCallDescriptor};
use weft_providers::OpenAiCompatSource;

/// Line reader shared by the REPL and the approval prompt.
type SharedLines<R> = Arc<Mutex<Lines<R>>>;

pub async fn run(message: Option<String>, auto_approve: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    let source = OpenAiCompatSource::from_config(&config.model)?;
    let tools = weft_tools::default_registry(&config.tools.allowed_roots);
    let tool_names = tools.names().join(", ");

    let lines: SharedLines<_> = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));
    let initial = if auto_approve {
        ApprovalMode::AutoApprove
    } else {
        config.agent.approval_mode
    };
    let approval = ApprovalCell::new(initial);

    let orchestrator = TurnOrchestrator::new(Arc::new(source), Arc::new(tools))
        .with_permission_provider(Arc::new(PromptPermission::new(lines.clone())))
        .with_approval_cell(approval.clone())
        .with_max_turns(config.agent.max_turns);

    if let Some(msg) = message {
        // Single message mode
        run_prompt(&orchestrator, Vec::new(), &msg).await;
        return Ok(());
    }

    // Interactive mode
    println!();
    println!("  Weft — Interactive Mode");
    println!();
    println!("  Model:     {} at {}", config.model.model, config.model.api_url);
    println!("  Tools:     {tool_names}");
    println!("  Approval:  {}", mode_label(approval.get()));
    println!();
    println!("  Commands:  /reset, /approve auto|confirm, exit");
    println!();

    let mut history: Vec<ConversationEntry> = Vec::new();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = {
            let mut input = lines.lock().await;
            tokio::select! {
                line = input.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            }
        };
        let Some(line) = line else { break };
        let line = line.trim();

        match parse_command(line) {
            ReplCommand::Empty => continue,
            ReplCommand::Exit => break,
            ReplCommand::Reset => {
                history.clear();
                println!("  History cleared.");
            }
            ReplCommand::Approve(Some(mode)) => {
                approval.set(mode);
                println!("  Approval: {}", mode_label(mode));
            }
            ReplCommand::Approve(None) => println!("  Usage: /approve auto|confirm"),
            ReplCommand::Prompt(text) => {
                println!();
                history = run_prompt(&orchestrator, std::mem::take(&mut history), text).await;
                println!();
            }
        }
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}

/// Run one prompt against `history` and return the history to carry forward.
async fn run_prompt(orchestrator: &TurnOrchestrator, history: Vec<ConversationEntry>, input: &str) -> Vec<ConversationEntry> {
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let invocation = SessionInvocation::new().with_history(history).with_cancellation(cancel);
    let mut sink = ConsoleSink::new(std::io::stdout());
    let result = orchestrator.run_streaming(invocation, input, &mut sink).await;
    watcher.abort();

    match result {
        Ok(output) => {
            if output.status == InvocationStatus::Cancelled {
                eprintln!("  [cancelled]");
            }
            output.history
        }
        Err(err) => err.partial.history,
    }
}

#[derive(Debug, PartialEq)]
enum ReplCommand<'a> {
    Empty,
    Exit,
    Reset,
    Approve(Option<ApprovalMode>),
    Prompt(&'a str),
}

fn parse_command(line: &str) -> ReplCommand<'_> {
    match line {
        "" => ReplCommand::Empty,
        "exit" | "quit" => ReplCommand::Exit,
        "/reset" => ReplCommand::Reset,
        _ => match line.strip_prefix("/approve") {
            Some(arg) => ReplCommand::Approve(match arg.trim() {
                "auto" | "auto_approve" => Some(ApprovalMode::AutoApprove),
                "confirm" => Some(ApprovalMode::Confirm),
                _ => None,
            }),
            None => ReplCommand::Prompt(line),
        },
    }
}

fn mode_label(mode: ApprovalMode) -> &'static str {
    match mode {
        ApprovalMode::AutoApprove => "auto",
        ApprovalMode::Confirm => "confirm",
    }
}

/// Prints orchestrator events to a terminal.
struct ConsoleSink<W: Write + Send> {
    out: W,
    mid_line: bool,
}

impl<W: Write + Send> ConsoleSink<W> {
    fn new(out: W) -> Self {
        Self { out, mid_line: false }
    }

    fn end_line(&mut self) {
        if self.mid_line {
            let _ = writeln!(self.out);
            self.mid_line = false;
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> EventSink for ConsoleSink<W> {
    fn emit(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Content { text } => {
                let _ = write!(self.out, "{text}");
                self.mid_line = !text.ends_with('\n');
            }
            StreamEvent::Transcript { item } => match item {
                // Already printed as it streamed.
                TranscriptItem::Assistant { .. } => {}
                TranscriptItem::ToolCall { name, arguments, .. } => {
                    self.end_line();
                    let _ = writeln!(self.out, "  [tool] {name} {arguments}");
                }
                TranscriptItem::ToolResult { name, ok: true, .. } => {
                    let _ = writeln!(self.out, "  [ok] {name}");
                }
                TranscriptItem::ToolResult { name, error, .. } => {
                    let _ = writeln!(self.out, "  [failed] {name}: {}", error.unwrap_or_default());
                }
            },
            StreamEvent::DecodeError { kind, name, .. } => {
                self.end_line();
                let _ = writeln!(self.out, "  [skipped] {name}: {kind}");
            }
            StreamEvent::History { .. } => {}
            StreamEvent::Done { .. } => self.end_line(),
            StreamEvent::Error { message } => {
                self.end_line();
                let _ = writeln!(self.out, "  [error] {message}");
            }
        }
        let _ = self.out.flush();
    }
}

/// Asks at the terminal before each tool call.
struct PromptPermission<R> {
    lines: SharedLines<R>,
}

impl<R> PromptPermission<R> {
    fn new(lines: SharedLines<R>) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send + 'static> PermissionProvider for PromptPermission<R> {
    async fn check(&self, call: &ToolCallDescriptor) -> PermissionDecision {
        eprint!("  Allow {} {}? [y/N] ", call.name, call.arguments());
        let _ = std::io::stderr().flush();

        let answer = self.lines.lock().await.next_line().await;
        match answer {
            Ok(Some(line)) if matches!(line.trim().to_lowercase().as_str(), "y" | "yes") => PermissionDecision::Allow,
            _ => PermissionDecision::Deny {
                reason: "declined at the prompt".into(),
            },
        }
    }
}

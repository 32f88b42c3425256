//! Plain-text terminal front end: event rendering, confirmation prompts and
//! the input queue.
//!
//! Input is read by one background task into a channel. The main loop and
//! the [`StdinConfirmer`] take turns draining it; they never compete because
//! a confirmation only happens while the main loop is awaiting a turn.

use std::io::Write;
use std::sync::Arc;

use futures::future::BoxFuture;
use helm_rs::agent::{
    CancelHandle, Confirmation, ConfirmationRequest, Confirmer, EngineEvent, EventHandler,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::commands::parse_confirmation;

/// Max characters of tool output echoed to the terminal.
const RESULT_PREVIEW_CHARS: usize = 300;

/// Lines of user input shared between the main loop and the confirmer.
#[derive(Clone)]
pub struct InputQueue {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

impl InputQueue {
    pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// The next line, or `None` once input is closed.
    pub async fn next_line(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }
}

/// Read stdin line by line. `/cancel` is acted on immediately, even while a
/// turn is running; every other line is queued.
pub fn spawn_input_reader(cancel: CancelHandle) -> InputQueue {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim() == "/cancel" {
                cancel.cancel();
                continue;
            }
            if tx.send(line).is_err() {
                break;
            }
        }
        debug!("Input closed");
    });
    InputQueue::new(rx)
}

// ── Rendering ──────────────────────────────────────────────────────

fn preview(text: &str, max: usize) -> String {
    let mut out: String = text.chars().take(max).collect();
    if text.chars().count() > max {
        out.push_str("...");
    }
    out
}

/// Terminal text for an event, if it is shown at all.
pub fn render(event: &EngineEvent<'_>) -> Option<String> {
    match event {
        EngineEvent::Text(text) => Some(format!("\n{text}\n")),
        EngineEvent::ToolExecuting { name, arguments } => {
            Some(format!("  > {name} {}", preview(arguments, 120)))
        }
        EngineEvent::ToolResult { name, result, .. } => {
            if result.simulated {
                return None;
            }
            let first = result.output.lines().next().unwrap_or("");
            Some(match result.failure {
                Some(kind) => format!("  x {name} [{kind}]: {}", preview(first, RESULT_PREVIEW_CHARS)),
                None => format!(
                    "  = {name}: {} line(s){}",
                    result.output.lines().count(),
                    if result.truncated_from.is_some() { ", truncated" } else { "" }
                ),
            })
        }
        EngineEvent::PlanPreview { name, description } => {
            Some(format!("  [plan] {name} would {description}"))
        }
        EngineEvent::ConfirmationRequested {
            name,
            reason,
            preview,
        } => Some(format!("\n  ! {name} needs confirmation ({reason})\n{preview}")),
        EngineEvent::Compaction(c) => Some(format!(
            "  (context compacted: checkpoint #{}, ~{} -> ~{} tokens)",
            c.number, c.tokens_before, c.tokens_after
        )),
        EngineEvent::CompactionFailed { error } => {
            Some(format!("  (compaction failed, will retry: {error})"))
        }
        EngineEvent::ServerWarning(message) => Some(format!("  warning: {message}")),
        EngineEvent::ModeChanged { from, to } => Some(format!("  mode: {from} -> {to}")),
        EngineEvent::AutoIteration {
            iteration,
            max_iterations,
        } => Some(format!("  [auto {iteration}/{max_iterations}]")),
        EngineEvent::Cancelled => Some("  (cancelled)".to_string()),
        EngineEvent::TurnFailed { error } => Some(format!("  error: {error}")),
        EngineEvent::RoundLimitReached { max_rounds } => {
            Some(format!("  (stopped after {max_rounds} rounds)"))
        }
        EngineEvent::TurnStarted { .. }
        | EngineEvent::ModelRequest { .. }
        | EngineEvent::ToolCallsReceived { .. }
        | EngineEvent::TokenUsage { .. }
        | EngineEvent::Finished { .. } => None,
    }
}

/// Prints rendered events to stdout.
pub struct ConsolePrinter;

impl EventHandler for ConsolePrinter {
    fn on_event(&self, event: &EngineEvent<'_>) {
        if let Some(text) = render(event) {
            println!("{text}");
        }
    }
}

// ── Confirmation ───────────────────────────────────────────────────

/// Asks on the terminal and reads the answer from the input queue.
pub struct StdinConfirmer {
    input: InputQueue,
}

impl StdinConfirmer {
    pub fn new(input: InputQueue) -> Self {
        Self { input }
    }
}

impl Confirmer for StdinConfirmer {
    fn confirm<'a>(&'a self, request: ConfirmationRequest<'a>) -> BoxFuture<'a, Confirmation> {
        Box::pin(async move {
            loop {
                print!("  allow {}? [y/n, or n <reason>] ", request.tool);
                let _ = std::io::stdout().flush();
                let Some(line) = self.input.next_line().await else {
                    return Confirmation::Denied(None);
                };
                match parse_confirmation(&line) {
                    Some(Ok(())) => return Confirmation::Approved,
                    Some(Err(reason)) => return Confirmation::Denied(reason),
                    None => println!("  please answer y or n"),
                }
            }
        })
    }
}

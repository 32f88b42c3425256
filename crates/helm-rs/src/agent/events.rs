//! Engine events and turn reports.
//!
//! The [`ModeController`](super::controller::ModeController) reports
//! progress through [`EngineEvent`]s. Handlers are synchronous and must not
//! block: the terminal collaborator renders from them, the
//! [`LoggingHandler`] turns them into `tracing` lines.
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests, headless runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures |
//! | [`CompositeEventHandler`] | Several handlers in order |

use tracing::{debug, info, trace, warn};

use super::mode::Mode;
use crate::context::Compaction;
use crate::tools::core::ToolResult;

// ── Events ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum EngineEvent<'a> {
    /// A submitted request starts a new turn.
    TurnStarted { mode: Mode, input: &'a str },
    /// An outbound prompt is about to be sent.
    ModelRequest {
        round: u32,
        estimated_tokens: usize,
        capacity: usize,
    },
    /// Assistant text.
    Text(&'a str),
    ToolCallsReceived { round: u32, count: usize },
    /// A call is waiting on the user.
    ConfirmationRequested {
        name: &'a str,
        reason: &'a str,
        preview: &'a str,
    },
    ToolExecuting { name: &'a str, arguments: &'a str },
    ToolResult {
        name: &'a str,
        call_id: &'a str,
        result: &'a ToolResult,
    },
    /// PLAN mode described a call instead of running it.
    PlanPreview { name: &'a str, description: &'a str },
    Compaction(&'a Compaction),
    CompactionFailed { error: &'a str },
    /// A tool server was skipped or a discovered tool rejected.
    ServerWarning(&'a str),
    ModeChanged { from: Mode, to: Mode },
    AutoIteration { iteration: u32, max_iterations: u32 },
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// The user interrupted the turn.
    Cancelled,
    /// The turn failed (transport or auth).
    TurnFailed { error: &'a str },
    RoundLimitReached { max_rounds: u32 },
    Finished { rounds: u32 },
}

pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &EngineEvent<'_>) {
        let _ = event;
    }
}

pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let EngineEvent::Text(text) = event {
///         println!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&EngineEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&EngineEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&EngineEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler, in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(interactive, ConsolePrinter);
/// ```
#[derive(Default)]
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &EngineEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &EngineEvent<'_>) {
        match event {
            EngineEvent::TurnStarted { mode, input } => {
                let preview: String = input.chars().take(120).collect();
                info!("[{mode}] Turn started: {preview}");
            }
            EngineEvent::ModelRequest {
                round,
                estimated_tokens,
                capacity,
            } => {
                debug!("Model request (round {round}): ~{estimated_tokens}/{capacity} tokens");
            }
            EngineEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "LLM text: {preview}{}",
                    if text.len() > 200 { "..." } else { "" }
                );
            }
            EngineEvent::ToolCallsReceived { round, count } => {
                debug!("{count} tool call(s) in round {round}");
            }
            EngineEvent::ConfirmationRequested { name, reason, .. } => {
                info!("Confirmation requested for {name}: {reason}");
            }
            EngineEvent::ToolExecuting { name, .. } => {
                debug!("Executing tool: {name}");
            }
            EngineEvent::ToolResult { name, result, .. } => match result.failure {
                Some(kind) => debug!("Tool {name} failed [{kind}]"),
                None => debug!("Tool {name} result: {} bytes", result.output.len()),
            },
            EngineEvent::PlanPreview { name, description } => {
                trace!("Plan preview for {name}: {description}");
            }
            EngineEvent::Compaction(c) => {
                info!(
                    "Context compaction #{} completed: {} turn(s), ~{} -> ~{} tokens",
                    c.number, c.turns_compacted, c.tokens_before, c.tokens_after
                );
            }
            EngineEvent::CompactionFailed { error } => {
                warn!("Context compaction failed, will retry: {error}");
            }
            EngineEvent::ServerWarning(message) => warn!("{message}"),
            EngineEvent::ModeChanged { from, to } => info!("Mode: {from} -> {to}"),
            EngineEvent::AutoIteration {
                iteration,
                max_iterations,
            } => debug!("AUTO iteration {iteration}/{max_iterations}"),
            EngineEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => {
                debug!("Tokens: prompt={prompt_tokens}, completion={completion_tokens}");
            }
            EngineEvent::Cancelled => info!("Turn cancelled by the user"),
            EngineEvent::TurnFailed { error } => warn!("Turn failed: {error}"),
            EngineEvent::RoundLimitReached { max_rounds } => {
                info!("Turn hit round limit ({max_rounds})");
            }
            EngineEvent::Finished { rounds } => info!("Turn finished after {rounds} round(s)"),
        }
    }
}

// ── Turn report ────────────────────────────────────────────────────

/// Summary of one submitted turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnReport {
    /// Assistant text from every round, in order.
    pub text_output: Vec<String>,
    /// Model requests made.
    pub rounds: u32,
    /// Tool calls resolved (including failed, simulated and cancelled ones).
    pub tool_calls: usize,
    /// The model stopped on its own (text-only reply, or the AUTO marker).
    pub finished: bool,
    /// AUTO ended because the model emitted the termination marker.
    pub auto_completed: bool,
    /// The round or iteration bound stopped the turn.
    pub hit_limit: bool,
    pub cancelled: bool,
    /// Compactions performed during the turn.
    pub compactions: u32,
}

impl TurnReport {
    pub fn text(&self) -> String {
        self.text_output.join("\n\n")
    }
}

//! Convenience re-exports for common `helm-rs` types.
//!
//! ```ignore
//! use helm_rs::prelude::*;
//! ```
//!
//! Covers what a front end needs to drive a session: the HTTP client and
//! retry wrapper, [`ModeController`] with its config and command types,
//! event and confirmation seams, and the [`Tool`] trait for custom tools.
//! Lower-level pieces (the JSON-RPC connection, summarizer internals) stay
//! in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{ChatRequest, HttpChatClient, Message, ToolCall, ToolDef, json_schema_for};

// ── Model access ────────────────────────────────────────────────────
pub use crate::api::{ChatTransport, RetryConfig, RetryingTransport};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    AutoConfig, CancelHandle, Command, CompositeEventHandler, Confirmation, ConfirmationRequest,
    Confirmer, EngineConfig, EngineEvent, EventHandler, FnConfirmer, FnEventHandler,
    LoggingHandler, Mode, ModeController, NoopHandler, Outcome, SessionStore, SessionSummary,
    TurnReport,
};

// ── Context ─────────────────────────────────────────────────────────
pub use crate::context::{FileIndex, NoIndex, ProjectIndex, ProjectMemory, TokenBudget, Turn};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::spec::ToolSpec;
pub use crate::tools::{BuiltinConfig, Danger, Tool, ToolFuture, ToolResult, parse_tool_args};

// ── External servers ────────────────────────────────────────────────
pub use crate::external::{DiscoveryReport, ExternalToolClient};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{EngineError, TurnError};

//! Tool abstraction.
//!
//! Every tool, built-in or discovered from an external server, implements
//! [`Tool`]: a schema, a per-call danger classification, and an async
//! invocation. The [`ToolExecutor`](super::executor::ToolExecutor) drives the
//! same pipeline for all of them and never needs to know where a tool came
//! from.

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::ToolDef;
use crate::error::ToolExecutionError;

/// Maximum size (in bytes) for tool output before truncation.
pub const DEFAULT_MAX_RESULT_BYTES: usize = 30_000;

/// Default timeout for tool execution.
pub const DEFAULT_TOOL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Boxed future returned by [`Tool::execute`].
pub type ToolFuture<'a> = BoxFuture<'a, Result<String, ToolExecutionError>>;

// ── Classification ─────────────────────────────────────────────────

/// Where a tool came from.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
    Builtin,
    /// Discovered from the named external server.
    Server(String),
}

impl fmt::Display for ToolSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolSource::Builtin => write!(f, "builtin"),
            ToolSource::Server(name) => write!(f, "server '{name}'"),
        }
    }
}

/// Danger classification of one concrete call, computed by the executor
/// from the arguments. Never taken from model output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Danger {
    Safe,
    /// Must not run without an explicit user confirmation, in any mode.
    ConfirmRequired(String),
    /// Must not run at all.
    Forbidden(String),
}

impl Danger {
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Danger::ConfirmRequired(_))
    }
}

/// Static description of a registered tool.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub source: ToolSource,
    pub mutating: bool,
}

// ── Tool trait ─────────────────────────────────────────────────────

/// A tool the model can invoke via function-calling.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// impl Tool for Echo {
///     fn definition(&self) -> ToolDef {
///         ToolDef::new("echo", "Echo the input", json!({"type": "object"}))
///     }
///
///     fn execute<'a>(&'a self, args: &'a Value) -> ToolFuture<'a> {
///         Box::pin(async move { Ok(args.to_string()) })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition sent to the model.
    fn definition(&self) -> ToolDef;

    /// Run the tool. Arguments have already been validated against the
    /// definition's schema.
    fn execute<'a>(&'a self, args: &'a serde_json::Value) -> ToolFuture<'a>;

    fn name(&self) -> String {
        self.definition().function.name
    }

    fn source(&self) -> ToolSource {
        ToolSource::Builtin
    }

    /// Whether the tool changes files or processes.
    fn is_mutation(&self) -> bool {
        false
    }

    /// Whether this particular call changes anything. Tools whose effect
    /// depends on the arguments narrow [`is_mutation`](Tool::is_mutation).
    fn mutates(&self, _args: &serde_json::Value) -> bool {
        self.is_mutation()
    }

    /// Danger of a specific call.
    fn classify(&self, _args: &serde_json::Value) -> Danger {
        Danger::Safe
    }

    /// Describe what the call would do without doing it. Used for PLAN mode
    /// previews, so implementations must not have side effects.
    fn describe_effect<'a>(&'a self, args: &'a serde_json::Value) -> BoxFuture<'a, String> {
        let text = format!("call {}({args})", self.name());
        Box::pin(async move { text })
    }

    fn descriptor(&self) -> ToolDescriptor {
        let def = self.definition();
        ToolDescriptor {
            name: def.function.name,
            description: def.function.description,
            parameters: def.function.parameters,
            source: self.source(),
            mutating: self.is_mutation(),
        }
    }
}

// ── ToolResult ─────────────────────────────────────────────────────

/// Why a tool call did not succeed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTool,
    InvalidArguments,
    Forbidden,
    NotPermitted,
    Denied,
    ConfirmationRequired,
    ExecutionFailed,
    Timeout,
    OutsideProject,
    ServerUnavailable,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UnknownTool => "unknown_tool",
            FailureKind::InvalidArguments => "invalid_arguments",
            FailureKind::Forbidden => "forbidden",
            FailureKind::NotPermitted => "not_permitted",
            FailureKind::Denied => "denied",
            FailureKind::ConfirmationRequired => "confirmation_required",
            FailureKind::ExecutionFailed => "execution_failed",
            FailureKind::Timeout => "timeout",
            FailureKind::OutsideProject => "outside_project",
            FailureKind::ServerUnavailable => "server_unavailable",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ToolExecutionError> for FailureKind {
    fn from(err: &ToolExecutionError) -> Self {
        match err {
            ToolExecutionError::Timeout(_) => FailureKind::Timeout,
            ToolExecutionError::OutsideProject(_) => FailureKind::OutsideProject,
            ToolExecutionError::Forbidden(_) => FailureKind::Forbidden,
            ToolExecutionError::Server(e) if e.is_connection_failure() => {
                FailureKind::ServerUnavailable
            }
            _ => FailureKind::ExecutionFailed,
        }
    }
}

/// Outcome of one tool call, recorded in history and shown to the model.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Original output size in bytes when `output` was truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated_from: Option<usize>,
    /// PLAN mode preview: reported as success but nothing ran.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub simulated: bool,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            failure: None,
            truncated_from: None,
            simulated: false,
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            failure: Some(kind),
            truncated_from: None,
            simulated: false,
        }
    }

    pub fn simulated(description: impl Into<String>) -> Self {
        Self {
            simulated: true,
            ..Self::ok(description)
        }
    }

    pub fn cancelled() -> Self {
        Self::failed(FailureKind::Cancelled, "cancelled by the user before it ran")
    }

    pub fn from_error(err: &ToolExecutionError) -> Self {
        Self::failed(FailureKind::from(err), err.to_string())
    }

    /// Truncate `output` to `max` bytes, recording the original size.
    pub fn capped(mut self, max: usize) -> Self {
        let len = self.output.len();
        if len > max {
            self.output = truncate_result(std::mem::take(&mut self.output), max);
            self.truncated_from = Some(len);
        }
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure == Some(FailureKind::Cancelled)
    }

    /// The text fed back to the model as the tool message content.
    pub fn to_model_content(&self) -> String {
        match (self.success, self.failure) {
            (true, _) if self.simulated => format!(
                "[PLAN MODE] Not executed. If approved, this call would {}",
                self.output
            ),
            (true, _) => self.output.clone(),
            (false, Some(kind)) => format!("Error [{kind}]: {}", self.output),
            (false, None) => format!("Error: {}", self.output),
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against a JSON Schema.
///
/// Returns every violation as a `path: message` line so the model can fix
/// all of them at once. An invalid schema skips validation.
pub fn validate_tool_arguments(
    schema: &serde_json::Value,
    args: &serde_json::Value,
) -> Result<(), String> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };

    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path().to_string();
            let path = if path.is_empty() { "/".to_string() } else { path };
            format!("{path}: {e}")
        })
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

/// Deserialize validated arguments into a typed struct.
pub fn parse_tool_args<T: serde::de::DeserializeOwned>(
    args: &serde_json::Value,
) -> Result<T, ToolExecutionError> {
    serde_json::from_value(args.clone())
        .map_err(|e| ToolExecutionError::Failed(format!("invalid arguments: {e}")))
}

/// Log a tool call at info (truncated), debug (size) and trace (full).
pub fn log_tool_call(name: &str, arguments: &str) {
    let args_preview: String = arguments.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if arguments.chars().count() > 120 { "..." } else { "" }
    );
    debug!("[tool] {name} full args ({} bytes)", arguments.len());
    trace!("[tool] {name} arguments: {arguments}");
}

/// Truncate `s` to at most `max` bytes on a char boundary and append a
/// marker with the original size.
pub fn truncate_result(s: String, max: usize) -> String {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let head = s.get(..end).unwrap_or_default();
    format!("{head}...\n[truncated: {} bytes total]", s.len())
}

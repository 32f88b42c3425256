//! Error taxonomy.
//!
//! Transport-level failures are classified once, at the HTTP boundary, into
//! retryable and non-retryable kinds; the [`RetryingTransport`] only ever
//! consults [`TransportError::is_retryable`]. Tool-level failures never
//! abort a turn: the executor wraps them into a
//! [`ToolResult`](crate::tools::core::ToolResult) the model can read.
//!
//! [`RetryingTransport`]: crate::api::retry::RetryingTransport

use thiserror::Error;

// ── Transport ──────────────────────────────────────────────────────

/// A single failed model request, classified by retryability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited (HTTP {status}): {body}")]
    RateLimited { status: u16, body: String },
    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },
    #[error("authentication failed (HTTP {status}): {body}")]
    Auth { status: u16, body: String },
    #[error("invalid request (HTTP {status}): {body}")]
    InvalidRequest { status: u16, body: String },
    #[error("rejected by content policy: {0}")]
    ContentPolicy(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Classify a non-success HTTP status and its body.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Self::Auth { status, body },
            429 => Self::RateLimited { status, body },
            500..=599 => Self::Server { status, body },
            _ if looks_like_content_policy(&body) => Self::ContentPolicy(body),
            _ => Self::InvalidRequest { status, body },
        }
    }

    /// Network errors, rate limits and 5xx responses are worth another try.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

fn looks_like_content_policy(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("content_policy")
        || lower.contains("content policy")
        || lower.contains("content_filter")
        || lower.contains("moderation")
}

/// Returned when a request will not be retried any further, either because
/// the attempt budget ran out or because the failure is not retryable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("model request failed after {attempts} attempt(s): {last}")]
pub struct TerminalError {
    pub attempts: u32,
    #[source]
    pub last: TransportError,
}

/// Credentials were rejected. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("authentication failed (HTTP {status}): {message}")]
pub struct AuthError {
    pub status: u16,
    pub message: String,
}

// ── Tools ──────────────────────────────────────────────────────────

/// A tool call that could not be matched to a runnable invocation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolResolutionError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },
}

impl ToolResolutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidArguments { .. } => "invalid_arguments",
        }
    }
}

/// A tool ran (or tried to) and failed.
#[derive(Debug, Error)]
pub enum ToolExecutionError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("command failed ({status})\n{output}")]
    NonZeroExit { status: String, output: String },
    #[error("path '{0}' resolves outside the project root")]
    OutsideProject(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error(transparent)]
    Server(#[from] ExternalServerError),
    #[error("{0}")]
    Failed(String),
}

impl ToolExecutionError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

// ── External servers ───────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExternalServerError {
    #[error("failed to spawn '{server}': {reason}")]
    Spawn { server: String, reason: String },
    #[error("protocol error from '{server}': {reason}")]
    Protocol { server: String, reason: String },
    #[error("'{server}' returned error {code}: {message}")]
    Rpc {
        server: String,
        code: i64,
        message: String,
    },
    #[error("'{server}' did not answer '{method}' within {secs}s")]
    Timeout {
        server: String,
        method: String,
        secs: u64,
    },
    #[error("'{0}' closed its output stream")]
    Closed(String),
    #[error("server '{server}' is unavailable: {reason}")]
    Unavailable { server: String, reason: String },
    #[error("invalid tool-server manifest: {0}")]
    Manifest(String),
}

impl ExternalServerError {
    /// Whether the failure means the server process itself is no longer
    /// usable (as opposed to a single call returning an error).
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. }
                | Self::Protocol { .. }
                | Self::Timeout { .. }
                | Self::Closed(_)
                | Self::Unavailable { .. }
        )
    }
}

// ── Context ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompactionError {
    #[error("summarization request failed: {0}")]
    Transport(#[from] TerminalError),
    #[error("summarization returned an empty summary")]
    EmptySummary,
}

// ── Registry / sessions ────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool name '{name}' from {source_label} collides with an already registered tool")]
    NameCollision { name: String, source_label: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("session file is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no saved session with id '{0}'")]
    NotFound(String),
    #[error("'{0}' is not a valid session id")]
    InvalidId(String),
}

// ── Turn / engine ──────────────────────────────────────────────────

/// Failure that ends a turn early. Tool failures never surface here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transport(TerminalError),
}

impl From<TerminalError> for TurnError {
    fn from(err: TerminalError) -> Self {
        match err.last {
            TransportError::Auth { status, body } => TurnError::Auth(AuthError {
                status,
                message: body,
            }),
            _ => TurnError::Transport(err),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Turn(#[from] TurnError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("project memory file {path}: {source}")]
    Memory {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("setup failed: {0}")]
    Setup(String),
}

//! Configuration for the [`ModeController`](super::controller::ModeController).
//!
//! ```ignore
//! let config = EngineConfig::new("anthropic/claude-sonnet-4", "You are a coding assistant.")
//!     .with_project_root("/path/to/project")
//!     .with_context_capacity(128_000)
//!     .with_auto(AutoConfig::default().with_max_iterations(40));
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::mode::Mode;
use crate::api::retry::RetryConfig;
use crate::context::budget::DEFAULT_CHARS_PER_TOKEN;
use crate::context::manager::{DEFAULT_COMPACTION_THRESHOLD, DEFAULT_CONTEXT_CAPACITY};
use crate::context::summarizer::SummarizerConfig;
use crate::external::client::DEFAULT_SERVER_TIMEOUT;
use crate::tools::builtin::BuiltinConfig;
use crate::tools::core::{DEFAULT_MAX_RESULT_BYTES, DEFAULT_TOOL_TIMEOUT};

pub const DEFAULT_TERMINATION_MARKER: &str = "[TASK_COMPLETE]";

// ── AUTO ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AutoConfig {
    /// Model requests per AUTO run before control returns to the user.
    pub max_iterations: u32,
    /// Text that ends an AUTO run when it appears in assistant output.
    pub termination_marker: String,
    /// Sent when the model replies without tool calls and without the marker.
    pub continuation_prompt: String,
    /// Appended to the system prompt while AUTO runs.
    pub system_suffix: String,
}

impl AutoConfig {
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_termination_marker(mut self, marker: impl Into<String>) -> Self {
        self.termination_marker = marker.into();
        self
    }
}

impl Default for AutoConfig {
    fn default() -> Self {
        let marker = DEFAULT_TERMINATION_MARKER;
        Self {
            max_iterations: 25,
            termination_marker: marker.to_string(),
            continuation_prompt: format!(
                "Continue with the task. Use tools to make progress. If the task is fully \
                 done, reply with a short summary that ends with {marker}."
            ),
            system_suffix: format!(
                "You are running in AUTO mode without a user watching each step. Work through \
                 the task with tools until it is complete. Do not ask the user questions. When \
                 everything is done and verified, reply with a short summary that ends with \
                 {marker}."
            ),
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Everything the controller needs besides the transport.
///
/// Defaults suit an interactive session; use the `with_*` builders for the
/// common knobs and struct fields for the rest.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub project_root: PathBuf,
    pub initial_mode: Mode,
    /// Context window size in tokens.
    pub context_capacity: usize,
    /// Fraction of `context_capacity` at which compaction fires.
    pub compaction_threshold: f64,
    pub chars_per_token: f64,
    /// Model requests per turn outside AUTO.
    pub max_rounds: u32,
    pub auto: AutoConfig,
    pub retry: RetryConfig,
    pub tool_timeout: Duration,
    pub max_output_bytes: usize,
    pub builtin: BuiltinConfig,
    pub summarizer: SummarizerConfig,
    /// Per-request timeout for external tool servers. Kept below
    /// `tool_timeout` so a hung server is detected and marked unavailable.
    pub server_timeout: Duration,
    /// CODE mode asks before every mutating call, not only dangerous ones.
    pub confirm_mutations: bool,
}

impl EngineConfig {
    pub fn new(model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: system_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_project_root(mut self, root: impl AsRef<Path>) -> Self {
        self.project_root = root.as_ref().to_path_buf();
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.initial_mode = mode;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_context_capacity(mut self, capacity: usize) -> Self {
        self.context_capacity = capacity;
        self
    }

    pub fn with_compaction_threshold(mut self, threshold: f64) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds.max(1);
        self
    }

    pub fn with_auto(mut self, auto: AutoConfig) -> Self {
        self.auto = auto;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_confirm_mutations(mut self, confirm: bool) -> Self {
        self.confirm_mutations = confirm;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: crate::DEFAULT_MODEL.to_string(),
            system_prompt: String::new(),
            max_tokens: 8192,
            temperature: 0.2,
            project_root: PathBuf::from("."),
            initial_mode: Mode::Code,
            context_capacity: DEFAULT_CONTEXT_CAPACITY,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            max_rounds: 25,
            auto: AutoConfig::default(),
            retry: RetryConfig::default(),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            max_output_bytes: DEFAULT_MAX_RESULT_BYTES,
            builtin: BuiltinConfig::default(),
            summarizer: SummarizerConfig::default(),
            server_timeout: DEFAULT_SERVER_TIMEOUT,
            confirm_mutations: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::new("m", "p");
        assert_eq!(config.model, "m");
        assert_eq!(config.compaction_threshold, 0.90);
        assert_eq!(config.auto.max_iterations, 25);
        assert_eq!(config.auto.termination_marker, "[TASK_COMPLETE]");
        assert!(config.auto.system_suffix.contains("[TASK_COMPLETE]"));
        assert_eq!(config.retry.max_attempts(), 4);
        assert!(config.server_timeout < config.tool_timeout);
    }

    #[test]
    fn bounds_never_zero() {
        let config = EngineConfig::default()
            .with_max_rounds(0)
            .with_auto(AutoConfig::default().with_max_iterations(0));
        assert_eq!(config.max_rounds, 1);
        assert_eq!(config.auto.max_iterations, 1);
    }
}

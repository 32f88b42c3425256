//! Checkpoint summaries for context compaction.
//!
//! Each compaction folds every turn since the previous checkpoint, plus that
//! checkpoint's own summary, into a single replacement summary. The history
//! is never re-summarized from the start.

use tracing::debug;

use crate::api::retry::RetryingTransport;
use crate::error::CompactionError;
use crate::{ChatRequest, Message};

const SUMMARIZATION_PROMPT: &str = "\
You are compacting the history of a coding session so it can continue in a smaller context window.
Summarize the conversation below. Capture:
- Decisions made and the reasoning the user agreed to
- Open tasks: what the user asked for that is not finished yet, including the latest request
- File state: every file read, created or modified, with what changed
- Commands run and their notable results or failures

Rules:
- Only include facts stated in the messages. Do not infer.
- Preserve file paths, function names, commands and error messages verbatim.
- If there is an existing summary, merge the new information into it. The result replaces \
  the existing summary entirely, so it must stand on its own.";

/// Summarization settings.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Model override for summaries. `None` uses the session model.
    pub model: Option<String>,
    /// Maximum tokens for the summary response.
    pub max_summary_tokens: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_summary_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Summarizer {
    pub config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(config: SummarizerConfig) -> Self {
        Self { config }
    }

    /// Build the (system, user) pair for one summarization call.
    pub fn build_summarization_request(
        &self,
        span: &[Message],
        existing: Option<&str>,
    ) -> (String, String) {
        let mut content = String::new();

        if let Some(existing) = existing {
            content.push_str("=== EXISTING SUMMARY ===\n");
            content.push_str(existing);
            content.push_str("\n\n=== NEW MESSAGES TO SUMMARIZE ===\n");
        }

        for msg in span {
            let role = &msg.role;
            let text = msg.content.as_deref().unwrap_or("");
            content.push_str(&format!("[{role}]: {text}\n"));
            if let Some(ref calls) = msg.tool_calls {
                for call in calls {
                    content.push_str(&format!(
                        "  -> {}({})\n",
                        call.function.name, call.function.arguments
                    ));
                }
            }
            content.push('\n');
        }

        (SUMMARIZATION_PROMPT.to_string(), content)
    }

    pub fn summary_model<'a>(&'a self, main_model: &'a str) -> &'a str {
        self.config.model.as_deref().unwrap_or(main_model)
    }

    /// Ask the model for a merged summary of `span`.
    pub async fn summarize(
        &self,
        transport: &RetryingTransport,
        model: &str,
        span: &[Message],
        existing: Option<&str>,
    ) -> Result<String, CompactionError> {
        let (system, user) = self.build_summarization_request(span, existing);
        let request = ChatRequest {
            model: Some(self.summary_model(model).to_string()),
            messages: vec![Message::system(system), Message::user(user)],
            max_tokens: self.config.max_summary_tokens,
            ..Default::default()
        };
        debug!("Summarizing {} message(s)", span.len());
        let completion = transport.execute(&request).await?;
        match completion.content.map(|s| s.trim().to_string()) {
            Some(summary) if !summary.is_empty() => Ok(summary),
            _ => Err(CompactionError::EmptySummary),
        }
    }
}

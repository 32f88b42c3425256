//! Conversation turns: the unit of session history.

use serde::{Deserialize, Serialize};

use crate::tools::core::ToolResult;
use crate::{Message, MessageRole};

/// Whether a turn ran to completion or was cut short by the user.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    #[default]
    Complete,
    Cancelled,
}

impl TurnStatus {
    fn is_complete(&self) -> bool {
        *self == TurnStatus::Complete
    }
}

/// One entry of session history.
///
/// Tool turns carry the structured [`ToolResult`] alongside the wire message
/// so a resumed session keeps failure kinds and truncation markers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Turn {
    pub message: Message,
    /// Compaction checkpoint: a system turn whose content replaces every
    /// earlier turn in outbound prompts.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub checkpoint: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
    #[serde(default, skip_serializing_if = "TurnStatus::is_complete")]
    pub status: TurnStatus,
}

impl Turn {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            checkpoint: false,
            result: None,
            status: TurnStatus::Complete,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Message::user(text))
    }

    pub fn assistant(message: Message) -> Self {
        Self::new(message)
    }

    /// A tool turn answering `call_id`.
    pub fn tool(call_id: impl Into<String>, result: ToolResult) -> Self {
        let status = if result.is_cancelled() {
            TurnStatus::Cancelled
        } else {
            TurnStatus::Complete
        };
        Self {
            message: Message::tool_result(call_id, result.to_model_content()),
            checkpoint: false,
            result: Some(result),
            status,
        }
    }

    /// A compaction checkpoint carrying `summary`.
    pub fn checkpoint(number: u32, summary: &str) -> Self {
        Self {
            message: Message::system(format!(
                "[Checkpoint #{number}] Summary of the session so far:\n{summary}"
            )),
            checkpoint: true,
            result: None,
            status: TurnStatus::Complete,
        }
    }

    pub fn role(&self) -> &MessageRole {
        &self.message.role
    }

    pub fn content(&self) -> &str {
        self.message.content.as_deref().unwrap_or("")
    }

    /// The summary text of a checkpoint, without its header line.
    pub fn checkpoint_summary(&self) -> Option<&str> {
        if !self.checkpoint {
            return None;
        }
        let content = self.content();
        Some(content.split_once('\n').map_or(content, |(_, rest)| rest))
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == TurnStatus::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_summary_strips_header() {
        let turn = Turn::checkpoint(2, "Edited src/lib.rs.\nTests pending.");
        assert_eq!(turn.role(), &MessageRole::System);
        assert!(turn.content().starts_with("[Checkpoint #2]"));
        assert_eq!(
            turn.checkpoint_summary(),
            Some("Edited src/lib.rs.\nTests pending.")
        );
        assert_eq!(Turn::user("hi").checkpoint_summary(), None);
    }

    #[test]
    fn complete_status_is_omitted_from_json() {
        let json = serde_json::to_value(Turn::user("hi")).unwrap();
        assert!(json.get("status").is_none());
        assert!(json.get("checkpoint").is_none());

        let back: Turn = serde_json::from_value(json).unwrap();
        assert_eq!(back.status, TurnStatus::Complete);
    }
}

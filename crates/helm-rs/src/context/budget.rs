//! Token estimation.
//!
//! A character-ratio heuristic: no tokenizer, no state. Accurate enough to
//! decide when the context window is nearly full.

use crate::Message;

/// Default characters per token. Most tokenizers average 3-4 chars per
/// token on English text and code.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Estimates token cost of text and messages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBudget {
    chars_per_token: f64,
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl TokenBudget {
    /// Create an estimator with a custom ratio. Non-positive ratios fall back
    /// to the default.
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    /// Estimated tokens for `text`, rounded up.
    pub fn estimate_text(&self, text: &str) -> usize {
        self.estimate_chars(text.len())
    }

    pub fn estimate_chars(&self, chars: usize) -> usize {
        (chars as f64 / self.chars_per_token).ceil() as usize
    }

    /// Estimated tokens for one message, counting content and tool-call
    /// names and arguments.
    pub fn estimate_message(&self, message: &Message) -> usize {
        self.estimate_chars(message.text_len())
    }

    pub fn estimate_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.estimate_message(m)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;

    #[test]
    fn rounds_up() {
        let budget = TokenBudget::default();
        assert_eq!(budget.estimate_text(""), 0);
        assert_eq!(budget.estimate_text("a"), 1);
        assert_eq!(budget.estimate_text("abcdefg"), 2);
        assert_eq!(budget.estimate_text("abcdefgh"), 3);
    }

    #[test]
    fn invalid_ratio_falls_back() {
        assert_eq!(TokenBudget::new(0.0).chars_per_token(), DEFAULT_CHARS_PER_TOKEN);
        assert_eq!(TokenBudget::new(-2.0).chars_per_token(), DEFAULT_CHARS_PER_TOKEN);
        assert_eq!(TokenBudget::new(4.0).chars_per_token(), 4.0);
    }

    #[test]
    fn messages_include_tool_calls() {
        let budget = TokenBudget::new(1.0);
        let messages = vec![
            Message::user("hello"),
            Message::assistant(None, vec![ToolCall::new("c1", "ls", "{}")]),
        ];
        assert_eq!(budget.estimate_messages(&messages), 5 + 2 + 2);
    }
}

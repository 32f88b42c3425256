//! Session history, outbound prompt assembly and compaction.

use tracing::{debug, info, warn};

use super::budget::TokenBudget;
use super::memory::ProjectMemory;
use super::summarizer::Summarizer;
use super::turn::Turn;
use crate::Message;
use crate::api::retry::RetryingTransport;
use crate::error::CompactionError;

/// Default fraction of capacity at which compaction fires.
pub const DEFAULT_COMPACTION_THRESHOLD: f64 = 0.90;

/// Default context capacity in tokens.
pub const DEFAULT_CONTEXT_CAPACITY: usize = 200_000;

const CONTINUE_FROM_CHECKPOINT: &str =
    "Continue with the open tasks described in the checkpoint above.";

/// Outcome of a successful compaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Compaction {
    pub number: u32,
    pub turns_compacted: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// Owns the ordered turn history of one session.
///
/// The full history is retained for persistence. Outbound prompts contain
/// the system message (project memory, project index overview, then
/// instructions), the latest checkpoint, and every turn after it.
#[derive(Debug)]
pub struct ContextManager {
    turns: Vec<Turn>,
    system_prompt: String,
    memory: ProjectMemory,
    project_overview: Option<String>,
    budget: TokenBudget,
    capacity: usize,
    threshold: f64,
    summarizer: Summarizer,
    compactions: u32,
    /// Estimated tokens of the current outbound prompt.
    estimate: usize,
    /// Estimated tokens of everything ever appended. Never decreases.
    total_appended: usize,
}

impl ContextManager {
    pub fn new(system_prompt: impl Into<String>, memory: ProjectMemory) -> Self {
        let mut manager = Self {
            turns: Vec::new(),
            system_prompt: system_prompt.into(),
            memory,
            project_overview: None,
            budget: TokenBudget::default(),
            capacity: DEFAULT_CONTEXT_CAPACITY,
            threshold: DEFAULT_COMPACTION_THRESHOLD,
            summarizer: Summarizer::default(),
            compactions: 0,
            estimate: 0,
            total_appended: 0,
        };
        manager.recompute_estimate();
        manager
    }

    pub fn with_budget(mut self, budget: TokenBudget) -> Self {
        self.budget = budget;
        self.recompute_estimate();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = summarizer;
        self
    }

    // ── History ────────────────────────────────────────────────────

    pub fn push(&mut self, turn: Turn) {
        let tokens = self.budget.estimate_message(&turn.message);
        self.estimate += tokens;
        self.total_appended += tokens;
        if turn.checkpoint {
            self.compactions += 1;
            self.turns.push(turn);
            self.recompute_estimate();
        } else {
            self.turns.push(turn);
        }
    }

    /// Replace the whole history, e.g. when resuming a saved session. The
    /// latest persisted checkpoint takes effect immediately.
    pub fn replace_turns(&mut self, turns: Vec<Turn>) {
        self.compactions = turns.iter().filter(|t| t.checkpoint).count() as u32;
        self.total_appended = turns
            .iter()
            .map(|t| self.budget.estimate_message(&t.message))
            .sum();
        self.turns = turns;
        self.recompute_estimate();
    }

    pub fn clear(&mut self) {
        self.replace_turns(Vec::new());
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn turns_mut(&mut self) -> &mut [Turn] {
        &mut self.turns
    }

    /// Index of the most recent checkpoint turn.
    pub fn checkpoint_index(&self) -> Option<usize> {
        self.turns.iter().rposition(|t| t.checkpoint)
    }

    /// Turns after the latest checkpoint (or all turns if none).
    pub fn live_turns(&self) -> &[Turn] {
        match self.checkpoint_index() {
            Some(i) => &self.turns[i + 1..],
            None => &self.turns,
        }
    }

    // ── Memory & instructions ──────────────────────────────────────

    pub fn memory(&self) -> &ProjectMemory {
        &self.memory
    }

    /// Re-read the project memory file.
    pub fn reload_memory(&mut self) -> bool {
        let changed = self.memory.reload();
        if changed {
            self.recompute_estimate();
        }
        changed
    }

    pub fn set_memory(&mut self, memory: ProjectMemory) {
        self.memory = memory;
        self.recompute_estimate();
    }

    /// Replace the project index overview shown after the memory.
    pub fn set_project_overview(&mut self, overview: Option<String>) {
        self.project_overview = overview.filter(|o| !o.trim().is_empty());
        self.recompute_estimate();
    }

    pub fn project_overview(&self) -> Option<&str> {
        self.project_overview.as_deref()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn system_message(&self, extra: Option<&str>) -> Option<Message> {
        let mut text = String::new();
        if !self.memory.is_empty() {
            text.push_str("# Project memory\n\n");
            text.push_str(self.memory.text());
        }
        let parts = [
            self.project_overview.as_deref(),
            Some(self.system_prompt.as_str()),
            extra,
        ];
        for part in parts.into_iter().flatten() {
            if part.is_empty() {
                continue;
            }
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(part);
        }
        (!text.is_empty()).then(|| Message::system(text))
    }

    // ── Outbound ───────────────────────────────────────────────────

    /// Assemble the outbound prompt: memory and instructions, the latest
    /// checkpoint, then every later turn in order.
    pub fn outbound_messages(&self) -> Vec<Message> {
        self.outbound_messages_with(None)
    }

    /// [`outbound_messages`](Self::outbound_messages) with `instructions`
    /// appended to the system message for this request only.
    pub fn outbound_messages_with(&self, instructions: Option<&str>) -> Vec<Message> {
        let mut messages = Vec::new();
        messages.extend(self.system_message(instructions));

        let start = match self.checkpoint_index() {
            Some(i) => {
                messages.push(self.turns[i].message.clone());
                i + 1
            }
            None => 0,
        };
        messages.extend(self.turns[start..].iter().map(|t| t.message.clone()));

        if start > 0 && start == self.turns.len() {
            messages.push(Message::user(CONTINUE_FROM_CHECKPOINT));
        }
        messages
    }

    // ── Budget ─────────────────────────────────────────────────────

    fn recompute_estimate(&mut self) {
        let system = self
            .system_message(None)
            .map_or(0, |m| self.budget.estimate_message(&m));
        let checkpoint = self
            .checkpoint_index()
            .map_or(0, |i| self.budget.estimate_message(&self.turns[i].message));
        let live: usize = self
            .live_turns()
            .iter()
            .map(|t| self.budget.estimate_message(&t.message))
            .sum();
        self.estimate = system + checkpoint + live;
    }

    /// Estimated tokens of the current outbound prompt.
    pub fn estimated_tokens(&self) -> usize {
        self.estimate
    }

    /// Estimated tokens of every turn ever appended.
    pub fn total_appended_tokens(&self) -> usize {
        self.total_appended
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn compactions(&self) -> u32 {
        self.compactions
    }

    pub fn threshold_tokens(&self) -> usize {
        (self.capacity as f64 * self.threshold).ceil() as usize
    }

    /// Whether the estimate has reached the threshold and there is
    /// something left to compact.
    pub fn needs_compaction(&self) -> bool {
        self.estimate >= self.threshold_tokens() && !self.live_turns().is_empty()
    }

    // ── Compaction ─────────────────────────────────────────────────

    /// Compact if the threshold has been reached. Call only at a quiescent
    /// point, right before building the next outbound request.
    ///
    /// On failure the history is left untouched and the next call tries again.
    pub async fn maybe_compact(
        &mut self,
        transport: &RetryingTransport,
        model: &str,
    ) -> Result<Option<Compaction>, CompactionError> {
        if !self.needs_compaction() {
            return Ok(None);
        }
        self.compact(transport, model).await.map(Some)
    }

    /// Summarize every turn since the last checkpoint into a new checkpoint.
    pub async fn compact(
        &mut self,
        transport: &RetryingTransport,
        model: &str,
    ) -> Result<Compaction, CompactionError> {
        let tokens_before = self.estimate;
        let existing = self
            .checkpoint_index()
            .and_then(|i| self.turns[i].checkpoint_summary())
            .map(str::to_string);
        let span: Vec<Message> = self.live_turns().iter().map(|t| t.message.clone()).collect();
        let turns_compacted = span.len();

        info!(
            "Compacting {turns_compacted} turn(s) at ~{tokens_before} of {} tokens",
            self.capacity
        );

        let summary = match self
            .summarizer
            .summarize(transport, model, &span, existing.as_deref())
            .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!("Compaction skipped: {e}");
                return Err(e);
            }
        };

        let number = self.compactions + 1;
        self.push(Turn::checkpoint(number, &summary));

        let compaction = Compaction {
            number,
            turns_compacted,
            tokens_before,
            tokens_after: self.estimate,
        };
        debug!("Compaction complete: {compaction:?}");
        Ok(compaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::retry::RetryConfig;
    use crate::api::transport::scripted::ScriptedTransport;
    use crate::error::TransportError;
    use crate::{ChatCompletion, MessageRole};

    fn exact_manager(system_prompt: &str, memory: &str) -> ContextManager {
        ContextManager::new(system_prompt, ProjectMemory::from_text(memory))
            .with_budget(TokenBudget::new(1.0))
            .with_capacity(1000)
            .with_threshold(0.90)
    }

    fn transport(script: Vec<Result<ChatCompletion, TransportError>>) -> RetryingTransport {
        RetryingTransport::new(ScriptedTransport::new(script), RetryConfig::none())
    }

    #[test]
    fn outbound_order_is_memory_checkpoint_then_later_turns() {
        let mut ctx = exact_manager("Be terse.", "Project uses tabs.");
        ctx.push(Turn::user("old request"));
        ctx.push(Turn::checkpoint(1, "did things"));
        ctx.push(Turn::user("new request"));

        let out = ctx.outbound_messages();
        assert_eq!(out.len(), 3);
        let system = out[0].content.as_deref().unwrap();
        assert!(system.find("Project uses tabs.").unwrap() < system.find("Be terse.").unwrap());
        assert!(out[1].content.as_deref().unwrap().contains("did things"));
        assert_eq!(out[2].content.as_deref(), Some("new request"));
        assert!(out.iter().all(|m| m.content.as_deref() != Some("old request")));
    }

    #[test]
    fn project_overview_sits_between_memory_and_prompt() {
        let mut ctx = exact_manager("Be terse.", "Project uses tabs.");
        let before = ctx.estimated_tokens();
        ctx.set_project_overview(Some("# Project index\n\nsrc/lib.rs".into()));
        assert!(ctx.estimated_tokens() > before);

        let system = ctx.outbound_messages()[0].content.clone().unwrap();
        let memory = system.find("Project uses tabs.").unwrap();
        let index = system.find("src/lib.rs").unwrap();
        assert!(memory < index && index < system.find("Be terse.").unwrap());

        ctx.set_project_overview(Some("  ".into()));
        assert_eq!(ctx.project_overview(), None);
        assert_eq!(ctx.estimated_tokens(), before);
    }

    #[test]
    fn checkpoint_alone_gets_a_continuation_prompt() {
        let mut ctx = exact_manager("", "");
        ctx.push(Turn::user("request"));
        ctx.push(Turn::checkpoint(1, "summary"));
        let out = ctx.outbound_messages();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].role, MessageRole::User);
        assert_eq!(out[1].content.as_deref(), Some(CONTINUE_FROM_CHECKPOINT));
    }

    #[test]
    fn estimate_tracks_pushes() {
        let mut ctx = exact_manager("", "");
        assert_eq!(ctx.estimated_tokens(), 0);
        ctx.push(Turn::user("x".repeat(850)));
        assert_eq!(ctx.estimated_tokens(), 850);
        assert!(!ctx.needs_compaction());
        ctx.push(Turn::assistant(Message::assistant_text("y".repeat(60))));
        assert_eq!(ctx.estimated_tokens(), 910);
        assert!(ctx.needs_compaction());
    }

    #[tokio::test]
    async fn crossing_threshold_compacts_exactly_once() {
        let mut ctx = exact_manager("", "");
        ctx.push(Turn::user("x".repeat(850)));
        ctx.push(Turn::assistant(Message::assistant_text("y".repeat(60))));

        let scripted = ScriptedTransport::new(vec![Ok(ChatCompletion::text("short summary"))]);
        let requests = std::sync::Arc::new(scripted);
        let transport = RetryingTransport::new(std::sync::Arc::clone(&requests), RetryConfig::none());

        let first = ctx.maybe_compact(&transport, "m").await.unwrap();
        let compaction = first.expect("compaction should fire");
        assert_eq!(compaction.number, 1);
        assert_eq!(compaction.turns_compacted, 2);
        assert_eq!(compaction.tokens_before, 910);
        assert!(compaction.tokens_after < 100);

        let second = ctx.maybe_compact(&transport, "m").await.unwrap();
        assert!(second.is_none());
        assert_eq!(requests.requests().len(), 1);
        assert_eq!(ctx.compactions(), 1);

        // All prior non-checkpoint turns are replaced in outbound prompts but
        // kept in history.
        let out = ctx.outbound_messages();
        assert!(out[0].content.as_deref().unwrap().contains("short summary"));
        assert!(out.iter().all(|m| !m.content.as_deref().unwrap_or("").contains("xxxx")));
        assert_eq!(ctx.turns().len(), 3);
    }

    #[tokio::test]
    async fn second_compaction_merges_previous_summary() {
        let mut ctx = exact_manager("", "");
        ctx.push(Turn::checkpoint(1, "first summary"));
        ctx.push(Turn::user("z".repeat(950)));

        let scripted = std::sync::Arc::new(ScriptedTransport::new(vec![Ok(ChatCompletion::text(
            "merged",
        ))]));
        let transport = RetryingTransport::new(std::sync::Arc::clone(&scripted), RetryConfig::none());
        let compaction = ctx.maybe_compact(&transport, "m").await.unwrap().unwrap();
        assert_eq!(compaction.number, 2);
        assert_eq!(compaction.turns_compacted, 1);

        let sent = scripted.requests();
        let user = sent[0].messages[1].content.as_deref().unwrap();
        assert!(user.contains("=== EXISTING SUMMARY ===\nfirst summary"));
    }

    #[tokio::test]
    async fn failed_compaction_is_retried_next_time() {
        let mut ctx = exact_manager("", "");
        ctx.push(Turn::user("x".repeat(950)));

        let transport = transport(vec![
            Err(TransportError::from_status(400, "bad")),
            Ok(ChatCompletion::text("summary")),
        ]);

        assert!(ctx.maybe_compact(&transport, "m").await.is_err());
        assert_eq!(ctx.turns().len(), 1);
        assert!(ctx.needs_compaction());

        assert!(ctx.maybe_compact(&transport, "m").await.unwrap().is_some());
        assert!(!ctx.needs_compaction());
    }

    #[test]
    fn resume_reapplies_last_checkpoint() {
        let mut ctx = exact_manager("", "");
        ctx.replace_turns(vec![
            Turn::user("a"),
            Turn::checkpoint(1, "s1"),
            Turn::user("b"),
            Turn::checkpoint(2, "s2"),
            Turn::user("c"),
        ]);
        assert_eq!(ctx.compactions(), 2);
        assert_eq!(ctx.checkpoint_index(), Some(3));
        let out = ctx.outbound_messages();
        assert_eq!(out.len(), 2);
        assert!(out[0].content.as_deref().unwrap().contains("s2"));
        assert_eq!(out[1].content.as_deref(), Some("c"));
    }

    #[test]
    fn total_appended_never_decreases() {
        let mut ctx = exact_manager("", "");
        ctx.push(Turn::user("abc"));
        ctx.push(Turn::checkpoint(1, "s"));
        assert!(ctx.total_appended_tokens() >= 3);
        assert!(ctx.estimated_tokens() < ctx.total_appended_tokens());
    }
}

//! The session state machine: modes, the model/tool loop and commands.
//!
//! One submitted request becomes one turn. Each round of a turn goes
//! through the same suspension points, and cancellation is observed at
//! every one of them:
//!
//! 1. **awaiting-model**: compaction (if due) and the model request;
//! 2. **awaiting-confirmation**: the [`Confirmer`] for gated calls;
//! 3. **awaiting-tool**: the executor, one call at a time in call order.
//!
//! Outside AUTO a turn ends at the first text-only reply. AUTO keeps going
//! until the termination marker appears or the iteration bound is hit, then
//! returns to the mode it was entered from.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::command::{CancelHandle, Command, Outcome};
use super::config::EngineConfig;
use super::confirm::{AutoDeny, Confirmation, ConfirmationRequest, Confirmer};
use super::events::{EngineEvent, EventHandler, NoopHandler, TurnReport};
use super::mode::{Gate, Mode};
use super::session::{SessionRecord, SessionStore, derive_title, generate_session_id};
use crate::api::retry::RetryingTransport;
use crate::context::{
    ContextManager, NoIndex, ProjectIndex, ProjectMemory, Summarizer, TokenBudget, Turn,
    TurnStatus,
};
use crate::error::{EngineError, SessionError, TurnError};
use crate::external::{DiscoveryReport, ExternalToolClient};
use crate::tools::builtin::BuiltinConfig;
use crate::tools::core::{FailureKind, ToolResult};
use crate::tools::executor::{ResolvedCall, ToolExecutor};
use crate::tools::registry::ToolRegistry;
use crate::{ChatRequest, Message, ToolCall};

struct SessionState {
    id: String,
    created_at: DateTime<Utc>,
    mode: Mode,
    /// Where AUTO returns to.
    prior_mode: Mode,
}

impl SessionState {
    fn fresh(mode: Mode) -> Self {
        Self {
            id: generate_session_id(),
            created_at: Utc::now(),
            mode,
            prior_mode: if mode == Mode::Auto { Mode::Code } else { mode },
        }
    }
}

/// Drives one interactive session.
///
/// Borrows the transport and handlers; everything else (history, tool
/// registry, server connections) is owned for the session's lifetime.
///
/// ```ignore
/// let transport = RetryingTransport::new(HttpChatClient::new(key)?, RetryConfig::default());
/// let mut controller = ModeController::new(&transport, config)
///     .with_event_handler(&LoggingHandler)
///     .with_confirmer(&my_prompt);
/// controller.start().await;
/// let report = controller.submit("add a --verbose flag").await?;
/// ```
pub struct ModeController<'a> {
    transport: &'a RetryingTransport,
    config: EngineConfig,
    handler: &'a dyn EventHandler,
    confirmer: &'a dyn Confirmer,
    store: Option<SessionStore>,
    context: ContextManager,
    executor: ToolExecutor,
    external: ExternalToolClient,
    index: Box<dyn ProjectIndex>,
    cancel: CancelHandle,
    session: SessionState,
}

impl<'a> ModeController<'a> {
    pub fn new(transport: &'a RetryingTransport, config: EngineConfig) -> Self {
        let root = config.project_root.clone();
        let builtin = BuiltinConfig {
            max_output_bytes: config.max_output_bytes,
            ..config.builtin.clone()
        };
        let registry = ToolRegistry::new().with_builtin_tools(&root, &builtin);
        let executor = ToolExecutor::new(registry)
            .with_timeout(config.tool_timeout)
            .with_max_output_bytes(config.max_output_bytes);
        let context = build_context(&config);
        let external = ExternalToolClient::new(root.clone()).with_timeout(config.server_timeout);
        let session = SessionState::fresh(config.initial_mode);

        Self {
            transport,
            handler: &NoopHandler,
            confirmer: &AutoDeny,
            store: Some(SessionStore::for_project(&root)),
            context,
            executor,
            external,
            index: Box::new(NoIndex),
            cancel: CancelHandle::new(),
            session,
            config,
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_confirmer(mut self, confirmer: &'a dyn Confirmer) -> Self {
        self.confirmer = confirmer;
        self
    }

    /// Replace the session store. `None` disables persistence.
    pub fn with_store(mut self, store: Option<SessionStore>) -> Self {
        self.store = store;
        self
    }

    /// Index the project on start and reindex. Without one, no project
    /// overview is shown to the model.
    pub fn with_project_index(mut self, index: impl ProjectIndex + 'static) -> Self {
        self.index = Box::new(index);
        self
    }

    /// Share a cancel handle created elsewhere, e.g. before a signal
    /// handler was installed.
    pub fn with_cancel_handle(mut self, handle: CancelHandle) -> Self {
        self.cancel = handle;
        self
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn mode(&self) -> Mode {
        self.session.mode
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn turns(&self) -> &[Turn] {
        self.context.turns()
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.executor.registry()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn project_index(&self) -> &dyn ProjectIndex {
        self.index.as_ref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    fn emit(&self, event: EngineEvent<'_>) {
        self.handler.on_event(&event);
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Index the project and connect external tool servers. Failures
    /// become warnings.
    pub async fn start(&mut self) -> DiscoveryReport {
        let indexed = self.refresh_index().await;
        let report = self.discover().await;
        info!(
            "Session {} started in {} ({} tools, {indexed} indexed files, mode {})",
            self.session.id,
            self.config.project_root.display(),
            self.executor.registry().len(),
            self.session.mode
        );
        report
    }

    /// Rebuild the project index on the blocking pool and put its overview
    /// into the system message.
    async fn refresh_index(&mut self) -> usize {
        let mut index = std::mem::replace(&mut self.index, Box::new(NoIndex));
        let refreshed = tokio::task::spawn_blocking(move || {
            let count = index.refresh();
            (index, count)
        })
        .await;
        let count = match refreshed {
            Ok((index, count)) => {
                self.index = index;
                count
            }
            Err(e) => {
                warn!("Project index refresh failed: {e}");
                0
            }
        };
        self.context.set_project_overview(self.index.summary());
        count
    }

    async fn discover(&mut self) -> DiscoveryReport {
        let report = self
            .external
            .discover_into(self.executor.registry_mut())
            .await;
        for warning in &report.warnings {
            self.emit(EngineEvent::ServerWarning(warning));
        }
        report
    }

    /// Re-read the project memory file after the user edited it.
    pub fn reload_memory(&mut self) -> bool {
        let changed = self.context.reload_memory();
        if changed {
            info!("Project memory reloaded ({} bytes)", self.context.memory().text().len());
        }
        changed
    }

    /// Switch modes and return the previous one. Entering AUTO remembers
    /// where to return to.
    pub fn set_mode(&mut self, to: Mode) -> Mode {
        let from = self.session.mode;
        if to == Mode::Auto && from != Mode::Auto {
            self.session.prior_mode = from;
        }
        self.session.mode = to;
        if from != to {
            self.emit(EngineEvent::ModeChanged { from, to });
        }
        from
    }

    // ── Commands ───────────────────────────────────────────────────

    pub async fn handle(&mut self, command: Command) -> Result<Outcome, EngineError> {
        match command {
            Command::Submit(text) => Ok(Outcome::Turn(self.submit(&text).await?)),
            Command::SetMode(to) => {
                let from = self.set_mode(to);
                Ok(Outcome::ModeChanged { from, to })
            }
            Command::CycleMode => {
                let to = self.session.mode.next();
                let from = self.set_mode(to);
                Ok(Outcome::ModeChanged { from, to })
            }
            Command::NewSession => {
                self.save()?;
                self.context.clear();
                self.reload_memory();
                self.session = SessionState::fresh(self.session.mode);
                info!("New session {}", self.session.id);
                Ok(Outcome::SessionStarted {
                    id: self.session.id.clone(),
                })
            }
            Command::Resume(id) => self.resume(&id),
            Command::Reindex => {
                let indexed = self.refresh_index().await;
                let report = self.discover().await;
                self.reload_memory();
                info!("Reindexed: {indexed} files, {} external tools", report.registered.len());
                Ok(Outcome::Reindexed(report))
            }
            Command::EditMemory => {
                let memory = self.context.memory();
                let path = memory.ensure_file().map_err(|source| EngineError::Memory {
                    path: memory.path().display().to_string(),
                    source,
                })?;
                Ok(Outcome::MemoryFile(path.to_path_buf()))
            }
            Command::Cancel => {
                self.cancel.cancel();
                Ok(Outcome::Idle)
            }
            Command::ListSessions => {
                let sessions = match &self.store {
                    Some(store) => store.list()?,
                    None => Vec::new(),
                };
                Ok(Outcome::Sessions(sessions))
            }
            Command::ExitAndSave => {
                let saved = self.save()?;
                self.external.shutdown().await;
                Ok(Outcome::Exited { saved })
            }
            Command::ExitWithoutSaving => {
                self.external.shutdown().await;
                info!("Session {} discarded", self.session.id);
                Ok(Outcome::Exited { saved: None })
            }
        }
    }

    /// Snapshot of the session for persistence.
    pub fn record(&self) -> SessionRecord {
        let turns = self.context.turns().to_vec();
        SessionRecord {
            id: self.session.id.clone(),
            title: derive_title(&turns),
            project_root: self.config.project_root.clone(),
            mode: self.session.mode,
            total_tokens: self.context.total_appended_tokens(),
            turns,
            created_at: self.session.created_at,
            updated_at: Utc::now(),
        }
    }

    /// Persist the session if there is a store and anything to save.
    pub fn save(&self) -> Result<Option<PathBuf>, SessionError> {
        let Some(store) = &self.store else {
            debug!("No session store; not saving {}", self.session.id);
            return Ok(None);
        };
        if self.context.turns().is_empty() {
            return Ok(None);
        }
        let path = store.save(&self.record())?;
        info!("Session {} saved to {}", self.session.id, path.display());
        Ok(Some(path))
    }

    fn resume(&mut self, id: &str) -> Result<Outcome, EngineError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let record = store.load(id)?;
        if record.id != self.session.id {
            self.save()?;
        }

        let turns = record.turns.len();
        self.context.replace_turns(record.turns);
        self.reload_memory();
        let mode = if record.mode == Mode::Auto {
            Mode::Code
        } else {
            record.mode
        };
        self.session = SessionState {
            id: record.id,
            created_at: record.created_at,
            mode,
            prior_mode: mode,
        };
        info!(
            "Resumed session {} ({turns} turns, {} checkpoint(s))",
            self.session.id,
            self.context.compactions()
        );
        Ok(Outcome::Resumed {
            id: self.session.id.clone(),
            turns,
        })
    }

    // ── Turns ──────────────────────────────────────────────────────

    /// Run one turn for `input` in the current mode.
    ///
    /// Tool failures are fed back to the model; only transport-terminal and
    /// authentication failures end the turn with an error. Either way the
    /// history up to that point stays intact.
    pub async fn submit(&mut self, input: &str) -> Result<TurnReport, TurnError> {
        let token = self.cancel.begin_turn();
        let mode = self.session.mode;
        let user_index = self.context.turns().len();
        let compactions_before = self.context.compactions();

        self.context.push(Turn::user(input));
        self.emit(EngineEvent::TurnStarted { mode, input });

        let mut report = TurnReport::default();
        let outcome = self.run_rounds(&token, mode, &mut report).await;
        report.compactions = self.context.compactions() - compactions_before;

        if report.cancelled {
            if let Some(turn) = self.context.turns_mut().get_mut(user_index) {
                turn.status = TurnStatus::Cancelled;
            }
            self.emit(EngineEvent::Cancelled);
        }
        if mode == Mode::Auto {
            self.set_mode(self.session.prior_mode);
        }

        match outcome {
            Ok(()) => {
                self.emit(EngineEvent::Finished {
                    rounds: report.rounds,
                });
                Ok(report)
            }
            Err(e) => {
                self.emit(EngineEvent::TurnFailed {
                    error: &e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn run_rounds(
        &mut self,
        token: &CancellationToken,
        mode: Mode,
        report: &mut TurnReport,
    ) -> Result<(), TurnError> {
        let auto = mode == Mode::Auto;
        let max_rounds = if auto {
            self.config.auto.max_iterations
        } else {
            self.config.max_rounds
        };

        for round in 1..=max_rounds {
            if auto {
                self.emit(EngineEvent::AutoIteration {
                    iteration: round,
                    max_iterations: max_rounds,
                });
            }

            // Quiescent point: every earlier call has its result.
            if !self.compact_if_needed(token).await {
                report.cancelled = true;
                return Ok(());
            }

            let request = self.build_request(auto);
            report.rounds = round;
            self.emit(EngineEvent::ModelRequest {
                round,
                estimated_tokens: self.context.estimated_tokens(),
                capacity: self.context.capacity(),
            });

            let completion = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    report.cancelled = true;
                    return Ok(());
                }
                result = self.transport.execute(&request) => result?,
            };

            if let Some(usage) = &completion.usage {
                self.emit(EngineEvent::TokenUsage {
                    prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                    completion_tokens: usage.completion_tokens.unwrap_or(0),
                });
            }

            let text = completion.content.filter(|t| !t.trim().is_empty());
            let calls = completion.tool_calls;
            if let Some(ref text) = text {
                self.emit(EngineEvent::Text(text));
                report.text_output.push(text.clone());
            }
            let marker_hit = auto
                && text
                    .as_deref()
                    .is_some_and(|t| t.contains(&self.config.auto.termination_marker));

            if text.is_some() || !calls.is_empty() {
                self.context
                    .push(Turn::assistant(Message::assistant(text, calls.clone())));
            }

            if calls.is_empty() {
                if !auto || marker_hit {
                    report.finished = true;
                    report.auto_completed = marker_hit;
                    return Ok(());
                }
                debug!("AUTO reply without tool calls or marker; nudging");
                self.context
                    .push(Turn::user(self.config.auto.continuation_prompt.clone()));
                continue;
            }

            self.emit(EngineEvent::ToolCallsReceived {
                round,
                count: calls.len(),
            });
            report.tool_calls += calls.len();
            if self.resolve_calls(&calls, token).await {
                report.cancelled = true;
                return Ok(());
            }

            if marker_hit {
                report.finished = true;
                report.auto_completed = true;
                return Ok(());
            }
        }

        report.hit_limit = true;
        self.emit(EngineEvent::RoundLimitReached { max_rounds });
        Ok(())
    }

    /// Compact if due. Returns `false` when cancelled while summarizing;
    /// the history is then left as it was.
    async fn compact_if_needed(&mut self, token: &CancellationToken) -> bool {
        let model = self.config.model.clone();
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return false,
            result = self.context.maybe_compact(self.transport, &model) => result,
        };
        match result {
            Ok(Some(compaction)) => self.emit(EngineEvent::Compaction(&compaction)),
            Ok(None) => {}
            Err(e) => self.emit(EngineEvent::CompactionFailed {
                error: &e.to_string(),
            }),
        }
        true
    }

    fn build_request(&self, auto: bool) -> ChatRequest {
        let instructions = auto.then_some(self.config.auto.system_suffix.as_str());
        let tools = self.executor.registry().definitions();
        ChatRequest {
            model: Some(self.config.model.clone()),
            messages: self.context.outbound_messages_with(instructions),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tools: (!tools.is_empty()).then_some(tools),
            ..Default::default()
        }
    }

    /// Resolve every call in order. Returns `true` if the turn was
    /// cancelled; every call still has a recorded result in that case.
    async fn resolve_calls(&mut self, calls: &[ToolCall], token: &CancellationToken) -> bool {
        for (i, call) in calls.iter().enumerate() {
            let (result, interrupted) = if token.is_cancelled() {
                (ToolResult::cancelled(), true)
            } else {
                self.process_call(call, token).await
            };
            self.record_result(call, result);

            if interrupted {
                for rest in &calls[i + 1..] {
                    self.record_result(rest, ToolResult::cancelled());
                }
                return true;
            }
        }
        false
    }

    fn record_result(&mut self, call: &ToolCall, result: ToolResult) {
        self.emit(EngineEvent::ToolResult {
            name: &call.function.name,
            call_id: &call.id,
            result: &result,
        });
        self.context.push(Turn::tool(call.id.clone(), result));
    }

    /// Resolve, gate and run one call. The flag reports an interruption.
    async fn process_call(&self, call: &ToolCall, token: &CancellationToken) -> (ToolResult, bool) {
        let resolved = match self.executor.resolve(call) {
            Ok(resolved) => resolved,
            Err(result) => return (result, false),
        };

        let gate = self.session.mode.gate(
            resolved.mutating,
            &resolved.danger,
            self.config.confirm_mutations,
        );
        match gate {
            Gate::Execute => self.run_resolved(&resolved, token).await,
            Gate::Reject(reason) => (ToolResult::failed(FailureKind::NotPermitted, reason), false),
            Gate::Simulate => {
                let result = self.executor.preview(&resolved).await;
                self.emit(EngineEvent::PlanPreview {
                    name: &resolved.name,
                    description: &result.output,
                });
                (result, false)
            }
            Gate::Confirm(reason) => {
                let preview = resolved.tool.describe_effect(&resolved.args).await;
                self.emit(EngineEvent::ConfirmationRequested {
                    name: &resolved.name,
                    reason: &reason,
                    preview: &preview,
                });
                let request = ConfirmationRequest {
                    tool: &resolved.name,
                    arguments: &resolved.args,
                    reason: &reason,
                    preview: &preview,
                };
                let answer = tokio::select! {
                    biased;
                    _ = token.cancelled() => return (ToolResult::cancelled(), true),
                    answer = self.confirmer.confirm(request) => answer,
                };
                match answer {
                    Confirmation::Approved => self.run_resolved(&resolved, token).await,
                    Confirmation::Denied(why) => {
                        info!("User declined {}", resolved.name);
                        let message = match why {
                            Some(why) => format!("the user declined this call: {why}"),
                            None => "the user declined this call".to_string(),
                        };
                        (ToolResult::failed(FailureKind::Denied, message), false)
                    }
                }
            }
        }
    }

    async fn run_resolved(
        &self,
        call: &ResolvedCall<'_>,
        token: &CancellationToken,
    ) -> (ToolResult, bool) {
        let arguments = call.args.to_string();
        self.emit(EngineEvent::ToolExecuting {
            name: &call.name,
            arguments: &arguments,
        });
        if call.mutating {
            // Once started, a side effect may already be committed: let it
            // finish and record it.
            let result = self.executor.run(call).await;
            if token.is_cancelled() {
                warn!("Cancelled during {}; its result is kept", call.name);
            }
            (result, token.is_cancelled())
        } else {
            tokio::select! {
                biased;
                _ = token.cancelled() => (ToolResult::cancelled(), true),
                result = self.executor.run(call) => (result, false),
            }
        }
    }
}

fn build_context(config: &EngineConfig) -> ContextManager {
    ContextManager::new(
        config.system_prompt.clone(),
        ProjectMemory::load(&config.project_root),
    )
    .with_budget(TokenBudget::new(config.chars_per_token))
    .with_capacity(config.context_capacity)
    .with_threshold(config.compaction_threshold)
    .with_summarizer(Summarizer::new(config.summarizer.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::retry::RetryConfig;
    use crate::api::transport::scripted::ScriptedTransport;
    use crate::agent::config::AutoConfig;
    use crate::agent::confirm::FnConfirmer;
    use crate::agent::events::FnEventHandler;
    use crate::error::TransportError;
    use crate::{ChatCompletion, MessageRole};
    use serde_json::{Value, json};
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall::new(id, name, args.to_string())
    }

    fn calls(list: Vec<ToolCall>) -> Result<ChatCompletion, TransportError> {
        Ok(ChatCompletion::with_tool_calls(list))
    }

    fn text(t: &str) -> Result<ChatCompletion, TransportError> {
        Ok(ChatCompletion::text(t))
    }

    fn transport(
        script: Vec<Result<ChatCompletion, TransportError>>,
    ) -> (Arc<ScriptedTransport>, RetryingTransport) {
        let scripted = Arc::new(ScriptedTransport::new(script));
        let transport = RetryingTransport::new(scripted.clone(), RetryConfig::none());
        (scripted, transport)
    }

    fn config(root: &Path, mode: Mode) -> EngineConfig {
        EngineConfig::new("test-model", "You are a test agent.")
            .with_project_root(root)
            .with_mode(mode)
            .with_retry(RetryConfig::none())
    }

    fn tool_results(controller: &ModeController<'_>) -> Vec<(String, ToolResult)> {
        controller
            .turns()
            .iter()
            .filter_map(|t| {
                let result = t.result.clone()?;
                Some((t.message.tool_call_id.clone()?, result))
            })
            .collect()
    }

    #[tokio::test]
    async fn results_recorded_in_call_order() {
        let dir = tempfile::tempdir().unwrap();
        let (scripted, transport) = transport(vec![
            calls(vec![
                call("c1", "write_file", json!({"path": "a.txt", "content": "one"})),
                call("c2", "read_file", json!({"path": "a.txt"})),
                call("c3", "list_directory", json!({})),
            ]),
            text("All done. [TASK_COMPLETE]"),
        ]);
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Auto));

        let report = controller.submit("create a.txt").await.unwrap();
        assert!(report.finished && report.auto_completed);
        assert_eq!(report.tool_calls, 3);

        let results = tool_results(&controller);
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert_eq!(results[1].1.output, "one");
        assert!(results[2].1.output.contains("a.txt"));

        let requests = scripted.requests();
        let second = &requests[1];
        let roles: Vec<&MessageRole> = second.messages.iter().map(|m| &m.role).collect();
        assert_eq!(
            roles[roles.len() - 3..],
            [&MessageRole::Tool, &MessageRole::Tool, &MessageRole::Tool]
        );
        assert_eq!(controller.mode(), Mode::Code);
    }

    #[tokio::test]
    async fn confirm_required_never_runs_unconfirmed_in_auto() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("victim.txt"), "keep me").unwrap();
        let (_scripted, transport) = transport(vec![
            calls(vec![call("c1", "execute_command", json!({"command": "rm victim.txt"}))]),
            text("[TASK_COMPLETE]"),
        ]);
        let asked = AtomicUsize::new(0);
        let confirmer = FnConfirmer::new(|req| {
            asked.fetch_add(1, Ordering::SeqCst);
            assert_eq!(req.tool, "execute_command");
            Confirmation::Denied(None)
        });
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Auto))
            .with_confirmer(&confirmer);

        controller.submit("clean up").await.unwrap();
        assert_eq!(asked.load(Ordering::SeqCst), 1);
        assert!(dir.path().join("victim.txt").exists());
        assert_eq!(tool_results(&controller)[0].1.failure, Some(FailureKind::Denied));
    }

    #[tokio::test]
    async fn approved_dangerous_call_runs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("victim.txt"), "bye").unwrap();
        let (_scripted, transport) = transport(vec![
            calls(vec![call("c1", "execute_command", json!({"command": "rm victim.txt"}))]),
            text("[TASK_COMPLETE]"),
        ]);
        let confirmer = FnConfirmer::new(|_| Confirmation::Approved);
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Auto))
            .with_confirmer(&confirmer);

        controller.submit("clean up").await.unwrap();
        assert!(!dir.path().join("victim.txt").exists());
        assert!(tool_results(&controller)[0].1.success);
    }

    #[tokio::test]
    async fn headless_default_denies_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let (_scripted, transport) = transport(vec![
            calls(vec![call("c1", "write_file", json!({"path": "x.txt", "content": "x"}))]),
            text("ok"),
        ]);
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Code));

        controller.submit("write x").await.unwrap();
        assert!(!dir.path().join("x.txt").exists());
        assert_eq!(tool_results(&controller)[0].1.failure, Some(FailureKind::Denied));
    }

    #[tokio::test]
    async fn plan_mode_has_no_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("existing.txt"), "old\n").unwrap();
        let (_scripted, transport) = transport(vec![
            calls(vec![
                call("c1", "write_file", json!({"path": "existing.txt", "content": "new\n"})),
                call("c2", "execute_command", json!({"command": "touch made.txt"})),
                call("c3", "execute_command", json!({"command": "rm existing.txt"})),
                call("c4", "read_file", json!({"path": "existing.txt"})),
            ]),
            text("Here is the plan."),
        ]);
        let confirmer = FnConfirmer::new(|_| panic!("PLAN never asks"));
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Plan))
            .with_confirmer(&confirmer);

        controller.submit("plan the change").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("existing.txt")).unwrap(),
            "old\n"
        );
        assert!(!dir.path().join("made.txt").exists());

        let results = tool_results(&controller);
        assert!(results[..3].iter().all(|(_, r)| r.simulated && r.success));
        assert!(results[0].1.output.contains("-old"));
        assert!(!results[3].1.simulated);
        assert_eq!(results[3].1.output, "old\n");

        let first_tool = controller
            .turns()
            .iter()
            .find(|t| t.result.is_some())
            .unwrap();
        assert!(first_tool.content().starts_with("[PLAN MODE]"));
    }

    #[tokio::test]
    async fn ask_mode_rejects_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let (_scripted, transport) = transport(vec![
            calls(vec![
                call("c1", "write_file", json!({"path": "x.txt", "content": "x"})),
                call("c2", "list_directory", json!({})),
            ]),
            text("I can't write in ASK mode."),
        ]);
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Ask));

        controller.submit("write x").await.unwrap();
        assert!(!dir.path().join("x.txt").exists());
        let results = tool_results(&controller);
        assert_eq!(results[0].1.failure, Some(FailureKind::NotPermitted));
        assert!(results[0].1.output.contains("ASK mode"));
        assert!(results[1].1.success);
    }

    #[tokio::test]
    async fn auto_halts_at_iteration_bound_and_restores_mode() {
        let dir = tempfile::tempdir().unwrap();
        let (scripted, transport) = transport(
            (0..10).map(|_| text("Still working on it.")).collect(),
        );
        let config = config(dir.path(), Mode::Plan)
            .with_auto(AutoConfig::default().with_max_iterations(3));
        let mut controller = ModeController::new(&transport, config);
        controller.set_mode(Mode::Auto);

        let report = controller.submit("do everything").await.unwrap();
        assert_eq!(scripted.requests().len(), 3);
        assert!(report.hit_limit && !report.finished);
        assert_eq!(report.rounds, 3);
        assert_eq!(controller.mode(), Mode::Plan);

        let system = scripted.requests()[0].messages[0].content.clone().unwrap();
        assert!(system.contains("AUTO mode"));
        let nudges = controller
            .turns()
            .iter()
            .filter(|t| t.content().starts_with("Continue with the task"))
            .count();
        assert_eq!(nudges, 3);
    }

    #[tokio::test]
    async fn cancel_after_committed_write_keeps_its_result() {
        let dir = tempfile::tempdir().unwrap();
        let (scripted, transport) = transport(vec![
            calls(vec![
                call("c1", "write_file", json!({"path": "a.txt", "content": "kept"})),
                call("c2", "write_file", json!({"path": "b.txt", "content": "never"})),
            ]),
            text("unreachable"),
        ]);
        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        let handler = FnEventHandler::new(move |event| {
            if let EngineEvent::ToolResult { call_id: "c1", .. } = event {
                trigger.cancel();
            }
        });
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Auto))
            .with_event_handler(&handler)
            .with_cancel_handle(cancel);

        let report = controller.submit("write two files").await.unwrap();
        assert!(report.cancelled);
        assert_eq!(scripted.remaining(), 1);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "kept"
        );
        assert!(!dir.path().join("b.txt").exists());

        let tools: Vec<&Turn> = controller.turns().iter().filter(|t| t.result.is_some()).collect();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].status, TurnStatus::Complete);
        assert!(tools[0].result.as_ref().unwrap().success);
        assert!(tools[1].is_cancelled());
        assert!(controller.turns()[0].is_cancelled());
        assert_eq!(controller.mode(), Mode::Code);
    }

    #[tokio::test]
    async fn cancel_during_model_request_discards_response() {
        let dir = tempfile::tempdir().unwrap();
        let (scripted, transport) = transport(vec![text("never seen")]);
        let cancel = CancelHandle::new();
        let trigger = cancel.clone();
        let handler = FnEventHandler::new(move |event| {
            if let EngineEvent::ModelRequest { .. } = event {
                trigger.cancel();
            }
        });
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Code))
            .with_event_handler(&handler)
            .with_cancel_handle(cancel);

        let report = controller.submit("hello").await.unwrap();
        assert!(report.cancelled);
        assert_eq!(scripted.remaining(), 1);
        assert_eq!(controller.turns().len(), 1);
        assert!(controller.turns()[0].is_cancelled());
    }

    #[tokio::test]
    async fn tool_failures_are_fed_back() {
        let dir = tempfile::tempdir().unwrap();
        let (scripted, transport) = transport(vec![
            calls(vec![
                call("c1", "read_file", json!({"path": "missing.txt"})),
                call("c2", "teleport", json!({})),
                call("c3", "read_file", json!({"wrong": 1})),
                call("c4", "read_file", json!({"path": "../../etc/passwd"})),
            ]),
            text("Recovered."),
        ]);
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Code));

        let report = controller.submit("read things").await.unwrap();
        assert!(report.finished);
        assert_eq!(report.text(), "Recovered.");
        assert_eq!(scripted.requests().len(), 2);

        let kinds: Vec<Option<FailureKind>> = tool_results(&controller)
            .into_iter()
            .map(|(_, r)| r.failure)
            .collect();
        assert_eq!(
            kinds,
            vec![
                Some(FailureKind::ExecutionFailed),
                Some(FailureKind::UnknownTool),
                Some(FailureKind::InvalidArguments),
                Some(FailureKind::OutsideProject),
            ]
        );
    }

    #[tokio::test]
    async fn auth_failure_ends_turn_but_keeps_history() {
        let dir = tempfile::tempdir().unwrap();
        let (_scripted, transport) =
            transport(vec![Err(TransportError::from_status(401, "bad key"))]);
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Code));

        let err = controller.submit("hello").await.unwrap_err();
        assert!(matches!(err, TurnError::Auth(_)));
        assert_eq!(controller.turns().len(), 1);

        let Outcome::Exited { saved } = controller.handle(Command::ExitAndSave).await.unwrap()
        else {
            panic!("expected exit");
        };
        assert!(saved.unwrap().exists());
    }

    #[tokio::test]
    async fn compaction_runs_before_the_next_request() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), "x".repeat(400)).unwrap();
        let (scripted, transport) = transport(vec![
            calls(vec![call("c1", "read_file", json!({"path": "big.txt"}))]),
            text("Read big.txt; it is 400 x characters."),
            text("Done."),
        ]);
        let config = config(dir.path(), Mode::Code).with_context_capacity(100);
        let mut controller = ModeController::new(&transport, config);

        let report = controller.submit("read big.txt").await.unwrap();
        assert_eq!(report.compactions, 1);

        let requests = scripted.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].tools.is_none());
        let last = &requests[2].messages;
        assert!(last[1].content.as_deref().unwrap().starts_with("[Checkpoint #1]"));
        assert!(last.iter().all(|m| m.role != MessageRole::Tool));
        assert!(controller.turns().iter().any(|t| t.checkpoint));
        assert!(controller.turns().len() > 4);
    }

    #[tokio::test]
    async fn save_and_resume_restore_history() {
        let dir = tempfile::tempdir().unwrap();
        let (_scripted, transport) = transport(vec![text("Hi there.")]);
        let mut first = ModeController::new(&transport, config(dir.path(), Mode::Plan));
        first.submit("hello").await.unwrap();
        let id = first.session_id().to_string();
        let turns = first.turns().to_vec();
        first.handle(Command::ExitAndSave).await.unwrap();

        let mut second = ModeController::new(&transport, config(dir.path(), Mode::Code));
        let Outcome::Sessions(list) = second.handle(Command::ListSessions).await.unwrap() else {
            panic!("expected sessions");
        };
        assert_eq!(list[0].title.as_deref(), Some("hello"));

        let outcome = second.handle(Command::Resume(id.clone())).await.unwrap();
        assert!(matches!(outcome, Outcome::Resumed { turns: 2, .. }));
        assert_eq!(second.session_id(), id);
        assert_eq!(second.turns(), turns.as_slice());
        assert_eq!(second.mode(), Mode::Plan);

        let missing = second.handle(Command::Resume("ses-nope".into())).await;
        assert!(matches!(
            missing,
            Err(EngineError::Session(SessionError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn mode_commands() {
        let dir = tempfile::tempdir().unwrap();
        let (_scripted, transport) = transport(vec![]);
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Code));

        let outcome = controller.handle(Command::CycleMode).await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::ModeChanged {
                from: Mode::Code,
                to: Mode::Auto
            }
        ));
        controller.handle(Command::SetMode(Mode::Ask)).await.unwrap();
        assert_eq!(controller.mode(), Mode::Ask);
    }

    #[tokio::test]
    async fn new_session_saves_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let (_scripted, transport) = transport(vec![text("ok")]);
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Code));
        controller.submit("first").await.unwrap();
        let old = controller.session_id().to_string();

        let Outcome::SessionStarted { id } = controller.handle(Command::NewSession).await.unwrap()
        else {
            panic!("expected new session");
        };
        assert_ne!(id, old);
        assert!(controller.turns().is_empty());
        assert!(SessionStore::for_project(dir.path()).load(&old).is_ok());
    }

    #[tokio::test]
    async fn reindex_refreshes_project_overview() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn old() {}\n").unwrap();
        let (scripted, transport) = transport(vec![text("seen"), text("seen again")]);
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Ask))
            .with_project_index(crate::context::FileIndex::new(dir.path()));
        controller.start().await;
        assert_eq!(controller.project_index().lookup("src/lib.rs"), Some("pub fn old() {}\n"));

        controller.submit("what is here?").await.unwrap();
        std::fs::write(dir.path().join("src/added.rs"), "pub fn added() {}\n").unwrap();
        controller.handle(Command::Reindex).await.unwrap();
        controller.submit("and now?").await.unwrap();

        let requests = scripted.requests();
        let before = requests[0].messages[0].content.clone().unwrap();
        let after = requests[1].messages[0].content.clone().unwrap();
        assert!(before.contains("# Project index") && before.contains("src/lib.rs"));
        assert!(!before.contains("src/added.rs"));
        assert!(after.contains("src/added.rs"));
        assert!(after.ends_with("You are a test agent."));
        assert!(controller.project_index().lookup("src/added.rs").is_some());
    }

    #[tokio::test]
    async fn ask_runs_read_only_commands() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("present.txt"), "").unwrap();
        let (_scripted, transport) = transport(vec![
            calls(vec![
                call("c1", "execute_command", json!({"command": "ls"})),
                call("c2", "execute_command", json!({"command": "touch new.txt"})),
            ]),
            text("listed"),
        ]);
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Ask));
        controller.submit("what files are there?").await.unwrap();

        let results = tool_results(&controller);
        assert!(results[0].1.output.contains("present.txt"), "{:?}", results[0].1);
        assert_eq!(results[1].1.failure, Some(FailureKind::NotPermitted));
        assert!(!dir.path().join("new.txt").exists());
    }

    #[tokio::test]
    async fn memory_edit_and_reindex() {
        let dir = tempfile::tempdir().unwrap();
        crate::external::fake::install(
            dir.path(),
            &[(
                "echo",
                crate::external::fake::server(
                    crate::external::fake::ECHO_TOOLS,
                    crate::external::fake::REPLY_PONG,
                ),
            )],
        );
        let (scripted, transport) = transport(vec![text("noted")]);
        let mut controller = ModeController::new(&transport, config(dir.path(), Mode::Code));
        let report = controller.start().await;
        assert_eq!(report.registered.len(), 2);
        assert!(controller.registry().contains("lookup"));

        let Outcome::MemoryFile(path) = controller.handle(Command::EditMemory).await.unwrap()
        else {
            panic!("expected memory path");
        };
        std::fs::write(&path, "Always run the tests.").unwrap();

        let Outcome::Reindexed(again) = controller.handle(Command::Reindex).await.unwrap() else {
            panic!("expected reindex");
        };
        assert_eq!(again.registered.len(), 2);

        controller.submit("hi").await.unwrap();
        let system = scripted.requests()[0].messages[0].content.clone().unwrap();
        assert!(system.starts_with("# Project memory\n\nAlways run the tests."));
        assert!(system.ends_with("You are a test agent."));

        controller.handle(Command::ExitWithoutSaving).await.unwrap();
        assert!(SessionStore::for_project(dir.path()).list().unwrap().is_empty());
    }
}

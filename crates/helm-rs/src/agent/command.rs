//! Command intents from the UI collaborator and what they produce.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

use super::events::TurnReport;
use super::mode::Mode;
use super::session::SessionSummary;
use crate::external::DiscoveryReport;

/// A discrete user intent. Raw key handling stays in the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Save the current session (if it has turns) and start a fresh one.
    NewSession,
    Resume(String),
    /// Reload the tool-server manifest, reconnect servers and reload memory.
    Reindex,
    /// Ask for the memory file path so the UI can open an editor.
    EditMemory,
    SetMode(Mode),
    CycleMode,
    Submit(String),
    /// Cancel the in-flight turn. Outside a turn there is nothing to cancel.
    Cancel,
    ExitAndSave,
    ExitWithoutSaving,
    ListSessions,
}

/// Result of handling a [`Command`].
#[derive(Debug)]
pub enum Outcome {
    SessionStarted { id: String },
    Resumed { id: String, turns: usize },
    Reindexed(DiscoveryReport),
    /// Open this file in an editor, then call
    /// [`ModeController::reload_memory`](super::controller::ModeController::reload_memory).
    MemoryFile(PathBuf),
    ModeChanged { from: Mode, to: Mode },
    Turn(TurnReport),
    Sessions(Vec<SessionSummary>),
    /// The session ended. `saved` is where it was written, if anywhere.
    Exited { saved: Option<PathBuf> },
    Idle,
}

/// Cancels whatever turn is currently running.
///
/// Cloneable and usable from any task (a Ctrl-C handler, the input loop).
/// Each turn gets a fresh token, so a cancel issued between turns does not
/// leak into the next one.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_cancelled()
    }

    /// Start a new turn: install a fresh token and return it.
    pub(crate) fn begin_turn(&self) -> CancellationToken {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = CancellationToken::new();
        current.clone()
    }
}

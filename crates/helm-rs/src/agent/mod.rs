//! Agent runtime: the [`ModeController`] state machine and its supporting
//! modules.
//!
//! - [`controller::ModeController`]: one session, the model/tool loop and
//!   command handling. Start here.
//! - [`mode`]: [`Mode`] (ASK/PLAN/CODE/AUTO) and the per-call [`Gate`].
//! - [`config`]: [`EngineConfig`] and [`AutoConfig`].
//! - [`events`]: [`EventHandler`] and [`EngineEvent`] for observing a turn,
//!   plus the [`TurnReport`] a turn returns.
//! - [`confirm`]: the [`Confirmer`] seam for confirm-required calls.
//! - [`command`]: [`Command`] intents, their [`Outcome`]s and the
//!   [`CancelHandle`].
//! - [`session`]: [`SessionStore`], JSON persistence of session history.

pub mod command;
pub mod config;
pub mod confirm;
pub mod controller;
pub mod events;
pub mod mode;
pub mod session;

pub use command::{CancelHandle, Command, Outcome};
pub use config::{AutoConfig, DEFAULT_TERMINATION_MARKER, EngineConfig};
pub use confirm::{AutoDeny, Confirmation, ConfirmationRequest, Confirmer, FnConfirmer};
pub use controller::ModeController;
pub use events::{
    CompositeEventHandler, EngineEvent, EventHandler, FnEventHandler, LoggingHandler,
    NoopHandler, TurnReport,
};
pub use mode::{Gate, Mode};
pub use session::{SessionRecord, SessionStore, SessionSummary};

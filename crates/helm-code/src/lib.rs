//! Terminal coding collaborator powered by helm-rs.
//!
//! The binary reads lines from stdin, turns them into
//! [`Command`](helm_rs::agent::Command) intents with [`commands::parse_line`],
//! and hands them to a [`ModeController`](helm_rs::agent::ModeController).
//! Engine events are printed by [`console::ConsolePrinter`]; confirm-required
//! tool calls are answered through [`console::StdinConfirmer`].
//!
//! ```sh
//! # Interactive session in the current directory
//! helm-code
//!
//! # One-shot request in PLAN mode
//! helm-code --workdir ~/src/app --mode plan --prompt "How would you add retries to the client?"
//! ```

pub mod commands;
pub mod config;
pub mod console;
pub mod prompt;

pub use config::{CodeConfig, FileConfig, Overrides};
pub use prompt::coding_system_prompt;

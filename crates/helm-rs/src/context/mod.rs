//! Context window management.
//!
//! - [`budget`]: [`TokenBudget`], a pure chars-per-token estimator.
//! - [`memory`]: [`ProjectMemory`], the project memory file prepended to
//!   every prompt.
//! - [`index`]: [`ProjectIndex`], keyed lookup of project files, with the
//!   [`FileIndex`] walker.
//! - [`turn`]: [`Turn`], one entry of session history.
//! - [`summarizer`]: merge-style checkpoint summaries.
//! - [`manager`]: [`ContextManager`], which owns history, assembles
//!   outbound prompts and compacts at the threshold.

pub mod budget;
pub mod index;
pub mod manager;
pub mod memory;
pub mod summarizer;
pub mod turn;

pub use budget::{DEFAULT_CHARS_PER_TOKEN, TokenBudget};
pub use index::{FileIndex, NoIndex, ProjectIndex};
pub use manager::{Compaction, ContextManager};
pub use memory::ProjectMemory;
pub use summarizer::{Summarizer, SummarizerConfig};
pub use turn::{Turn, TurnStatus};

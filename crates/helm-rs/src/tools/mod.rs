//! Tools the model can call.
//!
//! Built-in and discovered tools implement the same [`Tool`] trait and live
//! in one [`ToolRegistry`], so the [`ToolExecutor`] never branches on origin.
//!
//! # Submodules
//!
//! - [`core`]: [`Tool`] trait, [`ToolResult`], [`Danger`] classification and
//!   truncation/validation helpers.
//! - [`registry`]: [`ToolRegistry`], name-unique registration.
//! - [`executor`]: [`ToolExecutor`], the resolve/run pipeline.
//! - [`builtin`]: `read_file`, `write_file`, `list_directory`,
//!   `search_in_files`, `execute_command`.
//! - [`policy`]: [`CommandPolicy`], the deny/confirm lists for commands.
//! - [`locks`]: [`PathLocks`], per-path write locks.
//! - [`spec`]: [`ToolSpec`](spec::ToolSpec) builder for tool descriptions.

pub mod builtin;
pub mod core;
pub mod executor;
pub mod locks;
pub mod policy;
pub mod registry;
pub mod spec;

pub use builtin::{BuiltinConfig, builtin_tools};
pub use core::{
    DEFAULT_MAX_RESULT_BYTES, DEFAULT_TOOL_TIMEOUT, Danger, FailureKind, Tool, ToolDescriptor,
    ToolFuture, ToolResult, ToolSource, parse_tool_args, truncate_result,
    validate_tool_arguments,
};
pub use executor::{ResolvedCall, ToolExecutor};
pub use locks::{PathGuard, PathLocks};
pub use policy::CommandPolicy;
pub use registry::ToolRegistry;

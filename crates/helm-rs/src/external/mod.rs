//! Tools provided by external processes.
//!
//! Servers are listed in the project manifest ([`manifest`]), started as
//! child processes and spoken to over stdio JSON-RPC ([`connection`]).
//! [`ExternalToolClient`] discovers their tools into a
//! [`ToolRegistry`](crate::tools::ToolRegistry) and forwards calls.

pub mod client;
pub mod connection;
pub mod manifest;

pub use client::{DiscoveryReport, ExternalToolClient, RemoteTool, ServerStatus};
pub use connection::{RemoteToolInfo, ServerConnection, ToolAnnotations};
pub use manifest::{ServerSpec, ToolServerManifest};

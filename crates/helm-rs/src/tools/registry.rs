//! Name-indexed tool registry shared by built-in and discovered tools.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use super::builtin::{BuiltinConfig, builtin_tools};
use super::core::{Tool, ToolDescriptor, ToolSource};
use crate::ToolDef;
use crate::error::RegistryError;

/// Maps globally unique tool names to their handlers.
///
/// Registration never overwrites: a second tool with an existing name is
/// rejected and the first one stays callable.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, rejecting a name that is already taken.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_boxed(Box::new(tool))
    }

    pub fn register_boxed(&mut self, tool: Box<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name();
        if let Some(existing) = self.tools.get(&name) {
            debug!(
                "Rejected tool '{name}' from {}: name already registered by {}",
                tool.source(),
                existing.source()
            );
            return Err(RegistryError::NameCollision {
                name,
                source_label: tool.source().to_string(),
            });
        }
        debug!("Registered tool '{name}' ({})", tool.source());
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Register a tool (builder pattern). A colliding name is logged and
    /// skipped; use [`register`](Self::register) to handle it.
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        if let Err(e) = self.register(tool) {
            warn!("Skipped tool: {e}");
        }
        self
    }

    /// Register the five built-in tools rooted at `root`. Names already
    /// taken keep their current tool.
    pub fn with_builtin_tools(mut self, root: &std::path::Path, config: &BuiltinConfig) -> Self {
        for tool in builtin_tools(root, config) {
            if let Err(e) = self.register_boxed(tool) {
                warn!("Skipped built-in tool: {e}");
            }
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Remove every tool that came from `server`. Returns how many were
    /// removed.
    pub fn remove_server_tools(&mut self, server: &str) -> usize {
        let before = self.tools.len();
        self.tools
            .retain(|_, t| !matches!(t.source(), ToolSource::Server(ref s) if s == server));
        before - self.tools.len()
    }

    /// Remove every discovered tool, keeping built-ins.
    pub fn remove_all_server_tools(&mut self) -> usize {
        let before = self.tools.len();
        self.tools
            .retain(|_, t| t.source() == ToolSource::Builtin);
        before - self.tools.len()
    }

    /// Definitions for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

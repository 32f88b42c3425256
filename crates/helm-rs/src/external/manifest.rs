//! The project tool-server manifest, `.helm/mcp_servers.json`.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "docs": { "command": "npx", "args": ["-y", "@example/docs-server"], "env": {"TOKEN": "..."} }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::PROJECT_DIR;
use crate::error::ExternalServerError;

pub const MANIFEST_FILE: &str = "mcp_servers.json";

/// Launch description of one server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    /// Listed but not started.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolServerManifest {
    #[serde(rename = "mcpServers", default)]
    pub servers: BTreeMap<String, ServerSpec>,
}

impl ToolServerManifest {
    pub fn path_for(project_root: &Path) -> PathBuf {
        project_root.join(PROJECT_DIR).join(MANIFEST_FILE)
    }

    /// Load the manifest for `project_root`. A missing file is `Ok(None)`.
    pub fn load(project_root: &Path) -> Result<Option<Self>, ExternalServerError> {
        let path = Self::path_for(project_root);
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No tool-server manifest at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(ExternalServerError::Manifest(format!(
                    "{}: {e}",
                    path.display()
                )));
            }
        };
        Self::parse(&text)
            .map(Some)
            .map_err(|e| ExternalServerError::Manifest(format!("{}: {e}", path.display())))
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn enabled(&self) -> impl Iterator<Item = (&String, &ServerSpec)> {
        self.servers.iter().filter(|(_, spec)| !spec.disabled)
    }
}

//! Project memory: a free-form text file prepended to every outbound prompt.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::PROJECT_DIR;

/// File name of the memory file inside the project directory.
pub const MEMORY_FILE: &str = "memory.md";

/// Opaque project memory text, loaded from `.helm/memory.md`.
#[derive(Debug, Clone, Default)]
pub struct ProjectMemory {
    path: PathBuf,
    text: String,
}

impl ProjectMemory {
    /// Path of the memory file for `project_root`.
    pub fn path_for(project_root: &Path) -> PathBuf {
        project_root.join(PROJECT_DIR).join(MEMORY_FILE)
    }

    /// Load memory for `project_root`. A missing or unreadable file yields
    /// empty memory.
    pub fn load(project_root: &Path) -> Self {
        let mut memory = Self {
            path: Self::path_for(project_root),
            text: String::new(),
        };
        memory.reload();
        memory
    }

    /// In-memory text with no backing file.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            path: PathBuf::new(),
            text: text.into(),
        }
    }

    /// Re-read the file from disk. Returns whether the text changed.
    pub fn reload(&mut self) -> bool {
        if self.path.as_os_str().is_empty() {
            return false;
        }
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                warn!("Failed to read project memory {}: {e}", self.path.display());
                String::new()
            }
        };
        let changed = text != self.text;
        if changed {
            debug!(
                "Project memory loaded from {} ({} chars)",
                self.path.display(),
                text.len()
            );
        }
        self.text = text;
        changed
    }

    /// Create the file (and its directory) if missing, so an editor can open it.
    pub fn ensure_file(&self) -> std::io::Result<&Path> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !self.path.exists() {
            fs::write(&self.path, "")?;
        }
        Ok(&self.path)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

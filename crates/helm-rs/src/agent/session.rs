//! Saved sessions, one JSON file each under `.helm/sessions/`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::mode::Mode;
use crate::PROJECT_DIR;
use crate::context::Turn;
use crate::error::SessionError;

const SESSIONS_DIR: &str = "sessions";
const TITLE_CHARS: usize = 60;

/// Generate a unique session id.
pub fn generate_session_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("ses-{ts:x}-{count:04x}")
}

/// Title derived from the first user message: its first line, shortened.
pub fn derive_title(turns: &[Turn]) -> Option<String> {
    let first = turns
        .iter()
        .find(|t| *t.role() == crate::MessageRole::User)?
        .content()
        .lines()
        .find(|l| !l.trim().is_empty())?
        .trim();
    let mut title: String = first.chars().take(TITLE_CHARS).collect();
    if first.chars().count() > TITLE_CHARS {
        title.push_str("...");
    }
    Some(title)
}

// ── SessionRecord ──────────────────────────────────────────────────

/// Everything needed to resume a session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub title: Option<String>,
    pub project_root: PathBuf,
    pub mode: Mode,
    pub turns: Vec<Turn>,
    /// Estimated tokens of every turn ever appended.
    pub total_tokens: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub title: Option<String>,
    pub turns: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&SessionRecord> for SessionSummary {
    fn from(record: &SessionRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            turns: record.turns.len(),
            updated_at: record.updated_at,
        }
    }
}

// ── SessionStore ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<project>/.helm/sessions`.
    pub fn for_project(project_root: &Path) -> Self {
        Self::new(project_root.join(PROJECT_DIR).join(SESSIONS_DIR))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids become file names, so only `[A-Za-z0-9_-]` is accepted.
    fn path_for(&self, id: &str) -> Result<PathBuf, SessionError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SessionError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    /// Atomic write: serialize to a temp file, then rename into place.
    pub fn save(&self, record: &SessionRecord) -> Result<PathBuf, SessionError> {
        let final_path = self.path_for(&record.id)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        let tmp_path = self.dir.join(format!(".{}.json.tmp", record.id));

        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp_path, json).map_err(|e| io_error(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| io_error(&final_path, e))?;
        debug!("Saved session {} ({} turns)", record.id, record.turns.len());
        Ok(final_path)
    }

    pub fn load(&self, id: &str) -> Result<SessionRecord, SessionError> {
        let path = self.path_for(id)?;
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(id.to_string()));
            }
            Err(e) => return Err(io_error(&path, e)),
        };
        Ok(serde_json::from_str(&json)?)
    }

    /// Saved sessions, most recently updated first. Unreadable files are
    /// skipped with a warning.
    pub fn list(&self) -> Result<Vec<SessionSummary>, SessionError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir, e)),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| io_error(&self.dir, e))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let parsed = std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|json| {
                    serde_json::from_str::<SessionRecord>(&json).map_err(|e| e.to_string())
                });
            match parsed {
                Ok(record) => sessions.push(SessionSummary::from(&record)),
                Err(e) => warn!("Skipping unreadable session at {}: {e}", path.display()),
            }
        }
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    pub fn delete(&self, id: &str) -> Result<(), SessionError> {
        let path = self.path_for(id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SessionError::NotFound(id.to_string()))
            }
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> SessionError {
    SessionError::Io {
        path: path.display().to_string(),
        source,
    }
}

//! Collaborator configuration.
//!
//! Settings are layered: built-in defaults, then the optional project file
//! `<project>/.helm/config.json`, then command-line flags. The API key only
//! ever comes from the `OPENROUTER_KEY` environment variable.

use std::path::{Path, PathBuf};

use helm_rs::agent::{AutoConfig, EngineConfig, Mode};
use helm_rs::{DEFAULT_API_URL, DEFAULT_MODEL, PROJECT_DIR};
use serde::Deserialize;
use thiserror::Error;

use crate::prompt::coding_system_prompt;

pub const API_KEY_VAR: &str = "OPENROUTER_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("OPENROUTER_KEY is not set")]
    MissingApiKey,
}

/// Project-level settings, all optional.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct FileConfig {
    pub model: Option<String>,
    pub api_url: Option<String>,
    pub mode: Option<Mode>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub context_capacity: Option<usize>,
    pub auto_max_iterations: Option<u32>,
    pub max_rounds: Option<u32>,
    pub confirm_mutations: Option<bool>,
    pub tool_timeout_secs: Option<u64>,
    pub index_project: Option<bool>,
}

impl FileConfig {
    pub fn path_for(project_root: &Path) -> PathBuf {
        project_root.join(PROJECT_DIR).join("config.json")
    }

    /// Load the project file. A missing file is an empty config.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_for(project_root);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Resolved settings for one run of the collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeConfig {
    pub project_root: PathBuf,
    pub model: String,
    pub api_url: String,
    pub mode: Mode,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub context_capacity: Option<usize>,
    pub auto_max_iterations: Option<u32>,
    pub max_rounds: Option<u32>,
    pub confirm_mutations: bool,
    pub tool_timeout_secs: Option<u64>,
    /// Show the model an overview of the project's files.
    pub index_project: bool,
}

/// Command-line values that override the project file when present.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub api_url: Option<String>,
    pub mode: Option<Mode>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub context_capacity: Option<usize>,
    pub auto_max_iterations: Option<u32>,
}

impl CodeConfig {
    pub fn resolve(project_root: PathBuf, file: FileConfig, cli: Overrides) -> Self {
        Self {
            project_root,
            model: cli
                .model
                .or(file.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_url: cli
                .api_url
                .or(file.api_url)
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            mode: cli.mode.or(file.mode).unwrap_or_default(),
            max_tokens: cli.max_tokens.or(file.max_tokens),
            temperature: cli.temperature.or(file.temperature),
            context_capacity: cli.context_capacity.or(file.context_capacity),
            auto_max_iterations: cli.auto_max_iterations.or(file.auto_max_iterations),
            max_rounds: file.max_rounds,
            confirm_mutations: file.confirm_mutations.unwrap_or(true),
            tool_timeout_secs: file.tool_timeout_secs,
            index_project: file.index_project.unwrap_or(true),
        }
    }

    /// Build the engine configuration, keeping engine defaults for anything
    /// not set.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(self.model.clone(), coding_system_prompt())
            .with_project_root(&self.project_root)
            .with_mode(self.mode)
            .with_confirm_mutations(self.confirm_mutations);
        if let Some(max) = self.max_tokens {
            config = config.with_max_tokens(max);
        }
        if let Some(t) = self.temperature {
            config = config.with_temperature(t);
        }
        if let Some(capacity) = self.context_capacity {
            config = config.with_context_capacity(capacity);
        }
        if let Some(rounds) = self.max_rounds {
            config = config.with_max_rounds(rounds);
        }
        if let Some(n) = self.auto_max_iterations {
            config = config.with_auto(AutoConfig::default().with_max_iterations(n));
        }
        if let Some(secs) = self.tool_timeout_secs {
            config = config.with_tool_timeout(std::time::Duration::from_secs(secs));
        }
        config
    }
}

/// Read the API key from the environment.
pub fn api_key() -> Result<String, ConfigError> {
    match std::env::var(API_KEY_VAR) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ConfigError::MissingApiKey),
    }
}

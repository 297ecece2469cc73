pub mod worker;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::PersistConfig;
use crate::utils::paths::AppPaths;

pub use worker::WorkerCommand;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 51055;
pub const DEFAULT_AGENT_ID: &str = "workflow.chat.deepseek";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are AgentRelay assistant.";
pub const DEFAULT_TEMPERATURE: f64 = 0.2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not determine the {0} directory")]
    NoDirectory(&'static str),

    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// How the worker process is launched. Fixed for the lifetime of a process;
/// changing it means stopping and starting again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RuntimeOptions {
    pub host: String,
    pub port: u16,
    pub offline: bool,
    pub allow_guest: bool,
    pub headless: bool,
    pub worker_executable_path: Option<PathBuf>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            offline: false,
            allow_guest: false,
            headless: false,
            worker_executable_path: None,
        }
    }
}

impl RuntimeOptions {
    /// Arguments the worker understands, in the order it documents them.
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec![
            "--host".to_string(),
            self.host.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ];
        if self.offline {
            args.push("--offline".to_string());
        }
        if self.allow_guest {
            args.push("--allow-guest".to_string());
        }
        args
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Script handed to the executable ahead of the worker arguments.
    pub entrypoint: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunsConfig {
    pub agent_id: String,
    pub system_prompt: Option<String>,
    pub temperature: Option<f64>,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            agent_id: DEFAULT_AGENT_ID.to_string(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            temperature: Some(DEFAULT_TEMPERATURE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
    pub debounce_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let persist = PersistConfig::default();
        Self {
            path: None,
            debounce_ms: persist.debounce.as_millis() as u64,
            max_delay_ms: persist.max_delay.as_millis() as u64,
        }
    }
}

impl StoreConfig {
    pub fn persist_config(&self) -> PersistConfig {
        PersistConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.debounce_ms)),
        }
    }

    /// Configured path, or `sessions.json` in the user data directory.
    pub fn resolve_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => AppPaths::session_store().ok_or(ConfigError::NoDirectory("data")),
        }
    }
}

/// Everything read from `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub runtime: RuntimeOptions,
    pub worker: WorkerConfig,
    pub runs: RunsConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        AppPaths::config_file().ok_or(ConfigError::NoDirectory("config"))
    }

    /// Load from the default location, or defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path()?)
    }

    /// Missing files give defaults; unparsable files are reported and ignored.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse config file at {:?}: {}. Using defaults.",
                    path,
                    e
                );
                Ok(Self::default())
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

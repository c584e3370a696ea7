// Configuration file and environment overrides

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::SortMode;
use crate::reorder::PriorityWritePolicy;

const APP_DIR: &str = "todolist";
const OWNER_ENV: &str = "TODOLIST_OWNER";

/// Settings read from `config.yaml`; every field is optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Owner whose tasks are shown
    pub owner_id: Option<String>,
    /// Directory holding the task log and cache
    pub data_dir: Option<PathBuf>,
    /// Initial sort mode
    pub sort: SortMode,
    /// Which tasks get rewritten after a reorder
    pub priority_writes: PriorityWritePolicy,
    /// How often watch mode checks for writes from other processes
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner_id: None,
            data_dir: None,
            sort: SortMode::default(),
            priority_writes: PriorityWritePolicy::default(),
            poll_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Default location: `<config_dir>/todolist/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.yaml"))
    }

    /// Load from an explicit path, or the default path if it exists.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    /// Environment overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match Self::default_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env(std::env::var(OWNER_ENV).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    fn apply_env(&mut self, owner: Option<String>) {
        if let Some(owner) = owner.filter(|o| !o.trim().is_empty()) {
            self.owner_id = Some(owner);
        }
    }

    /// Data directory: configured, else `<data_dir>/todolist`, else `./.todolist`
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR)))
            .unwrap_or_else(|| PathBuf::from(".todolist"))
    }
}

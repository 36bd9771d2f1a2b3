use std::{path::PathBuf, sync::Arc, time::Duration};

use git::DEFAULT_MAX_STATUS_BUFFER_BYTES;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use utils::diff::DiffRowOptions;

use super::store::{JsonFilePersistence, PersistenceError, PersistencePort, StateStore};

const SETTINGS_DIR_NAME: &str = "gitfox";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("No configuration directory available on this platform")]
    NoConfigDir,
}

fn default_true() -> bool {
    true
}

fn default_branch() -> String {
    git::branch::DEFAULT_BRANCH_NAME.to_string()
}

fn default_max_status_buffer_bytes() -> usize {
    DEFAULT_MAX_STATUS_BUFFER_BYTES
}

#[derive(Clone, Debug, Serialize, Deserialize, TS, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub show_side_by_side_diff: bool,
    #[serde(default)]
    pub hide_whitespace_in_diff: bool,
    #[serde(default = "default_true")]
    pub enable_diff_expansion: bool,
    /// Used when neither the remote nor `init.defaultBranch` names one.
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_max_status_buffer_bytes")]
    pub max_status_buffer_bytes: usize,
    /// No timeout when unset.
    #[serde(default)]
    pub git_timeout_secs: Option<u64>,
    /// Path or name of the git binary; `git` on PATH when unset.
    #[serde(default)]
    pub git_executable: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            show_side_by_side_diff: false,
            hide_whitespace_in_diff: false,
            enable_diff_expansion: true,
            default_branch: default_branch(),
            max_status_buffer_bytes: DEFAULT_MAX_STATUS_BUFFER_BYTES,
            git_timeout_secs: None,
            git_executable: None,
        }
    }
}

impl Settings {
    pub fn git_timeout(&self) -> Option<Duration> {
        self.git_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn diff_row_options(&self) -> DiffRowOptions {
        DiffRowOptions {
            show_side_by_side: self.show_side_by_side_diff,
            enable_diff_expansion: self.enable_diff_expansion,
        }
    }
}

/// `<config dir>/gitfox/settings.json`
pub fn settings_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// Will always return settings, falling back to defaults when the stored
/// ones are missing or unreadable.
pub async fn load_settings(port: &dyn PersistencePort<Settings>) -> Settings {
    match port.load().await {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            tracing::info!("No settings file found, using defaults");
            Settings::default()
        }
        Err(e) => {
            tracing::warn!("Failed to read settings: {}, using defaults", e);
            Settings::default()
        }
    }
}

/// Settings store backed by the JSON file at `path`.
pub async fn open_settings_store(path: PathBuf) -> StateStore<Settings> {
    let port = JsonFilePersistence::new(path);
    let settings = load_settings(&port).await;
    StateStore::with_persistence(settings, Arc::new(port))
}

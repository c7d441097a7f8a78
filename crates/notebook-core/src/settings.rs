//! Notebook preferences persisted as JSON.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/notebook-core/settings.json
//! - Linux: ~/.config/notebook-core/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\notebook-core\settings.json

use crate::cell::CellKind;
use crate::commands::command_ids;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A keystroke bound to a command name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBindingConfig {
    /// Normalized keystroke, e.g. `"Shift Enter"`.
    pub keys: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookSettings {
    /// Open documents read-only. Stamped into each cell as `editable = false`.
    #[serde(default)]
    pub read_only: bool,

    /// Kind of newly added cells and of the first cell in a new document.
    #[serde(default)]
    pub default_cell_type: CellKind,

    #[serde(default = "default_completer_timeout_ms")]
    pub completer_timeout_ms: u64,

    /// How long kernel adoption waits for the `kernel_info` handshake.
    #[serde(default = "default_kernel_info_timeout_secs")]
    pub kernel_info_timeout_secs: u64,

    #[serde(default = "default_key_bindings")]
    pub key_bindings: Vec<KeyBindingConfig>,
}

fn default_completer_timeout_ms() -> u64 {
    1000
}

fn default_kernel_info_timeout_secs() -> u64 {
    30
}

fn default_key_bindings() -> Vec<KeyBindingConfig> {
    [
        ("Shift Enter", command_ids::RUN_SELECTED_CODECELL),
        ("M", command_ids::CONVERT_TO_MARKDOWN),
        ("Y", command_ids::CONVERT_TO_CODE),
        ("R", command_ids::CONVERT_TO_RAW),
        ("Z", command_ids::UNDO),
        ("Shift Z", command_ids::REDO),
    ]
    .into_iter()
    .map(|(keys, command)| KeyBindingConfig {
        keys: keys.to_string(),
        command: command.to_string(),
    })
    .collect()
}

impl Default for NotebookSettings {
    fn default() -> Self {
        Self {
            read_only: false,
            default_cell_type: CellKind::Code,
            completer_timeout_ms: default_completer_timeout_ms(),
            kernel_info_timeout_secs: default_kernel_info_timeout_secs(),
            key_bindings: default_key_bindings(),
        }
    }
}

impl NotebookSettings {
    pub fn completer_timeout(&self) -> Duration {
        Duration::from_millis(self.completer_timeout_ms)
    }

    pub fn kernel_info_timeout(&self) -> Duration {
        Duration::from_secs(self.kernel_info_timeout_secs)
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("notebook-core")
        .join("settings.json")
}

/// Load settings from disk, returning defaults if file doesn't exist
pub fn load_settings() -> NotebookSettings {
    load_settings_from(&settings_path())
}

/// Load settings from `path`. A missing or unparseable file yields defaults.
pub fn load_settings_from(path: &Path) -> NotebookSettings {
    if path.exists() {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    } else {
        NotebookSettings::default()
    }
}

/// Save settings to disk
pub fn save_settings(settings: &NotebookSettings) -> Result<()> {
    save_settings_to(&settings_path(), settings)
}

pub fn save_settings_to(path: &Path, settings: &NotebookSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(())
}

//! User-facing settings persisted at `~/.calendar-ai/settings.toml`.
//!
//! Environment config decides *what* is available; settings decide how the
//! app uses it (routing on/off, preferred provider, per-operation toggles)
//! and can change while the process is running.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::llm::request::OperationType;

/// Base directory for everything this crate persists.
pub fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".calendar-ai")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Complexity-based routing. When off, `selected_provider` goes first.
    pub routing_enabled: bool,
    /// Provider id preferred by the user, if any.
    pub selected_provider: Option<String>,
    /// Per-operation kill switches keyed by operation name
    /// (`intent_detection`, ...). Missing entries mean enabled.
    pub operations: BTreeMap<String, bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            routing_enabled: true,
            selected_provider: None,
            operations: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Default settings file path.
    pub fn default_path() -> PathBuf {
        base_dir().join("settings.toml")
    }

    /// Load from the default path, falling back to defaults if the file is
    /// missing or unreadable.
    pub fn load() -> Self {
        let path = Self::default_path();
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable settings file");
                Self::default()
            }
        }
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(format!("settings: {e}")))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(format!("settings: {e}")))
    }

    /// Write to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path())
    }

    pub fn is_operation_enabled(&self, operation: OperationType) -> bool {
        self.operations
            .get(operation.as_str())
            .copied()
            .unwrap_or(true)
    }

    pub fn set_operation_enabled(&mut self, operation: OperationType, enabled: bool) {
        self.operations.insert(operation.as_str().to_string(), enabled);
    }
}

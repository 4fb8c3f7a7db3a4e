//! Daemon configuration
//!
//! Loaded from TOML, by default `~/.config/typestat/config.toml`:
//!
//! ```toml
//! log_level = "info"
//! database = "/var/lib/typestat/db"
//! poll_interval_ms = 2000
//!
//! [[keyboard]]
//! name = "Planck"
//! vendor_id = 0xFEED
//! product_id = 0x6060
//! finger_map = [
//!     [0, 1, 2, 3, 3, 4, 5, 6, 6, 7, 8, 9],
//! ]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use typestat_keyboard::Finger;
use typestat_transport::protocol::{device, timing};
use typestat_transport::DeviceMatch;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found at {0} (create it with at least one [[keyboard]] entry)")]
    NotFound(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default log level when neither RUST_LOG nor --log-level is given
    #[serde(default)]
    pub log_level: Option<String>,
    /// Database directory
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Interval between device presence polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Keyboards to track
    #[serde(default, rename = "keyboard")]
    pub keyboards: Vec<KeyboardConfig>,
}

fn default_poll_interval() -> u64 {
    timing::DEVICE_POLL_MS
}

fn default_usage_page() -> u16 {
    device::RAW_USAGE_PAGE
}

fn default_usage() -> u16 {
    device::RAW_USAGE
}

/// One tracked keyboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyboardConfig {
    /// Display name, also the storage key
    pub name: String,
    pub vendor_id: u16,
    pub product_id: u16,
    #[serde(default = "default_usage_page")]
    pub usage_page: u16,
    #[serde(default = "default_usage")]
    pub usage: u16,
    /// Finger id (0..=9) per matrix cell, row-major
    #[serde(default)]
    pub finger_map: FingerMap,
}

impl KeyboardConfig {
    /// HID interface selector for this keyboard
    pub fn selector(&self) -> DeviceMatch {
        DeviceMatch {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            usage_page: self.usage_page,
            usage: self.usage,
        }
    }
}

/// Matrix position → finger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerMap(Vec<Vec<u8>>);

impl FingerMap {
    pub fn new(rows: Vec<Vec<u8>>) -> Self {
        Self(rows)
    }

    /// Finger assigned to a matrix position, if configured
    pub fn finger_at(&self, row: u8, col: u8) -> Option<Finger> {
        let id = *self.0.get(row as usize)?.get(col as usize)?;
        Finger::new(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|row| row.is_empty())
    }

    fn validate(&self, keyboard: &str) -> Result<(), ConfigError> {
        for (r, row) in self.0.iter().enumerate() {
            for (c, &id) in row.iter().enumerate() {
                if Finger::new(id).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "keyboard \"{keyboard}\": finger id {id} at row {r}, col {c} is outside 0..=9"
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Config {
    /// Get default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("typestat")
            .join("config.toml")
    }

    /// Get default database directory
    pub fn default_database_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("typestat")
            .join("db")
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.keyboards.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[keyboard]] entry is required".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }

        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for kb in &self.keyboards {
            if !ids.insert((kb.vendor_id, kb.product_id)) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate keyboard {:04X}:{:04X}",
                    kb.vendor_id, kb.product_id
                )));
            }
            if !names.insert(kb.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate keyboard name \"{}\"",
                    kb.name
                )));
            }
            kb.finger_map.validate(&kb.name)?;
        }
        Ok(())
    }

    /// Database directory: explicit override, config value, or default
    pub fn database_path(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.database.clone())
            .unwrap_or_else(Self::default_database_path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Find a keyboard by name (case-insensitive)
    pub fn keyboard(&self, name: &str) -> Option<&KeyboardConfig> {
        self.keyboards
            .iter()
            .find(|kb| kb.name.eq_ignore_ascii_case(name))
    }
}

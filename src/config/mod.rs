//! Configuration management for the armory registry.
//!
//! TOML-based, type-safe configuration with validation and sensible
//! defaults. Two sections:
//!
//! - `[registry]` — data directory, file locking, load reporting
//! - `[logging]`  — level and optional log file
//!
//! ```toml
//! [registry]
//! data_dir = "./data"
//! fs_lock = true
//! show_loaded = false
//!
//! [logging]
//! level = "info"
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Registry and persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Root directory holding `records/` and `backup/`.
    pub data_dir: String,
    /// Advisory file locking on backing files. Disable only for
    /// filesystems where the startup probe misbehaves; deletion races
    /// become possible without it.
    #[serde(default = "default_fs_lock")]
    pub fs_lock: bool,
    /// Log every record as it loads during bulk load.
    #[serde(default)]
    pub show_loaded: bool,
}

fn default_fs_lock() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub registry: RegistryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: RegistryConfig {
                data_dir: "./data".to_string(),
                fs_lock: true,
                show_loaded: false,
            },
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).map_err(|e| anyhow!("Failed to read config {}: {}", path, e))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse config {}: {}", path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Write a default configuration file. Refuses to overwrite.
    pub fn create_default(path: &str) -> Result<()> {
        if Path::new(path).exists() {
            return Err(anyhow!("{} already exists; not overwriting", path));
        }
        let rendered = toml::to_string_pretty(&Config::default())?;
        fs::write(path, rendered)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.registry.data_dir.trim().is_empty() {
            return Err(anyhow!("registry.data_dir must not be empty"));
        }
        self.logging
            .level
            .parse::<log::LevelFilter>()
            .map_err(|_| anyhow!("unknown logging.level '{}'", self.logging.level))?;
        Ok(())
    }
}

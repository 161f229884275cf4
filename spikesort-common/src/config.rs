//! Configuration file loading
//!
//! The TOML file is optional. Resolution order for its location:
//! 1. Explicit path (command line)
//! 2. `SPIKESORT_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/spikesort/config.toml` on Linux)
//!
//! A missing file yields built-in defaults and a warning.
//!
//! ```toml
//! output_root = "/data/sorting"
//!
//! [logging]
//! level = "debug"
//!
//! [sorters.kilosort2]
//! path = "/opt/Kilosort2"
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable pointing at the configuration file
pub const CONFIG_ENV_VAR: &str = "SPIKESORT_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpikesortConfig {
    /// Directory under which default output folders are created
    #[serde(default)]
    pub output_root: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-sorter settings keyed by sorter name
    #[serde(default)]
    pub sorters: BTreeMap<String, SorterToolConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings for one external sorting tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SorterToolConfig {
    /// Install folder of the tool
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl SpikesortConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse config failed: {}", e)))
    }

    /// Configured install path of a sorter, if any
    pub fn tool_path(&self, sorter_name: &str) -> Option<&Path> {
        self.sorters
            .get(sorter_name)
            .and_then(|s| s.path.as_deref())
    }
}

/// Default config file location for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("spikesort").join("config.toml"))
}

/// Pick the config file path: CLI argument, then environment, then platform default
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    default_config_path()
}

/// Load configuration, falling back to defaults when the file does not exist
///
/// A file that exists but cannot be parsed is an error.
pub fn load_config(cli_arg: Option<&Path>) -> Result<SpikesortConfig> {
    let Some(path) = resolve_config_path(cli_arg) else {
        warn!("Could not determine config directory, using defaults");
        return Ok(SpikesortConfig::default());
    };

    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return Ok(SpikesortConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config = SpikesortConfig::from_toml_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    debug!(path = %path.display(), sorters = config.sorters.len(), "Loaded config");
    Ok(config)
}

/// Write configuration to `path`, creating parent directories
pub fn write_config(path: &Path, config: &SpikesortConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

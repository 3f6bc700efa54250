//! # HomeControl Host Configuration
//!
//! Host settings read from a JSON, YAML or TOML file (format chosen by the
//! file extension). Every field has a default, so an empty document or a
//! missing section is valid.
//!
//! ```yaml
//! module-manager:
//!   folder: modules
//!   blacklist: [broken_module]
//! logging:
//!   level: debug
//! ```
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernel::constants::{
    DEFAULT_IGNORED_DIRS, DEFAULT_LOG_LEVEL, DEFAULT_MODULES_DIR, MODULE_SOURCE_EXTENSION,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unsupported configuration format for '{path}'")]
    UnsupportedFormat { path: PathBuf },

    #[error("Failed to read configuration '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {format:?} configuration: {message}")]
    Parse { format: ConfigFormat, message: String },
}

/// Format of a host configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    #[cfg(feature = "yaml-config")]
    Yaml,
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Pick the format from the extension (`.json`, `.yaml`/`.yml`, `.toml`),
    /// case-insensitively. Formats whose feature is disabled are unknown.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Some(Self::Yaml),
            #[cfg(feature = "toml-config")]
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Deserialize any serde type from `data` in this format
    pub fn parse<T: for<'de> Deserialize<'de>>(&self, data: &str) -> Result<T, ConfigError> {
        let parsed = match self {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| e.to_string()),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| e.to_string()),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| ConfigError::Parse {
            format: *self,
            message,
        })
    }
}

/// Command used to list and install Python packages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PackageManagerConfig {
    pub program: String,
    /// Arguments producing a JSON array of `{name, version}` objects
    pub list_args: Vec<String>,
    /// Arguments placed before the requirement strings
    pub install_args: Vec<String>,
}

impl Default for PackageManagerConfig {
    fn default() -> Self {
        let args = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            program: "python3".to_string(),
            list_args: args(&["-m", "pip", "list", "--format=json", "--disable-pip-version-check"]),
            install_args: args(&["-m", "pip", "install", "--disable-pip-version-check"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ModuleManagerConfig {
    /// Folder scanned by `load_directory` at startup
    pub folder: PathBuf,
    /// Module names that are never loaded from a folder scan
    pub blacklist: Vec<String>,
    /// Directory names skipped during a scan
    pub ignored_dirs: Vec<String>,
    /// Extension marking a single file as a file module
    pub source_extension: String,
    pub package_manager: PackageManagerConfig,
}

impl Default for ModuleManagerConfig {
    fn default() -> Self {
        Self {
            folder: PathBuf::from(DEFAULT_MODULES_DIR),
            blacklist: Vec::new(),
            ignored_dirs: DEFAULT_IGNORED_DIRS.iter().map(|s| s.to_string()).collect(),
            source_extension: MODULE_SOURCE_EXTENSION.to_string(),
            package_manager: PackageManagerConfig::default(),
        }
    }
}

impl ModuleManagerConfig {
    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist.iter().any(|b| b == name)
    }

    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignored_dirs.iter().any(|d| d == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `homecontrol_core=debug`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HostConfig {
    pub module_manager: ModuleManagerConfig,
    pub logging: LoggingConfig,
}

impl HostConfig {
    /// Load from a file, picking the format from its extension
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
        })?;
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_str(&data, format)?;
        log::debug!("Loaded host configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_str(data: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        // An empty YAML document parses as unit, not as an empty mapping
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        format.parse(data)
    }
}

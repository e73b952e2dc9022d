//! Configuration loading traits and types.
//!
//! A hardware module is configured by one TOML file. The top level carries
//! the settings the runtime needs; the `[module]` table is handed to the
//! driver untouched and decoded into a driver-specific type on demand.
//!
//! # Usage
//!
//! ```rust,no_run
//! use hwm_common::config::{ConfigError, ModuleConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = ModuleConfig::load_validated(Path::new("loopback.toml"))?;
//!     println!("Module: {}", config.name);
//!     Ok(())
//! }
//! ```

use crate::consts::{DEFAULT_RT_PRIORITY, DEFAULT_SHM_ROOT, MAX_SEGMENT_NAME_LEN};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Scheduling settings for the cycle and trigger threads.
///
/// # TOML Example
///
/// ```toml
/// [realtime]
/// drives_realtime_clock = false
/// realtime_cores = [2, 3]
/// priority = 80
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// The module ticks the controller's cycle clock instead of following it.
    pub drives_realtime_clock: bool,
    /// CPUs the realtime threads are pinned to. Empty means "use the CLI flag".
    pub realtime_cores: Vec<usize>,
    /// SCHED_FIFO priority of realtime threads.
    pub priority: i32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            drives_realtime_clock: false,
            realtime_cores: Vec::new(),
            priority: DEFAULT_RT_PRIORITY,
        }
    }
}

/// Static configuration of one hardware module process.
///
/// # TOML Example
///
/// ```toml
/// name = "loopback"
/// shared_memory_namespace = "cell_1"
/// log_level = "debug"
///
/// [realtime]
/// realtime_cores = [2]
///
/// [module]
/// num_dofs = 6
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Module name, used in segment and trigger names.
    pub name: String,

    /// Prefix separating several robots on one host.
    #[serde(default)]
    pub shared_memory_namespace: String,

    /// Directory holding the segment files.
    #[serde(default = "default_shm_root")]
    pub shared_memory_root: PathBuf,

    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Scheduling settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Driver-specific settings, decoded by [`ModuleConfig::module_config`].
    #[serde(default)]
    pub module: toml::Table,
}

fn default_shm_root() -> PathBuf {
    PathBuf::from(DEFAULT_SHM_ROOT)
}

impl ModuleConfig {
    /// Minimal configuration with defaults for everything but the name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared_memory_namespace: String::new(),
            shared_memory_root: default_shm_root(),
            log_level: LogLevel::default(),
            realtime: RealtimeConfig::default(),
            module: toml::Table::new(),
        }
    }

    /// Load from `path` and validate.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `name` is empty, contains `/` or is too long for a segment name
    /// - `shared_memory_namespace` contains `/`
    /// - `realtime.priority` is outside `1..=99`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "name cannot be empty".to_string(),
            ));
        }
        if self.name.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "name \"{}\" can't have forward slashes",
                self.name
            )));
        }
        if self.name.len() >= MAX_SEGMENT_NAME_LEN {
            return Err(ConfigError::ValidationError(format!(
                "name \"{}\" can't exceed {} characters",
                self.name,
                MAX_SEGMENT_NAME_LEN - 1
            )));
        }
        if self.shared_memory_namespace.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "shared_memory_namespace \"{}\" can't have forward slashes",
                self.shared_memory_namespace
            )));
        }
        if !(1..=99).contains(&self.realtime.priority) {
            return Err(ConfigError::ValidationError(format!(
                "realtime.priority {} outside 1..=99",
                self.realtime.priority
            )));
        }
        Ok(())
    }

    /// Decode the `[module]` table into a driver-specific type.
    pub fn module_config<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        toml::Value::Table(self.module.clone())
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Any serde-deserializable struct can use ConfigLoader.
impl<T: DeserializeOwned> ConfigLoader for T {}

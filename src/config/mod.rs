//! Configuration system for cwm-incremental
//!
//! Supports:
//! - TOML configuration files
//! - Environment variable overrides
//! - Maintenance profiles (fast, exact, safe)
//! - Multiple config file locations
//!
//! # Configuration File Locations
//!
//! Configuration files are searched in order (first found wins):
//! 1. `./cwm-incremental.toml` - Project-local configuration
//! 2. `~/.config/cwm-incremental/config.toml` - User configuration (XDG)
//! 3. `~/.cwm-incremental/config.toml` - User configuration (legacy)
//! 4. `/etc/cwm-incremental/config.toml` - System-wide configuration
//!
//! # Environment Variables
//!
//! - `CWM_STRATEGY` - Deletion strategy (dred, fbf)
//! - `CWM_WORKERS` - Worker thread count (0 = one per core)
//! - `CWM_BY_LEVELS` - Process stratification levels one at a time (true/false)
//! - `CWM_EQUALITY` - Equality mode (off, no-una, una)
//! - `CWM_MONITOR` - Monitor kind (off, tracing, record)
//! - `CWM_LOG_LEVEL` - Logging verbosity (quiet, normal, verbose, debug)
//!
//! # Example Configuration
//!
//! ```toml
//! [general]
//! log_level = "normal"
//!
//! [maintenance]
//! strategy = "fbf"
//! workers = 0
//! by_levels = true
//! monitor = "tracing"
//!
//! [equality]
//! mode = "off"
//! ```

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Configuration Schema
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CwmConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Incremental maintenance settings
    pub maintenance: MaintenanceConfig,
    /// Equality reasoning settings
    pub equality: EqualityConfig,
    /// User-defined profiles
    pub profiles: HashMap<String, ProfileConfig>,
}

/// General configuration options
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GeneralConfig {
    /// Logging level
    pub log_level: LogLevel,
}

/// Incremental maintenance options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Deletion strategy
    pub strategy: Strategy,
    /// Worker threads for the multithreaded tasks (0 = one per core)
    pub workers: usize,
    /// Process the rule set one stratification level at a time
    pub by_levels: bool,
    /// Which monitor receives maintenance events
    pub monitor: MonitorKind,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Fbf,
            workers: 0,
            by_levels: true,
            monitor: MonitorKind::Off,
        }
    }
}

impl MaintenanceConfig {
    /// Worker count with `0` resolved to the available parallelism
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers
        }
    }
}

/// Equality reasoning options
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EqualityConfig {
    /// How `owl:sameAs` is treated
    pub mode: EqualityMode,
}

/// A named profile overriding parts of the maintenance section
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProfileConfig {
    pub strategy: Option<Strategy>,
    pub workers: Option<usize>,
    pub by_levels: Option<bool>,
    pub equality: Option<EqualityMode>,
    pub description: Option<String>,
}

// ============================================================================
// Enum Types
// ============================================================================

/// Logging verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "quiet" | "q" | "0" => Some(LogLevel::Quiet),
            "normal" | "n" | "1" => Some(LogLevel::Normal),
            "verbose" | "v" | "2" => Some(LogLevel::Verbose),
            "debug" | "d" | "3" => Some(LogLevel::Debug),
            _ => None,
        }
    }

    /// The `tracing` filter directive for this level
    pub fn filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Quiet => "error",
            LogLevel::Normal => "warn",
            LogLevel::Verbose => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Strategy used to decide whether a deletion candidate stays deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Delete/rederive: overdelete, then restore what is still derivable
    Dred,
    /// Backward/forward: prove each candidate before deleting it
    #[default]
    Fbf,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Dred => "dred",
            Strategy::Fbf => "fbf",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dred" | "delete-rederive" => Some(Strategy::Dred),
            "fbf" | "backward-forward" | "bf" => Some(Strategy::Fbf),
            _ => None,
        }
    }
}

/// Treatment of `owl:sameAs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EqualityMode {
    /// `owl:sameAs` is an ordinary property
    #[default]
    Off,
    /// Equality by rewriting, without the unique name assumption
    NoUna,
    /// Equality by rewriting; distinct IRIs may not be merged
    Una,
}

impl EqualityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EqualityMode::Off => "off",
            EqualityMode::NoUna => "no-una",
            EqualityMode::Una => "una",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" | "false" => Some(EqualityMode::Off),
            "no-una" | "nouna" | "on" | "true" => Some(EqualityMode::NoUna),
            "una" => Some(EqualityMode::Una),
            _ => None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self != EqualityMode::Off
    }

    pub fn unique_name_assumption(&self) -> bool {
        *self == EqualityMode::Una
    }
}

/// Which monitor observes maintenance events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    #[default]
    Off,
    Tracing,
    Record,
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Off => "off",
            MonitorKind::Tracing => "tracing",
            MonitorKind::Record => "record",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "off" | "none" => Some(MonitorKind::Off),
            "tracing" | "log" => Some(MonitorKind::Tracing),
            "record" | "events" => Some(MonitorKind::Record),
            _ => None,
        }
    }
}

fn parse_bool(val: &str) -> bool {
    val == "true" || val == "1" || val == "yes"
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl CwmConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the first file found, then apply env overrides
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for path in Self::config_paths() {
            if path.exists() {
                config = Self::load_from_file(&path)?;
                break;
            }
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.clone(), e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(path.clone(), e.to_string()))
    }

    /// Load configuration from a TOML string
    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content)
            .map_err(|e| ConfigError::ParseError(PathBuf::from("<string>"), e.to_string()))
    }

    /// Config file search paths, in priority order
    pub fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("./cwm-incremental.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("cwm-incremental").join("config.toml"));
        }

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".cwm-incremental").join("config.toml"));
        }

        #[cfg(unix)]
        paths.push(PathBuf::from("/etc/cwm-incremental/config.toml"));

        paths
    }

    /// Apply `CWM_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CWM_STRATEGY") {
            if let Some(strategy) = Strategy::from_str(&val) {
                self.maintenance.strategy = strategy;
            }
        }

        if let Ok(val) = env::var("CWM_WORKERS") {
            if let Ok(workers) = val.parse::<usize>() {
                self.maintenance.workers = workers;
            }
        }

        if let Ok(val) = env::var("CWM_BY_LEVELS") {
            self.maintenance.by_levels = parse_bool(&val);
        }

        if let Ok(val) = env::var("CWM_EQUALITY") {
            if let Some(mode) = EqualityMode::from_str(&val) {
                self.equality.mode = mode;
            }
        }

        if let Ok(val) = env::var("CWM_MONITOR") {
            if let Some(kind) = MonitorKind::from_str(&val) {
                self.maintenance.monitor = kind;
            }
        }

        if let Ok(val) = env::var("CWM_LOG_LEVEL") {
            if let Some(level) = LogLevel::from_str(&val) {
                self.general.log_level = level;
            }
        }
    }

    /// Apply a built-in or user-defined profile
    pub fn apply_profile(&mut self, name: &str) -> Result<(), ConfigError> {
        match name {
            "fast" => {
                self.maintenance.strategy = Strategy::Dred;
                self.maintenance.workers = 0;
                self.equality.mode = EqualityMode::Off;
                return Ok(());
            }
            "exact" => {
                self.maintenance.strategy = Strategy::Fbf;
                return Ok(());
            }
            "safe" => {
                self.maintenance.strategy = Strategy::Fbf;
                self.maintenance.workers = 1;
                return Ok(());
            }
            _ => {}
        }

        if let Some(custom) = self.profiles.get(name).cloned() {
            if let Some(strategy) = custom.strategy {
                self.maintenance.strategy = strategy;
            }
            if let Some(workers) = custom.workers {
                self.maintenance.workers = workers;
            }
            if let Some(by_levels) = custom.by_levels {
                self.maintenance.by_levels = by_levels;
            }
            if let Some(mode) = custom.equality {
                self.equality.mode = mode;
            }
            return Ok(());
        }

        Err(ConfigError::UnknownProfile(name.to_string()))
    }

    /// Built-in and custom profiles with their descriptions
    pub fn available_profiles(&self) -> Vec<(&str, &str)> {
        let mut profiles = vec![
            ("fast", "DRed deletion on every core, no equality"),
            ("exact", "Backward/forward deletion"),
            ("safe", "Backward/forward deletion on a single worker"),
        ];

        for (name, config) in &self.profiles {
            let desc = config.description.as_deref().unwrap_or("Custom profile");
            profiles.push((name.as_str(), desc));
        }

        profiles
    }

    /// Serialize configuration to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let content = self.to_toml()?;
        fs::write(path, content).map_err(|e| ConfigError::IoError(path.clone(), e.to_string()))
    }

    /// Commented default configuration file content
    pub fn default_config_content() -> &'static str {
        r#"# cwm-incremental configuration file

[general]
# Logging level: quiet, normal, verbose, debug
log_level = "normal"

[maintenance]
# Deletion strategy: dred, fbf
strategy = "fbf"
# Worker threads for multithreaded tasks (0 = one per core)
workers = 0
# Process stratification levels one at a time
by_levels = true
# Monitor: off, tracing, record
monitor = "off"

[equality]
# Equality mode: off, no-una, una
mode = "off"

# Custom profiles:
# [profiles.nightly]
# strategy = "dred"
# workers = 16
# description = "Bulk retraction window"
"#
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG`, defaulting to `level`
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.filter_directive()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration loading errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {1}", .0.display())]
    IoError(PathBuf, String),
    #[error("Parse error in {}: {1}", .0.display())]
    ParseError(PathBuf, String),
    #[error("Serialization error: {0}")]
    SerializeError(String),
    #[error("Unknown profile: {0}")]
    UnknownProfile(String),
}

impl From<ConfigError> for crate::error::CwmError {
    fn from(err: ConfigError) -> Self {
        use crate::error::{CwmError, ErrorCode};
        let code = match &err {
            ConfigError::IoError(..) => ErrorCode::ConfigNotFound,
            ConfigError::ParseError(..) => ErrorCode::InvalidConfigSyntax,
            ConfigError::SerializeError(_) => ErrorCode::ConfigError,
            ConfigError::UnknownProfile(_) => ErrorCode::UnknownProfile,
        };
        CwmError::new(code, err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

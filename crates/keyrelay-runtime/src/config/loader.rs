//! Configuration loader with hierarchical merging.
//!
//! # Load Order
//!
//! 1. Default values (compile-time)
//! 2. Global config (`~/.keyrelay/config.toml`)
//! 3. Project config (`.keyrelay/config.toml`)
//! 4. Environment variables (`KEYRELAY_*`)
//!
//! Each layer overrides the previous.

use super::{
    default_config_path, ConfigError, KeyrelayConfig, PROJECT_CONFIG_DIR, PROJECT_CONFIG_FILE,
};
use crate::device::DeviceKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Parses a boolean variable through `$lookup` into `$field`.
macro_rules! parse_env_bool {
    ($lookup:expr, $field:expr, $var:literal) => {
        if let Some(val) = $lookup($var) {
            $field = parse_bool(&val)
                .ok_or_else(|| ConfigError::invalid_env_var($var, "expected bool"))?;
        }
    };
}

/// Loads [`KeyrelayConfig`] from files and the environment.
///
/// # Example
///
/// ```
/// use keyrelay_runtime::config::ConfigLoader;
///
/// let config = ConfigLoader::new()
///     .skip_global_config()
///     .skip_project_config()
///     .skip_env_vars()
///     .load()
///     .unwrap();
/// assert!(config.input.console);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    /// Global config file path (defaults to ~/.keyrelay/config.toml).
    global_config_path: Option<PathBuf>,

    project_root: Option<PathBuf>,

    skip_env: bool,

    skip_global: bool,

    skip_project: bool,
}

impl ConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_global_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Project config will be loaded from `<project_root>/.keyrelay/config.toml`.
    #[must_use]
    pub fn with_project_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.project_root = Some(path.into());
        self
    }

    #[must_use]
    pub fn skip_env_vars(mut self) -> Self {
        self.skip_env = true;
        self
    }

    #[must_use]
    pub fn skip_global_config(mut self) -> Self {
        self.skip_global = true;
        self
    }

    #[must_use]
    pub fn skip_project_config(mut self) -> Self {
        self.skip_project = true;
        self
    }

    /// Loads and merges configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a config file exists but cannot be read
    /// or parsed, or an environment variable is malformed. Missing files
    /// are skipped.
    pub fn load(&self) -> Result<KeyrelayConfig, ConfigError> {
        let mut config = KeyrelayConfig::default();

        if !self.skip_global {
            let global_path = self
                .global_config_path
                .clone()
                .unwrap_or_else(default_config_path);

            if let Some(global) = load_file(&global_path)? {
                debug!(path = %global_path.display(), "Loaded global config");
                config.merge(&global);
            }
        }

        if !self.skip_project {
            if let Some(ref root) = self.project_root {
                let path = root.join(PROJECT_CONFIG_DIR).join(PROJECT_CONFIG_FILE);
                if let Some(project) = load_file(&path)? {
                    debug!(path = %path.display(), "Loaded project config");
                    config.merge(&project);
                }
            }
        }

        if !self.skip_env {
            apply_env_vars(&mut config, |name| std::env::var(name).ok())?;
        }

        Ok(config)
    }
}

/// Loads a config file, returning None if it doesn't exist.
fn load_file(path: &Path) -> Result<Option<KeyrelayConfig>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
    let config = KeyrelayConfig::from_toml(&content).map_err(|e| ConfigError::parse_toml(path, e))?;
    Ok(Some(config))
}

/// Applies `KEYRELAY_*` overrides read through `lookup`.
fn apply_env_vars(
    config: &mut KeyrelayConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    parse_env_bool!(lookup, config.input.console, "KEYRELAY_CONSOLE");
    parse_env_bool!(lookup, config.events.auto_publish, "KEYRELAY_AUTO_PUBLISH");
    parse_env_bool!(lookup, config.events.trace, "KEYRELAY_TRACE_EVENTS");
    parse_env_bool!(lookup, config.logging.file, "KEYRELAY_LOG_FILE");

    if let Some(val) = lookup("KEYRELAY_MODE") {
        config.mode = val
            .parse::<DeviceKind>()
            .map_err(|e| ConfigError::invalid_env_var("KEYRELAY_MODE", e))?;
    }
    if let Some(val) = lookup("KEYRELAY_LAYOUT") {
        config.local.layout = val;
    }
    if let Some(val) = lookup("KEYRELAY_SERIAL_TCP") {
        config.serial.tcp = Some(val);
    }

    if let Some(val) = lookup("KEYRELAY_SERIAL_DEVICE") {
        config.serial.device = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("KEYRELAY_LOG_SINK") {
        config.log_sink.path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("KEYRELAY_WATCH_FILE") {
        config.input.watch_file = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("KEYRELAY_LOG_DIR") {
        config.logging.dir = Some(PathBuf::from(val));
    }

    Ok(())
}

/// Accepts `true/false`, `1/0`, `yes/no`, `on/off` (case-insensitive).
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Writes `config` to the global config file, creating its directory.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be written.
pub fn save_global_config(config: &KeyrelayConfig) -> Result<(), ConfigError> {
    save_config(config, &default_config_path())
}

/// Writes `config` to `path`, creating the parent directory.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be written.
pub fn save_config(config: &KeyrelayConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
    }
    let toml = config.to_toml()?;
    std::fs::write(path, toml).map_err(|e| ConfigError::write_file(path, e))
}

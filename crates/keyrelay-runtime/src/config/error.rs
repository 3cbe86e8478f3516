//! Configuration errors.
//!
//! # Error Codes
//!
//! | Variant | Code |
//! |---------|------|
//! | [`ConfigError::ReadFile`] | `CONFIG_READ_FILE` |
//! | [`ConfigError::ParseToml`] | `CONFIG_PARSE` |
//! | [`ConfigError::Serialize`] | `CONFIG_SERIALIZE` |
//! | [`ConfigError::WriteFile`] | `CONFIG_WRITE_FILE` |
//! | [`ConfigError::InvalidEnvVar`] | `CONFIG_INVALID_ENV_VAR` |
//! | [`ConfigError::CreateDir`] | `CONFIG_CREATE_DIR` |
//!
//! None are recoverable: the file or variable has to be fixed first.

use keyrelay_types::ErrorCode;
use std::path::PathBuf;
use thiserror::Error;

/// Failure loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A `KEYRELAY_*` variable holds a value of the wrong shape.
    #[error("invalid value for environment variable '{name}': {message}")]
    InvalidEnvVar { name: String, message: String },

    #[error("failed to create config directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFile {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_env_var(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEnvVar {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CreateDir {
            path: path.into(),
            source,
        }
    }
}

impl ErrorCode for ConfigError {
    fn code(&self) -> &'static str {
        match self {
            Self::ReadFile { .. } => "CONFIG_READ_FILE",
            Self::ParseToml { .. } => "CONFIG_PARSE",
            Self::Serialize(_) => "CONFIG_SERIALIZE",
            Self::WriteFile { .. } => "CONFIG_WRITE_FILE",
            Self::InvalidEnvVar { .. } => "CONFIG_INVALID_ENV_VAR",
            Self::CreateDir { .. } => "CONFIG_CREATE_DIR",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrelay_types::assert_error_codes;
    use std::error::Error as _;
    use std::io;

    fn all_variants() -> Vec<ConfigError> {
        let parse = toml::from_str::<toml::Value>("mode = ").unwrap_err();
        vec![
            ConfigError::read_file("/a", io::Error::from(io::ErrorKind::NotFound)),
            ConfigError::parse_toml("/a", parse),
            ConfigError::write_file("/a", io::Error::from(io::ErrorKind::PermissionDenied)),
            ConfigError::invalid_env_var("KEYRELAY_MODE", "unknown device kind"),
            ConfigError::create_dir("/a", io::Error::from(io::ErrorKind::PermissionDenied)),
        ]
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(&all_variants(), "CONFIG_");
    }

    #[test]
    fn env_var_error_names_variable() {
        let err = ConfigError::invalid_env_var("KEYRELAY_CONSOLE", "expected bool");
        assert!(err.to_string().contains("KEYRELAY_CONSOLE"));
        assert!(err.to_string().contains("expected bool"));
    }

    #[test]
    fn parse_error_chains_source() {
        let source = toml::from_str::<toml::Value>("mode = ").unwrap_err();
        let err = ConfigError::parse_toml("/tmp/config.toml", source);
        assert!(err.to_string().contains("/tmp/config.toml"));
        assert!(err.source().is_some());
    }
}

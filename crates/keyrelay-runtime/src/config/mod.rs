//! Configuration management with hierarchical layering.
//!
//! # Architecture
//!
//! ```text
//! Priority (highest to lowest):
//!
//! ┌─────────────────────────────────────────────┐
//! │  1. ConfigResolver (CLI flags)              │  Launch override
//! ├─────────────────────────────────────────────┤
//! │  2. Environment Variables (KEYRELAY_*)      │  Runtime override
//! ├─────────────────────────────────────────────┤
//! │  3. Project Config (.keyrelay/config.toml)  │  Project-specific
//! ├─────────────────────────────────────────────┤
//! │  4. Global Config (~/.keyrelay/config.toml) │  User defaults
//! ├─────────────────────────────────────────────┤
//! │  5. Default Values (compile-time)           │  Fallback
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Config Field | Type |
//! |----------|--------------|------|
//! | `KEYRELAY_MODE` | `mode` | device kind |
//! | `KEYRELAY_SERIAL_DEVICE` | `serial.device` | PathBuf |
//! | `KEYRELAY_SERIAL_TCP` | `serial.tcp` | String |
//! | `KEYRELAY_LAYOUT` | `local.layout` | String |
//! | `KEYRELAY_LOG_SINK` | `log_sink.path` | PathBuf |
//! | `KEYRELAY_CONSOLE` | `input.console` | bool |
//! | `KEYRELAY_WATCH_FILE` | `input.watch_file` | PathBuf |
//! | `KEYRELAY_AUTO_PUBLISH` | `events.auto_publish` | bool |
//! | `KEYRELAY_TRACE_EVENTS` | `events.trace` | bool |
//! | `KEYRELAY_LOG_FILE` | `logging.file` | bool |
//! | `KEYRELAY_LOG_DIR` | `logging.dir` | PathBuf |
//!
//! # Example Configuration
//!
//! ```toml
//! # ~/.keyrelay/config.toml
//! mode = "serial"
//!
//! [serial]
//! device = "/dev/ttyACM0"
//! ready_token = "READY"
//! busy_token = "BUSY"
//!
//! [processor]
//! interrupt_timeout_ms = 2000
//!
//! [processor.timeouts]
//! short_ms = 1000
//! per_char_ms = 50
//! max_ms = 30000
//!
//! [local]
//! layout = "de"
//! char_delay_ms = 10
//!
//! [input]
//! console = true
//! watch_file = "/tmp/keyrelay-commands.txt"
//! ```

mod error;
mod loader;
mod resolver;
mod types;

pub use error::ConfigError;
pub use loader::{save_config, save_global_config, ConfigLoader};
pub use resolver::{ConfigResolver, NoOpResolver};
pub use types::{
    EventsConfig, InputConfig, KeyrelayConfig, LocalConfig, LogSinkConfig, LoggingConfig,
    ProcessorConfig, SerialConfig, TasksConfig,
};

/// Default global config directory.
pub fn default_config_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".keyrelay")
}

/// Default global config file path.
pub fn default_config_path() -> std::path::PathBuf {
    default_config_dir().join(PROJECT_CONFIG_FILE)
}

/// Project config directory name.
pub const PROJECT_CONFIG_DIR: &str = ".keyrelay";

/// Project config file name.
pub const PROJECT_CONFIG_FILE: &str = "config.toml";

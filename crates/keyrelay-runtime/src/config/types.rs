//! Configuration types.
//!
//! All types implement [`Default`] for compile-time fallback values.

use super::default_config_dir;
use crate::device::{DeviceKind, KeyLayout, SerialSettings};
use crate::processor::{ProcessorSettings, TimeoutPolicy};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure.
///
/// This is the unified configuration after merging all layers.
///
/// # Example
///
/// ```
/// use keyrelay_runtime::config::KeyrelayConfig;
/// use keyrelay_runtime::DeviceKind;
///
/// let config = KeyrelayConfig::from_toml("mode = \"serial\"").unwrap();
/// assert_eq!(config.mode, DeviceKind::Serial);
/// assert_eq!(config.local.layout, "us");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeyrelayConfig {
    /// Active output device.
    pub mode: DeviceKind,

    pub processor: ProcessorConfig,

    pub serial: SerialConfig,

    pub local: LocalConfig,

    pub log_sink: LogSinkConfig,

    pub events: EventsConfig,

    pub tasks: TasksConfig,

    pub input: InputConfig,

    pub logging: LoggingConfig,
}

impl Default for KeyrelayConfig {
    fn default() -> Self {
        Self {
            mode: DeviceKind::LogSink,
            processor: ProcessorConfig::default(),
            serial: SerialConfig::default(),
            local: LocalConfig::default(),
            log_sink: LogSinkConfig::default(),
            events: EventsConfig::default(),
            tasks: TasksConfig::default(),
            input: InputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl KeyrelayConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes to TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Deserializes from TOML string.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Merges another config into this one.
    ///
    /// Values from `other` override values in `self` only if they
    /// differ from the default.
    pub fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.mode != default.mode {
            self.mode = other.mode;
        }

        self.processor.merge(&other.processor);
        self.serial.merge(&other.serial);
        self.local.merge(&other.local);
        self.log_sink.merge(&other.log_sink);
        self.events.merge(&other.events);
        self.tasks.merge(&other.tasks);
        self.input.merge(&other.input);
        self.logging.merge(&other.logging);
    }
}

/// Command processor tunables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Deadline for delivering STOP/PAUSE/RESUME/RESET to the device.
    pub interrupt_timeout_ms: u64,

    /// Time shutdown waits for the processor tasks.
    pub shutdown_grace_ms: u64,

    /// Per-command deadlines (`[processor.timeouts]`).
    pub timeouts: TimeoutPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        let settings = ProcessorSettings::default();
        Self {
            interrupt_timeout_ms: settings.interrupt_timeout.as_millis() as u64,
            shutdown_grace_ms: settings.shutdown_grace.as_millis() as u64,
            timeouts: settings.timeouts,
        }
    }
}

impl ProcessorConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.timeouts.short_ms != default.timeouts.short_ms {
            self.timeouts.short_ms = other.timeouts.short_ms;
        }
        if other.timeouts.per_char_ms != default.timeouts.per_char_ms {
            self.timeouts.per_char_ms = other.timeouts.per_char_ms;
        }
        if other.timeouts.max_ms != default.timeouts.max_ms {
            self.timeouts.max_ms = other.timeouts.max_ms;
        }
        if other.interrupt_timeout_ms != default.interrupt_timeout_ms {
            self.interrupt_timeout_ms = other.interrupt_timeout_ms;
        }
        if other.shutdown_grace_ms != default.shutdown_grace_ms {
            self.shutdown_grace_ms = other.shutdown_grace_ms;
        }
    }

    #[must_use]
    pub fn settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            timeouts: self.timeouts,
            interrupt_timeout: Duration::from_millis(self.interrupt_timeout_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }
}

/// Serial device transport and flow-control tokens.
///
/// Exactly one of `device` and `tcp` is expected when the mode is
/// `serial`; `tcp` wins if both are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SerialConfig {
    /// Device file, e.g. `/dev/ttyACM0`.
    pub device: Option<PathBuf>,

    /// `host:port` of a serial-over-network bridge.
    pub tcp: Option<String>,

    pub ready_token: String,

    pub busy_token: String,

    pub connect_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let wire = SerialSettings::default();
        Self {
            device: None,
            tcp: None,
            ready_token: wire.ready_token,
            busy_token: wire.busy_token,
            connect_timeout_ms: 3_000,
        }
    }
}

impl SerialConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.device.is_some() {
            self.device = other.device.clone();
        }
        if other.tcp.is_some() {
            self.tcp = other.tcp.clone();
        }
        if other.ready_token != default.ready_token {
            self.ready_token = other.ready_token.clone();
        }
        if other.busy_token != default.busy_token {
            self.busy_token = other.busy_token.clone();
        }
        if other.connect_timeout_ms != default.connect_timeout_ms {
            self.connect_timeout_ms = other.connect_timeout_ms;
        }
    }

    #[must_use]
    pub fn settings(&self) -> SerialSettings {
        SerialSettings {
            ready_token: self.ready_token.clone(),
            busy_token: self.busy_token.clone(),
            ..SerialSettings::default()
        }
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Local key injector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocalConfig {
    /// Keyboard layout name (`us`, `de`).
    pub layout: String,

    /// Delay after every key stroke.
    pub char_delay_ms: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            layout: "us".into(),
            char_delay_ms: 10,
        }
    }
}

impl LocalConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.layout != default.layout {
            self.layout = other.layout.clone();
        }
        if other.char_delay_ms != default.char_delay_ms {
            self.char_delay_ms = other.char_delay_ms;
        }
    }

    /// Resolves the layout, if the name is known.
    #[must_use]
    pub fn key_layout(&self) -> Option<KeyLayout> {
        KeyLayout::by_name(&self.layout)
    }

    #[must_use]
    pub fn char_delay(&self) -> Duration {
        Duration::from_millis(self.char_delay_ms)
    }
}

/// Log sink device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogSinkConfig {
    /// Output file. Defaults to `~/.keyrelay/commands.jsonl`.
    pub path: Option<PathBuf>,
}

impl LogSinkConfig {
    fn merge(&mut self, other: &Self) {
        if other.path.is_some() {
            self.path = other.path.clone();
        }
    }

    #[must_use]
    pub fn path_or_default(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| default_config_dir().join("commands.jsonl"))
    }
}

/// Event fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast buffer per subscriber; slower subscribers lose events.
    pub capacity: usize,

    /// Publish events as they are emitted.
    pub auto_publish: bool,

    /// Write the event trail to the log.
    pub trace: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: keyrelay_event::DEFAULT_EVENT_CAPACITY,
            auto_publish: true,
            trace: true,
        }
    }
}

impl EventsConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.capacity != default.capacity {
            self.capacity = other.capacity;
        }
        if other.auto_publish != default.auto_publish {
            self.auto_publish = other.auto_publish;
        }
        if other.trace != default.trace {
            self.trace = other.trace;
        }
    }
}

/// Task supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TasksConfig {
    pub startup_window_ms: u64,

    pub shutdown_grace_ms: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            startup_window_ms: crate::tasks::DEFAULT_STARTUP_WINDOW.as_millis() as u64,
            shutdown_grace_ms: crate::tasks::DEFAULT_SHUTDOWN_GRACE.as_millis() as u64,
        }
    }
}

impl TasksConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.startup_window_ms != default.startup_window_ms {
            self.startup_window_ms = other.startup_window_ms;
        }
        if other.shutdown_grace_ms != default.shutdown_grace_ms {
            self.shutdown_grace_ms = other.shutdown_grace_ms;
        }
    }

    #[must_use]
    pub fn supervisor(&self) -> crate::tasks::TaskSupervisor {
        crate::tasks::TaskSupervisor::new(Duration::from_millis(self.startup_window_ms))
            .with_shutdown_grace(Duration::from_millis(self.shutdown_grace_ms))
    }
}

/// Input adapters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InputConfig {
    /// Read commands from stdin.
    pub console: bool,

    /// Command file to poll.
    pub watch_file: Option<PathBuf>,

    pub poll_interval_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            console: true,
            watch_file: None,
            poll_interval_ms: crate::io::DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

impl InputConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.console != default.console {
            self.console = other.console;
        }
        if other.watch_file.is_some() {
            self.watch_file = other.watch_file.clone();
        }
        if other.poll_interval_ms != default.poll_interval_ms {
            self.poll_interval_ms = other.poll_interval_ms;
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// File logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to `<dir>/keyrelay.log`.
    pub file: bool,

    /// Filter directive for the file, independent of the terminal.
    pub file_level: String,

    /// Log directory. Defaults to `~/.keyrelay/logs`.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: false,
            file_level: "info".into(),
            dir: None,
        }
    }
}

impl LoggingConfig {
    fn merge(&mut self, other: &Self) {
        let default = Self::default();

        if other.file != default.file {
            self.file = other.file;
        }
        if other.file_level != default.file_level {
            self.file_level = other.file_level.clone();
        }
        if other.dir.is_some() {
            self.dir = other.dir.clone();
        }
    }

    #[must_use]
    pub fn dir_or_default(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| default_config_dir().join("logs"))
    }
}

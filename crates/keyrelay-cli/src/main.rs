//! keyrelay - keyboard command relay
//!
//! Reads keyboard commands (`key:ENTER`, `text:hello`, `STOP`, ...) from the
//! console, a watched file or the command line and hands them to the active
//! output device.
//!
//! # Configuration
//!
//! Configuration is loaded from multiple sources with priority:
//!
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`KEYRELAY_*`)
//! 3. Project config (`.keyrelay/config.toml` in the project directory)
//! 4. Global config (`~/.keyrelay/config.toml`)
//! 5. Default values (lowest priority)
//!
//! # Modes
//!
//! - `keyrelay key:A text:hi`: submits the arguments as one batch, waits
//!   for them to be processed, exits
//! - `keyrelay`: reads commands line by line until end of input or Ctrl-C

mod app;
mod tracing_writer;

use anyhow::Result;
use app::App;
use clap::Parser;
use keyrelay_runtime::config::{ConfigError, ConfigLoader, ConfigResolver, KeyrelayConfig};
use keyrelay_runtime::DeviceKind;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// keyrelay - keyboard command relay
#[derive(Parser, Debug)]
#[command(name = "keyrelay")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Project root directory (defaults to current directory)
    #[arg(short = 'C', long)]
    project: Option<PathBuf>,

    /// Output device: serial, local or log_sink (also: KEYRELAY_MODE)
    #[arg(short, long)]
    mode: Option<DeviceKind>,

    /// Serial device path, e.g. /dev/ttyACM0 (also: KEYRELAY_SERIAL_DEVICE)
    #[arg(long, value_name = "PATH")]
    device: Option<PathBuf>,

    /// Serial bridge address HOST:PORT (also: KEYRELAY_SERIAL_TCP)
    #[arg(long, value_name = "ADDR")]
    tcp: Option<String>,

    /// Keyboard layout for local typing (also: KEYRELAY_LAYOUT)
    #[arg(long)]
    layout: Option<String>,

    /// Log sink file (also: KEYRELAY_LOG_SINK)
    #[arg(long, value_name = "PATH")]
    log_sink: Option<PathBuf>,

    /// Poll this file for commands (also: KEYRELAY_WATCH_FILE)
    #[arg(long, value_name = "PATH")]
    watch: Option<PathBuf>,

    /// Do not read commands from stdin
    #[arg(long)]
    no_console: bool,

    /// Do not write the event trail to the log
    #[arg(long)]
    no_trace: bool,

    /// Enable file logging into DIR (also: KEYRELAY_LOG_DIR)
    #[arg(long, value_name = "DIR")]
    log_file: Option<PathBuf>,

    /// Override file log level (default: info)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Save the resolved configuration as the global config and exit
    #[arg(long)]
    write_config: bool,

    /// Commands to submit as one batch (optional)
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

/// CLI-based configuration resolver.
///
/// Loads file/env config via [`ConfigLoader`] and applies CLI argument
/// overrides as the highest-priority layer.
struct CliConfigResolver {
    project_root: PathBuf,
    mode: Option<DeviceKind>,
    serial_device: Option<PathBuf>,
    tcp: Option<String>,
    layout: Option<String>,
    log_sink: Option<PathBuf>,
    watch: Option<PathBuf>,
    no_console: bool,
    no_trace: bool,
    log_file: Option<PathBuf>,
    log_level: Option<String>,
}

impl CliConfigResolver {
    fn from_args(args: &Args) -> Self {
        let project_root = args.project.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to get current directory, using '.'");
                PathBuf::from(".")
            })
        });

        Self {
            project_root,
            mode: args.mode,
            serial_device: args.device.clone(),
            tcp: args.tcp.clone(),
            layout: args.layout.clone(),
            log_sink: args.log_sink.clone(),
            watch: args.watch.clone(),
            no_console: args.no_console,
            no_trace: args.no_trace,
            log_file: args.log_file.clone(),
            log_level: args.log_level.clone(),
        }
    }

    fn resolve(&self) -> Result<KeyrelayConfig, ConfigError> {
        let mut config = ConfigLoader::new()
            .with_project_root(&self.project_root)
            .load()?;
        self.apply(&mut config);
        Ok(config)
    }
}

impl ConfigResolver for CliConfigResolver {
    fn apply(&self, config: &mut KeyrelayConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(ref p) = self.serial_device {
            config.serial.device = Some(p.clone());
        }
        if let Some(ref addr) = self.tcp {
            config.serial.tcp = Some(addr.clone());
        }
        if let Some(ref layout) = self.layout {
            config.local.layout.clone_from(layout);
        }
        if let Some(ref p) = self.log_sink {
            config.log_sink.path = Some(p.clone());
        }
        if let Some(ref p) = self.watch {
            config.input.watch_file = Some(p.clone());
        }
        if self.no_console {
            config.input.console = false;
        }
        if self.no_trace {
            config.events.trace = false;
        }
        if let Some(ref dir) = self.log_file {
            config.logging.file = true;
            config.logging.dir = Some(dir.clone());
        }
        if let Some(ref level) = self.log_level {
            config.logging.file_level.clone_from(level);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let resolver = CliConfigResolver::from_args(&args);

    // Resolve config early: logging settings are needed before anything logs.
    let config = resolver
        .resolve()
        .map_err(|e| anyhow::anyhow!("Config error: {e}"))?;

    // Terminal filter: --debug > --verbose > RUST_LOG env > default "warn"
    // File filter:     config.logging.file_level, independent of the terminal
    let terminal_filter = if args.debug {
        EnvFilter::new("debug,tokio=warn")
    } else if args.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let terminal_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let log_file = if config.logging.file {
        match tracing_writer::open_log_file(&config.logging.dir_or_default()) {
            Ok(opened) => Some(opened),
            Err(e) => {
                eprintln!("Warning: cannot open log file: {e}");
                None
            }
        }
    } else {
        None
    };

    let log_path = if let Some((file, path)) = log_file {
        let file_layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(tracing_writer::FileMakeWriter::new(file));
        tracing_subscriber::registry()
            .with(terminal_layer.with_filter(terminal_filter))
            .with(file_layer.with_filter(EnvFilter::new(&config.logging.file_level)))
            .init();
        Some(path)
    } else {
        tracing_subscriber::registry()
            .with(terminal_layer.with_filter(terminal_filter))
            .init();
        None
    };

    info!(path = %resolver.project_root.display(), "Project root");
    if let Some(path) = log_path {
        info!(
            path = %path.display(),
            level = %config.logging.file_level,
            "File logging enabled"
        );
    }

    if args.write_config {
        app::write_global_config(&config)?;
        println!(
            "Wrote {}",
            keyrelay_runtime::config::default_config_path().display()
        );
        return Ok(());
    }

    let app = App::build(config).await?;

    if args.command.is_empty() {
        app.run_interactive().await?;
    } else {
        info!("Command mode: {}", args.command.join(" | "));
        let exit_code = app.run_command(&args.command).await?;
        if exit_code != 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("keyrelay").chain(argv.iter().copied()))
    }

    fn resolver_in(dir: &std::path::Path, argv: &[&str]) -> CliConfigResolver {
        let mut resolver = CliConfigResolver::from_args(&args(argv));
        resolver.project_root = dir.to_path_buf();
        resolver
    }

    #[test]
    fn no_flags_preserve_loaded_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KeyrelayConfig::default();
        config.mode = DeviceKind::Serial;
        config.input.console = true;
        resolver_in(dir.path(), &[]).apply(&mut config);

        assert_eq!(config.mode, DeviceKind::Serial);
        assert!(config.input.console);
        assert!(config.events.trace);
        assert!(!config.logging.file);
    }

    #[test]
    fn flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(
            dir.path(),
            &[
                "--mode",
                "local",
                "--layout",
                "de",
                "--tcp",
                "127.0.0.1:7000",
                "--no-console",
                "--no-trace",
                "--watch",
                "/tmp/cmds.txt",
            ],
        );
        let mut config = KeyrelayConfig::default();
        resolver.apply(&mut config);

        assert_eq!(config.mode, DeviceKind::Local);
        assert_eq!(config.local.layout, "de");
        assert_eq!(config.serial.tcp.as_deref(), Some("127.0.0.1:7000"));
        assert!(!config.input.console);
        assert!(!config.events.trace);
        assert_eq!(config.input.watch_file, Some(PathBuf::from("/tmp/cmds.txt")));
    }

    #[test]
    fn log_file_flag_enables_file_logging() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(dir.path(), &["--log-file", "/var/log/kr", "--log-level", "debug"]);
        let mut config = KeyrelayConfig::default();
        resolver.apply(&mut config);

        assert!(config.logging.file);
        assert_eq!(config.logging.dir, Some(PathBuf::from("/var/log/kr")));
        assert_eq!(config.logging.file_level, "debug");
    }

    #[test]
    fn project_config_is_read_from_project_root() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join(".keyrelay");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[local]\nlayout = \"de\"\n").unwrap();

        let config = resolver_in(dir.path(), &[]).apply_to_project();
        assert_eq!(config.local.layout, "de");

        let config = resolver_in(dir.path(), &["--layout", "us"]).apply_to_project();
        assert_eq!(config.local.layout, "us");
    }

    #[test]
    fn mode_accepts_dashed_name() {
        assert_eq!(args(&["--mode", "log-sink"]).mode, Some(DeviceKind::LogSink));
        assert!(Args::try_parse_from(["keyrelay", "--mode", "typewriter"]).is_err());
    }

    #[test]
    fn trailing_commands_are_collected() {
        let parsed = args(&["-v", "key:A", "text:hello world", "STOP"]);
        assert!(parsed.verbose);
        assert_eq!(parsed.command, vec!["key:A", "text:hello world", "STOP"]);
    }

    impl CliConfigResolver {
        /// Project layer plus CLI flags, without global config or env.
        fn apply_to_project(&self) -> KeyrelayConfig {
            let mut config = ConfigLoader::new()
                .with_project_root(&self.project_root)
                .skip_global_config()
                .skip_env_vars()
                .load()
                .unwrap();
            self.apply(&mut config);
            config
        }
    }
}

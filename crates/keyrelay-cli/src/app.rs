//! Wiring of devices, service and input adapters for the binary.

use anyhow::{anyhow, Context, Result};
use keyrelay_event::{EventEmitter, TracingListener};
use keyrelay_runtime::config::KeyrelayConfig;
use keyrelay_runtime::device::{DeviceFileConnector, TcpConnector};
use keyrelay_runtime::{
    CommandService, ConsoleInput, FileWatchInput, LocalKeyboard, LogSinkDevice, OutputDevice,
    ProcessorError, ProcessorStatus, SerialDevice, TaskSupervisor,
};
use keyrelay_types::SourceActor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Status poll period while draining.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Added to the stall limit while draining.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Supervisor task names.
const CONSOLE_TASK: &str = "console";
const FILE_WATCH_TASK: &str = "file-watch";

/// The running application: one service plus its input loops.
pub struct App {
    config: KeyrelayConfig,
    service: Arc<CommandService>,
    supervisor: TaskSupervisor,
    trace_listener: Option<JoinHandle<()>>,
}

impl App {
    /// Builds every configured device and the service in front of them.
    ///
    /// # Errors
    ///
    /// An unknown keyboard layout.
    pub async fn build(config: KeyrelayConfig) -> Result<Self> {
        let emitter =
            EventEmitter::with_auto_publish(config.events.capacity, config.events.auto_publish);
        let trace_listener = config.events.trace.then(|| emitter.listen(TracingListener));

        let mut builder = CommandService::builder(config.mode)
            .with_emitter(emitter.clone())
            .with_settings(config.processor.settings());
        for device in build_devices(&config, &emitter).await? {
            builder = builder.with_device(device);
        }
        let service = Arc::new(builder.build());
        let supervisor = config.tasks.supervisor();

        info!(mode = %config.mode, devices = ?service.kinds(), "App initialized");
        Ok(Self {
            config,
            service,
            supervisor,
            trace_listener,
        })
    }

    pub fn config(&self) -> &KeyrelayConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<CommandService> {
        &self.service
    }

    /// Submits `lines` as one batch, waits for them to drain and shuts down.
    ///
    /// Returns the process exit code: 1 when a command could not be
    /// submitted or failed on the device.
    pub async fn run_command(&self, lines: &[String]) -> Result<i32> {
        let code = match self.service.submit_batch(SourceActor::CommandLine, lines) {
            Ok(group) => {
                info!(group = %group.id(), "Command mode: {} line(s)", lines.len());
                self.drain().await;
                match self.service.status() {
                    Ok(status) if status.failed > 0 => {
                        eprintln!("{} command(s) failed", status.failed);
                        1
                    }
                    _ => 0,
                }
            }
            Err(e) => {
                eprintln!("Error: {e}");
                // The other lines of the batch were still enqueued.
                if !matches!(
                    e,
                    ProcessorError::AdapterUnavailable(_) | ProcessorError::Closed
                ) {
                    self.drain().await;
                }
                1
            }
        };
        self.shutdown().await;
        Ok(code)
    }

    /// Runs the enabled input adapters until the console reaches end of
    /// input or Ctrl-C arrives, then drains and shuts down.
    ///
    /// # Errors
    ///
    /// A supervisor refusing to start an adapter.
    pub async fn run_interactive(&self) -> Result<()> {
        let input = &self.config.input;
        if input.console {
            let console = ConsoleInput::stdin(Arc::clone(&self.service));
            self.supervisor.submit(CONSOLE_TASK, console.run()).await?;
        }
        if let Some(path) = &input.watch_file {
            let watcher = FileWatchInput::new(path, Arc::clone(&self.service))
                .with_interval(input.poll_interval());
            self.supervisor.submit(FILE_WATCH_TASK, watcher.run()).await?;
        }
        if self.supervisor.names().is_empty() {
            warn!("No input adapter enabled; waiting for Ctrl-C");
        }

        let console_done = async {
            if input.console {
                self.supervisor.wait(CONSOLE_TASK).await
            } else {
                std::future::pending().await
            }
        };

        tokio::select! {
            result = console_done => {
                if let Err(e) = result {
                    warn!("console input ended with error: {}", e);
                }
                debug!("console input finished, draining");
                self.drain().await;
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("cannot listen for Ctrl-C: {}", e);
                }
                info!("Interrupted");
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Waits until the active processor is idle.
    ///
    /// Gives up when nothing has progressed for longer than the deadline
    /// of the command in flight (or the largest text deadline when none is).
    pub async fn drain(&self) -> bool {
        let max_deadline = Duration::from_millis(self.config.processor.timeouts.max_ms);
        let mut last = progress(self.service.status().ok());
        let mut since = Instant::now();

        loop {
            let status = match self.service.status() {
                Ok(status) => status,
                Err(_) => return true,
            };
            if status.is_idle() {
                return true;
            }
            let stall_limit = status
                .in_flight_timeout
                .map_or(max_deadline, |t| t.max(max_deadline))
                + DRAIN_GRACE;
            let now = progress(Some(status));
            if now != last {
                last = now;
                since = Instant::now();
            } else if since.elapsed() > stall_limit {
                warn!(queued = status.queued, held = status.held, "giving up on drain");
                return false;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    /// Stops the input loops, then the service. Idempotent.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
        self.service.shutdown().await;
        if let Some(listener) = &self.trace_listener {
            listener.abort();
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("mode", &self.config.mode)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

fn progress(status: Option<ProcessorStatus>) -> u64 {
    status.map_or(0, |s| s.dispatched + s.failed + s.dropped)
}

/// Creates every device the configuration describes.
///
/// The log sink always exists. The serial device exists when an endpoint
/// is configured; a failed initial connection is retried on first write.
async fn build_devices(
    config: &KeyrelayConfig,
    emitter: &EventEmitter,
) -> Result<Vec<Arc<dyn OutputDevice>>> {
    let mut devices: Vec<Arc<dyn OutputDevice>> = Vec::new();

    let serial = &config.serial;
    let serial_device = match (&serial.tcp, &serial.device) {
        (Some(addr), _) => Some(SerialDevice::new(
            TcpConnector::new(addr.clone(), serial.connect_timeout()),
            serial.settings(),
            emitter.clone(),
        )),
        (None, Some(path)) => Some(SerialDevice::new(
            DeviceFileConnector::new(path),
            serial.settings(),
            emitter.clone(),
        )),
        (None, None) => None,
    };
    if let Some(device) = serial_device {
        if let Err(e) = device.connect().await {
            warn!("serial device not reachable yet: {}", e);
        }
        devices.push(Arc::new(device));
    }

    let layout = config
        .local
        .key_layout()
        .ok_or_else(|| anyhow!("unknown keyboard layout: {}", config.local.layout))?;
    devices.push(Arc::new(
        LocalKeyboard::new(layout, config.local.char_delay()).with_emitter(emitter.clone()),
    ));

    let sink_path = config.log_sink.path_or_default();
    devices.push(Arc::new(LogSinkDevice::new(&sink_path)));
    debug!(path = %sink_path.display(), "log sink");

    Ok(devices)
}

/// Writes `config` as the global config file.
///
/// # Errors
///
/// The file cannot be written.
pub fn write_global_config(config: &KeyrelayConfig) -> Result<()> {
    keyrelay_runtime::config::save_global_config(config).context("cannot write global config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrelay_runtime::DeviceKind;

    fn sink_config(dir: &std::path::Path) -> KeyrelayConfig {
        let mut config = KeyrelayConfig::default();
        config.mode = DeviceKind::LogSink;
        config.log_sink.path = Some(dir.join("out.jsonl"));
        config.events.trace = false;
        config
    }

    #[tokio::test]
    async fn build_without_serial_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(sink_config(dir.path())).await.unwrap();
        assert_eq!(app.service().kinds(), vec![DeviceKind::Local, DeviceKind::LogSink]);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_layout_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sink_config(dir.path());
        config.local.layout = "dvorak-klingon".into();
        let err = App::build(config).await.unwrap_err();
        assert!(err.to_string().contains("dvorak-klingon"));
    }

    #[tokio::test]
    async fn command_mode_writes_sink() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(sink_config(dir.path())).await.unwrap();
        let lines = vec!["text:hello".to_string(), "key:ENTER".to_string()];
        assert_eq!(app.run_command(&lines).await.unwrap(), 0);

        let content = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        assert!(content.contains("text:hello"));
        assert!(content.contains("key:ENTER"));
        assert!(app.service().status().unwrap().closed);
    }

    #[tokio::test]
    async fn drain_waits_for_long_delay() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sink_config(dir.path());
        config.mode = DeviceKind::Local;
        config.processor.timeouts.max_ms = 50;
        let app = App::build(config).await.unwrap();
        let lines = vec!["delay:1500".to_string(), "key:A".to_string()];
        assert_eq!(app.run_command(&lines).await.unwrap(), 0);

        let status = app.service().status().unwrap();
        assert_eq!(status.dispatched, 2);
        assert_eq!(status.dropped, 0);
    }

    #[tokio::test]
    async fn failed_reset_still_runs_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(sink_config(dir.path())).await.unwrap();
        let lines = vec!["RESET".to_string(), "key:A".to_string()];
        assert_eq!(app.run_command(&lines).await.unwrap(), 1);

        let content = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        assert!(content.contains("key:A"));
    }

    #[tokio::test]
    async fn command_mode_without_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sink_config(dir.path());
        config.mode = DeviceKind::Serial;
        let app = App::build(config).await.unwrap();
        assert_eq!(app.run_command(&["key:A".to_string()]).await.unwrap(), 1);
    }
}

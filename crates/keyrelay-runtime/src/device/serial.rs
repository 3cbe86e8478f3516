//! Transport-backed keyboard emulator.
//!
//! The device is a microcontroller behind a serial line (or a network
//! bridge to one). Commands are written as text lines; the device answers
//! with telemetry lines, some of which carry flow-control tokens.
//!
//! # Flow Control
//!
//! ```text
//!            send(key:A)                         telemetry task
//!                │                                     │
//!     wait until busy == false ◄───── watch ──────  "READY" → busy = false
//!                │                                  "BUSY"  → busy = true
//!     busy = true, write "key:A\n" ─────────►  device
//! ```
//!
//! Every normal write marks the device busy until it reports ready again,
//! so a slow device is never sent more than one command at a time.
//! Priority writes (`STOP`, `PAUSE`, `RESUME`, `RESET`) skip the wait.
//!
//! # Stop and Pause
//!
//! `stop_and_clear` bumps a generation counter before writing `STOP`; a
//! send waiting for readiness sees the new generation and gives up with
//! [`DeviceError::Cancelled`]. `pause` only writes `PAUSE` and leaves the
//! busy flag alone: a command already written completes on the device and
//! its `READY` is honoured.
//!
//! # Shutdown
//!
//! `shutdown` aborts the telemetry task and closes the writer once. Sends
//! waiting for readiness fail with [`DeviceError::Closed`]; a write in
//! progress completes. Dropping the device does the same best-effort.

use super::{DeviceError, DeviceKind, OutputCommand, OutputDevice};
use async_trait::async_trait;
use keyrelay_event::{CommandContext, CommandKind, EventEmitter, EventGroup, EventType, PriorityCommand};
use keyrelay_types::SourceActor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Buffered line source from the device.
pub type LineReader = Box<dyn AsyncBufRead + Send + Unpin>;
/// Byte sink to the device.
pub type LineWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens the transport to a device.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(LineReader, LineWriter), DeviceError>;

    /// Human-readable endpoint, used in logs.
    fn describe(&self) -> String;
}

/// Opens a tty (or any read/write device file) by path.
#[derive(Debug, Clone)]
pub struct DeviceFileConnector {
    path: PathBuf,
}

impl DeviceFileConnector {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Connector for DeviceFileConnector {
    async fn connect(&self) -> Result<(LineReader, LineWriter), DeviceError> {
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await?;
        let (reader, writer) = tokio::io::split(file);
        Ok((Box::new(BufReader::new(reader)), Box::new(writer)))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Connects to a serial-over-network bridge.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    timeout: Duration,
}

impl TcpConnector {
    #[must_use]
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<(LineReader, LineWriter), DeviceError> {
        let stream = tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.addr))
            .await
            .map_err(|_| DeviceError::Timeout(self.timeout))??;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok((Box::new(BufReader::new(reader)), Box::new(writer)))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

/// Wire-level settings of a serial device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Telemetry line meaning "ready for the next command".
    pub ready_token: String,
    /// Telemetry line meaning "still working".
    pub busy_token: String,
    /// Appended to every written command.
    pub line_ending: String,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            ready_token: "READY".into(),
            busy_token: "BUSY".into(),
            line_ending: "\n".into(),
        }
    }
}

impl SerialSettings {
    /// Returns the busy state a telemetry line announces, if any.
    ///
    /// Tokens match the whole trimmed line, ignoring case.
    #[must_use]
    pub fn busy_signal(&self, line: &str) -> Option<bool> {
        let line = line.trim();
        if line.eq_ignore_ascii_case(&self.busy_token) {
            Some(true)
        } else if line.eq_ignore_ascii_case(&self.ready_token) {
            Some(false)
        } else {
            None
        }
    }
}

struct Connection {
    writer: LineWriter,
    telemetry: JoinHandle<()>,
}

/// [`OutputDevice`] for a keyboard emulator behind a transport.
pub struct SerialDevice {
    connector: Box<dyn Connector>,
    settings: SerialSettings,
    emitter: EventEmitter,
    /// Causal root for telemetry and priority writes.
    session: Arc<CommandContext>,
    conn: Mutex<Option<Connection>>,
    busy: watch::Sender<bool>,
    generation: watch::Sender<u64>,
    connects: AtomicUsize,
    closed: AtomicBool,
}

impl SerialDevice {
    #[must_use]
    pub fn new(
        connector: impl Connector + 'static,
        settings: SerialSettings,
        emitter: EventEmitter,
    ) -> Self {
        let session = emitter.new_root_context(
            SourceActor::Device,
            CommandKind::Undefined,
            Some(connector.describe()),
        );
        Self {
            connector: Box::new(connector),
            settings,
            emitter,
            session,
            conn: Mutex::new(None),
            busy: watch::Sender::new(false),
            generation: watch::Sender::new(0),
            connects: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether the device last reported (or was assumed to be) busy.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Number of transports opened so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Group every telemetry event is attached to.
    #[must_use]
    pub fn session(&self) -> &Arc<CommandContext> {
        &self.session
    }

    /// Opens the transport unless a live connection already exists.
    ///
    /// # Errors
    ///
    /// [`DeviceError::Closed`] after shutdown, or the connector's error.
    pub async fn connect(&self) -> Result<(), DeviceError> {
        let mut guard = self.conn.lock().await;
        self.connect_locked(&mut guard).await
    }

    async fn connect_locked(&self, conn: &mut Option<Connection>) -> Result<(), DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        if let Some(existing) = conn.as_ref() {
            if !existing.telemetry.is_finished() {
                return Ok(());
            }
            debug!(endpoint = %self.connector.describe(), "telemetry ended, reconnecting");
        }

        let (reader, writer) = self.connector.connect().await?;
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.busy.send_replace(false);

        let telemetry = tokio::spawn(telemetry_loop(
            reader,
            self.settings.clone(),
            self.busy.clone(),
            self.emitter.clone(),
            EventGroup::from(Arc::clone(&self.session)),
        ));
        *conn = Some(Connection { writer, telemetry });
        info!(endpoint = %self.connector.describe(), "serial device connected");
        Ok(())
    }

    /// Waits until the device is ready, giving up if a stop or shutdown
    /// happens first.
    async fn wait_ready(&self, generation: u64) -> Result<(), DeviceError> {
        let mut busy_rx = self.busy.subscribe();
        let mut gen_rx = self.generation.subscribe();
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(DeviceError::Closed);
            }
            if *gen_rx.borrow_and_update() != generation {
                return Err(DeviceError::Cancelled);
            }
            if !*busy_rx.borrow_and_update() {
                return Ok(());
            }
            trace!("waiting for device ready");
            // Both senders live in `self`, so `changed` cannot fail here.
            tokio::select! {
                _ = busy_rx.changed() => {}
                _ = gen_rx.changed() => {}
            }
        }
    }

    async fn write_line(&self, text: &str) -> Result<(), DeviceError> {
        let mut guard = self.conn.lock().await;
        self.connect_locked(&mut guard).await?;
        let conn = guard.as_mut().ok_or(DeviceError::NotConnected)?;
        self.write_to(conn, text).await
    }

    /// Writes one normal command and marks the device busy.
    ///
    /// Does not reconnect: a reconnect resets the busy flag, so it has to
    /// happen before `wait_ready`.
    async fn write_command(&self, text: &str) -> Result<(), DeviceError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DeviceError::NotConnected)?;
        // Busy before the write, so a fast READY is not overwritten.
        self.busy.send_replace(true);
        if let Err(e) = self.write_to(conn, text).await {
            self.busy.send_replace(false);
            return Err(e);
        }
        Ok(())
    }

    async fn write_to(&self, conn: &mut Connection, text: &str) -> Result<(), DeviceError> {
        conn.writer.write_all(text.as_bytes()).await?;
        conn.writer
            .write_all(self.settings.line_ending.as_bytes())
            .await?;
        conn.writer.flush().await?;
        Ok(())
    }

    async fn write_priority(&self, command: PriorityCommand) -> Result<(), DeviceError> {
        self.write_line(command.as_str()).await?;
        debug!(command = %command, "priority write");
        self.emitter.emit(
            SourceActor::Device,
            &EventGroup::from(Arc::clone(&self.session)),
            EventType::DeviceDataSent,
            Some(command.as_str().to_string()),
        );
        Ok(())
    }

    fn bump_generation(&self) {
        self.generation.send_modify(|g| *g += 1);
    }
}

impl std::fmt::Debug for SerialDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDevice")
            .field("endpoint", &self.connector.describe())
            .field("busy", &self.is_busy())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl OutputDevice for SerialDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Serial
    }

    fn supports_reset(&self) -> bool {
        true
    }

    async fn send(&self, commands: &[OutputCommand]) -> Result<(), DeviceError> {
        let generation = *self.generation.borrow();
        for command in commands {
            self.connect().await?;
            self.wait_ready(generation).await?;
            self.write_command(&command.text).await?;

            let parent = command
                .parent
                .clone()
                .unwrap_or_else(|| EventGroup::from(Arc::clone(&self.session)));
            self.emitter.emit(
                SourceActor::Device,
                &parent,
                EventType::DeviceDataSent,
                Some(command.text.clone()),
            );
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), DeviceError> {
        self.write_priority(PriorityCommand::Pause).await
    }

    async fn stop_and_clear(&self) -> Result<(), DeviceError> {
        self.bump_generation();
        self.write_priority(PriorityCommand::Stop).await?;
        self.busy.send_replace(false);
        Ok(())
    }

    async fn resume(&self) -> Result<(), DeviceError> {
        self.write_priority(PriorityCommand::Resume).await
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        self.bump_generation();
        self.write_priority(PriorityCommand::Reset).await?;
        self.busy.send_replace(false);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DeviceError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bump_generation();

        if let Some(mut conn) = self.conn.lock().await.take() {
            conn.telemetry.abort();
            if let Err(e) = conn.writer.shutdown().await {
                debug!(error = %e, "writer shutdown failed");
            }
        }
        info!(endpoint = %self.connector.describe(), "serial device shut down");
        Ok(())
    }
}

impl Drop for SerialDevice {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            conn.telemetry.abort();
        }
    }
}

async fn telemetry_loop(
    mut reader: LineReader,
    settings: SerialSettings,
    busy: watch::Sender<bool>,
    emitter: EventEmitter,
    session: EventGroup,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                warn!("serial telemetry stream closed");
                break;
            }
            Ok(_) => {
                let text = line.trim_end_matches(['\r', '\n']);
                trace!(line = text, "telemetry");
                if let Some(is_busy) = settings.busy_signal(text) {
                    busy.send_replace(is_busy);
                }
                emitter.emit(
                    SourceActor::Device,
                    &session,
                    EventType::DeviceDataReceived,
                    Some(text.to_string()),
                );
            }
            Err(e) => {
                warn!(error = %e, "serial telemetry read failed");
                break;
            }
        }
    }
    // Nobody will report READY any more; let pending sends fail on write.
    busy.send_replace(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{wait_until, PipeConnector, PipeRemote};

    fn cmd(text: &str) -> OutputCommand {
        OutputCommand::new(text, Duration::from_secs(1))
    }

    fn device() -> (Arc<SerialDevice>, PipeRemote) {
        let (connector, remote) = PipeConnector::new();
        let dev = SerialDevice::new(connector, SerialSettings::default(), EventEmitter::new(64));
        (Arc::new(dev), remote)
    }

    #[test]
    fn busy_signal_tokens() {
        let settings = SerialSettings::default();
        assert_eq!(settings.busy_signal("BUSY\r"), Some(true));
        assert_eq!(settings.busy_signal(" ready "), Some(false));
        assert_eq!(settings.busy_signal("typed key:A"), None);
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (dev, _remote) = device();
        dev.connect().await.unwrap();
        dev.connect().await.unwrap();
        assert_eq!(dev.connect_count(), 1);
    }

    #[tokio::test]
    async fn send_writes_line_and_marks_busy() {
        let (dev, mut remote) = device();
        dev.send(&[cmd("key:A")]).await.unwrap();
        assert_eq!(remote.read_line().await.unwrap(), "key:A");
        assert!(dev.is_busy());

        remote.send_line("READY").await;
        assert!(wait_until(Duration::from_secs(2), || !dev.is_busy()).await);
    }

    #[tokio::test]
    async fn second_command_waits_for_ready() {
        let (dev, mut remote) = device();
        let sender = {
            let dev = Arc::clone(&dev);
            tokio::spawn(async move { dev.send(&[cmd("key:A"), cmd("key:B")]).await })
        };

        assert_eq!(remote.read_line().await.unwrap(), "key:A");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_finished());

        remote.send_line("READY").await;
        assert_eq!(remote.read_line().await.unwrap(), "key:B");
        sender.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_cancels_waiting_send_and_bypasses_busy() {
        let (dev, mut remote) = device();
        dev.send(&[cmd("key:A")]).await.unwrap();
        assert_eq!(remote.read_line().await.unwrap(), "key:A");

        let waiting = {
            let dev = Arc::clone(&dev);
            tokio::spawn(async move { dev.send(&[cmd("key:B")]).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        dev.stop_and_clear().await.unwrap();
        assert_eq!(remote.read_line().await.unwrap(), "STOP");
        assert!(matches!(
            waiting.await.unwrap(),
            Err(DeviceError::Cancelled)
        ));
        assert!(!dev.is_busy());
    }

    #[tokio::test]
    async fn pause_keeps_busy_flag() {
        let (dev, mut remote) = device();
        dev.send(&[cmd("text:abc")]).await.unwrap();
        remote.read_line().await.unwrap();

        dev.pause().await.unwrap();
        assert_eq!(remote.read_line().await.unwrap(), "PAUSE");
        assert!(dev.is_busy());
    }

    #[tokio::test]
    async fn telemetry_is_published() {
        let (connector, remote) = PipeConnector::new();
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();
        let dev = SerialDevice::new(connector, SerialSettings::default(), emitter);
        dev.connect().await.unwrap();

        remote.send_line("hello from device").await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventType::DeviceDataReceived);
        assert_eq!(event.data.as_deref(), Some("hello from device"));
        assert_eq!(event.parent_id, dev.session().id());
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (dev, _remote) = device();
        dev.connect().await.unwrap();
        dev.shutdown().await.unwrap();
        dev.shutdown().await.unwrap();
        assert!(matches!(
            dev.send(&[cmd("key:A")]).await,
            Err(DeviceError::Closed)
        ));
        assert_eq!(dev.connect_count(), 1);
    }
}

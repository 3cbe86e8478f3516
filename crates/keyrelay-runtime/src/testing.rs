//! Test doubles for devices, injectors and transports.
//!
//! Available to this crate's unit tests and, with the `test-utils`
//! feature, to integration tests and downstream crates.

use crate::device::local::InjectorFactory;
use crate::device::serial::{Connector, LineReader, LineWriter};
use crate::device::{DeviceError, DeviceKind, KeyInjector, KeyStroke, OutputCommand, OutputDevice};
use async_trait::async_trait;
use keyrelay_event::PriorityCommand;
use keyrelay_types::GroupId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::watch;

/// Polls `cond` every few milliseconds until it holds or `timeout` passes.
///
/// Returns whether the condition was met.
pub async fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// [`OutputDevice`] that records what it is asked to do.
///
/// It can be made busy (sends block until released), slow (each send
/// takes a fixed time) or failing (sends return a transport error).
#[derive(Debug)]
pub struct RecordingDevice {
    kind: DeviceKind,
    reset_supported: bool,
    sent: Mutex<Vec<(String, Option<GroupId>)>>,
    interrupts: Mutex<Vec<PriorityCommand>>,
    busy: watch::Sender<bool>,
    delay: Mutex<Duration>,
    failing: AtomicBool,
    shutdowns: AtomicUsize,
}

impl RecordingDevice {
    #[must_use]
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            reset_supported: kind == DeviceKind::Serial,
            sent: Mutex::new(Vec::new()),
            interrupts: Mutex::new(Vec::new()),
            busy: watch::Sender::new(false),
            delay: Mutex::new(Duration::ZERO),
            failing: AtomicBool::new(false),
            shutdowns: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_reset(mut self, supported: bool) -> Self {
        self.reset_supported = supported;
        self
    }

    /// While busy, `send` waits until the device is released.
    pub fn set_busy(&self, busy: bool) {
        self.busy.send_replace(busy);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Texts of delivered commands, in delivery order.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(text, _)| text.clone()).collect()
    }

    /// Parent group ids of delivered commands, in delivery order.
    #[must_use]
    pub fn sent_parents(&self) -> Vec<Option<GroupId>> {
        self.sent.lock().iter().map(|(_, parent)| *parent).collect()
    }

    #[must_use]
    pub fn interrupts(&self) -> Vec<PriorityCommand> {
        self.interrupts.lock().clone()
    }

    #[must_use]
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Waits until at least `n` commands were delivered.
    pub async fn wait_for_sent(&self, n: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.sent.lock().len() >= n).await
    }

    fn record_interrupt(&self, command: PriorityCommand) {
        self.interrupts.lock().push(command);
    }
}

#[async_trait]
impl OutputDevice for RecordingDevice {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn supports_reset(&self) -> bool {
        self.reset_supported
    }

    async fn send(&self, commands: &[OutputCommand]) -> Result<(), DeviceError> {
        let mut busy = self.busy.subscribe();
        while *busy.borrow_and_update() {
            if busy.changed().await.is_err() {
                return Err(DeviceError::Closed);
            }
        }

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeviceError::transport("injected failure"));
        }

        let mut sent = self.sent.lock();
        for command in commands {
            sent.push((
                command.text.clone(),
                command.parent.as_ref().map(|p| p.id()),
            ));
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), DeviceError> {
        self.record_interrupt(PriorityCommand::Pause);
        Ok(())
    }

    async fn stop_and_clear(&self) -> Result<(), DeviceError> {
        self.record_interrupt(PriorityCommand::Stop);
        Ok(())
    }

    async fn resume(&self) -> Result<(), DeviceError> {
        self.record_interrupt(PriorityCommand::Resume);
        Ok(())
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        if !self.reset_supported {
            return Err(DeviceError::unsupported(self.kind.as_str(), "reset"));
        }
        self.record_interrupt(PriorityCommand::Reset);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DeviceError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Shared record of key strokes produced by [`RecordingInjector::factory`].
#[derive(Debug, Clone, Default)]
pub struct RecordingInjector {
    strokes: Arc<Mutex<Vec<KeyStroke>>>,
    created: Arc<AtomicUsize>,
}

struct Recorder {
    strokes: Arc<Mutex<Vec<KeyStroke>>>,
}

impl KeyInjector for Recorder {
    fn press(&mut self, stroke: &KeyStroke) -> Result<(), DeviceError> {
        self.strokes.lock().push(*stroke);
        Ok(())
    }
}

impl RecordingInjector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose injectors all append to this record.
    #[must_use]
    pub fn factory(&self) -> InjectorFactory {
        let strokes = Arc::clone(&self.strokes);
        let created = Arc::clone(&self.created);
        Arc::new(move || {
            created.fetch_add(1, Ordering::SeqCst);
            Box::new(Recorder {
                strokes: Arc::clone(&strokes),
            })
        })
    }

    #[must_use]
    pub fn strokes(&self) -> Vec<KeyStroke> {
        self.strokes.lock().clone()
    }

    /// Key names only, without modifiers.
    #[must_use]
    pub fn keys(&self) -> Vec<&'static str> {
        self.strokes.lock().iter().map(|s| s.key).collect()
    }

    /// Number of injectors the factory has built.
    #[must_use]
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

/// [`Connector`] over an in-memory pipe.
///
/// Hands out its device end exactly once; the other end is the
/// [`PipeRemote`], which plays the device.
#[derive(Debug)]
pub struct PipeConnector {
    stream: Mutex<Option<DuplexStream>>,
}

impl PipeConnector {
    #[must_use]
    pub fn new() -> (Self, PipeRemote) {
        let (local, remote) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(remote);
        (
            Self {
                stream: Mutex::new(Some(local)),
            },
            PipeRemote {
                reader: BufReader::new(reader),
                writer: tokio::sync::Mutex::new(writer),
            },
        )
    }
}

#[async_trait]
impl Connector for PipeConnector {
    async fn connect(&self) -> Result<(LineReader, LineWriter), DeviceError> {
        let stream = self.stream.lock().take().ok_or(DeviceError::NotConnected)?;
        let (reader, writer) = tokio::io::split(stream);
        Ok((Box::new(BufReader::new(reader)), Box::new(writer)))
    }

    fn describe(&self) -> String {
        "pipe".into()
    }
}

/// Device end of a [`PipeConnector`].
#[derive(Debug)]
pub struct PipeRemote {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: tokio::sync::Mutex<WriteHalf<DuplexStream>>,
}

impl PipeRemote {
    /// Reads the next line written by the host, without its line ending.
    ///
    /// Returns `None` on EOF or if nothing arrives within two seconds.
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line));
        match read.await {
            Ok(Ok(n)) if n > 0 => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            _ => None,
        }
    }

    /// Writes one telemetry line to the host.
    pub async fn send_line(&self, line: &str) {
        let mut writer = self.writer.lock().await;
        // A closed host end only matters to the test reading it.
        let _ = writer.write_all(format!("{line}\n").as_bytes()).await;
        let _ = writer.flush().await;
    }
}

//! Log sink device.
//!
//! Appends every submitted batch to a file as one JSON line:
//!
//! ```text
//! {"timestamp":"2024-05-01T10:00:00Z","parent":"6f1c...","commands":["line:Hello"]}
//! ```
//!
//! There is nothing downstream to pause or stop, so the control
//! primitives only toggle flags.

use super::{DeviceError, DeviceKind, OutputCommand, OutputDevice};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyrelay_types::GroupId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// One line of the sink file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkRecord {
    pub timestamp: DateTime<Utc>,
    /// Group of the first command in the batch, if it had one.
    pub parent: Option<GroupId>,
    pub commands: Vec<String>,
}

/// [`OutputDevice`] that records commands to a JSON lines file.
#[derive(Debug)]
pub struct LogSinkDevice {
    path: PathBuf,
    /// Serializes appends so lines never interleave.
    write_lock: Mutex<()>,
    paused: AtomicBool,
    stopped: AtomicBool,
    closed: AtomicBool,
}

impl LogSinkDevice {
    /// Creates a sink writing to `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            paused: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Reads every record written so far.
    ///
    /// # Errors
    ///
    /// I/O failures, or a line that is not a valid record.
    pub async fn read_records(&self) -> Result<Vec<SinkRecord>, DeviceError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(DeviceError::transport))
            .collect()
    }
}

#[async_trait]
impl OutputDevice for LogSinkDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::LogSink
    }

    async fn send(&self, commands: &[OutputCommand]) -> Result<(), DeviceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DeviceError::Closed);
        }
        if commands.is_empty() {
            return Ok(());
        }

        let record = SinkRecord {
            timestamp: Utc::now(),
            parent: commands
                .iter()
                .find_map(|c| c.parent.as_ref().map(|p| p.id())),
            commands: commands.iter().map(|c| c.text.clone()).collect(),
        };
        let mut line = serde_json::to_string(&record).map_err(DeviceError::transport)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %self.path.display(), count = record.commands.len(), "log sink append");
        Ok(())
    }

    async fn pause(&self) -> Result<(), DeviceError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_and_clear(&self) -> Result<(), DeviceError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), DeviceError> {
        self.paused.store(false, Ordering::SeqCst);
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DeviceError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(path = %self.path.display(), "log sink closed");
        }
        Ok(())
    }
}

//! Polled command file.
//!
//! Another program drops commands into a file; the watcher picks them up
//! as one batch and truncates the file. Lines appended between the read
//! and the truncation are lost.

use crate::processor::ProcessorError;
use crate::service::CommandService;
use crate::tasks::TaskResult;
use keyrelay_event::EventGroup;
use keyrelay_types::SourceActor;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Default polling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct FileWatchInput {
    path: PathBuf,
    interval: Duration,
    service: Arc<CommandService>,
}

impl FileWatchInput {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, service: Arc<CommandService>) -> Self {
        Self {
            path: path.into(),
            interval: DEFAULT_POLL_INTERVAL,
            service,
        }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Checks the file once.
    ///
    /// Returns the batch group when the file held commands. A missing or
    /// unreadable file is not an error; it is logged and retried on the
    /// next poll. Invalid UTF-8 is replaced, not rejected. When the active
    /// mode has no device the file is left untouched.
    ///
    /// Once the batch is submitted the file is truncated, even if one of
    /// its lines failed; that line is reported and the rest still run.
    ///
    /// # Errors
    ///
    /// [`ProcessorError::Closed`] once the service has shut down.
    pub async fn poll_once(&self) -> Result<Option<EventGroup>, ProcessorError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                warn!("file watch: cannot read {}: {}", self.path.display(), e);
                return Ok(None);
            }
        };
        let content = String::from_utf8_lossy(&bytes);
        if content.trim().is_empty() {
            return Ok(None);
        }

        let group = match self.service.submit_batch(SourceActor::FileWatcher, content.lines()) {
            Ok(group) => Some(group),
            Err(e @ ProcessorError::AdapterUnavailable(_)) => {
                warn!("file watch: {}", e);
                return Ok(None);
            }
            Err(ProcessorError::Closed) => return Err(ProcessorError::Closed),
            Err(e) => {
                warn!("file watch: {}: {}", self.path.display(), e);
                None
            }
        };

        if let Err(e) = tokio::fs::write(&self.path, "").await {
            warn!("file watch: cannot truncate {}: {}", self.path.display(), e);
        }
        debug!("file watch: submitted {}", self.path.display());
        Ok(group)
    }

    /// Polls until the service shuts down.
    pub async fn run(self) -> TaskResult {
        info!(
            "file watch: polling {} every {}ms",
            self.path.display(),
            self.interval.as_millis()
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(_) => {}
                Err(ProcessorError::Closed) => {
                    debug!("file watch: service closed");
                    return Ok(());
                }
                Err(e) => warn!("file watch: {}", e),
            }
        }
    }
}

//! Named task lifecycle.

use super::TaskError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

/// Error type a task loop may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Output of a task loop.
pub type TaskResult = Result<(), BoxError>;

/// Default time a task gets to be polled for the first time.
pub const DEFAULT_STARTUP_WINDOW: Duration = Duration::from_secs(5);

/// Default time shutdown waits for each task after aborting it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct TaskEntry {
    abort: AbortHandle,
    monitor: JoinHandle<Result<(), TaskError>>,
}

/// Runs named long-lived loops as independent tokio tasks.
///
/// Each task is its own failure domain: an error or panic is logged and
/// recorded for [`wait`](Self::wait), and no other task is affected.
///
/// # Example
///
/// ```
/// use keyrelay_runtime::TaskSupervisor;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let supervisor = TaskSupervisor::new(Duration::from_secs(1));
/// supervisor
///     .submit("ticker", async {
///         tokio::time::sleep(Duration::from_secs(60)).await;
///         Ok(())
///     })
///     .await
///     .unwrap();
/// assert!(supervisor.is_running("ticker"));
///
/// supervisor.shutdown().await;
/// assert!(!supervisor.is_running("ticker"));
/// # }
/// ```
pub struct TaskSupervisor {
    startup_window: Duration,
    shutdown_grace: Duration,
    tasks: Mutex<HashMap<String, TaskEntry>>,
    closed: AtomicBool,
}

impl TaskSupervisor {
    #[must_use]
    pub fn new(startup_window: Duration) -> Self {
        Self {
            startup_window,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            tasks: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Starts `task` under `name`.
    ///
    /// Waits up to the startup window for the task's first poll; a task
    /// that is not polled in time is logged and left running.
    ///
    /// # Errors
    ///
    /// [`TaskError::DuplicateName`] if a task of that name is still
    /// running, [`TaskError::ShuttingDown`] after [`shutdown`](Self::shutdown).
    pub async fn submit<F>(&self, name: &str, task: F) -> Result<(), TaskError>
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        let started = {
            let mut tasks = self.tasks.lock();
            if self.closed.load(Ordering::SeqCst) {
                return Err(TaskError::ShuttingDown);
            }
            if tasks.get(name).is_some_and(|t| !t.monitor.is_finished()) {
                return Err(TaskError::DuplicateName(name.to_string()));
            }
            let (entry, started) = spawn_supervised(name.to_string(), task);
            tasks.insert(name.to_string(), entry);
            started
        };

        match tokio::time::timeout(self.startup_window, started).await {
            Ok(_) => info!("TaskSupervisor: {} started", name),
            Err(_) => warn!(
                "TaskSupervisor: {} was not scheduled within {}ms",
                name,
                self.startup_window.as_millis()
            ),
        }
        Ok(())
    }

    /// Cancels the named task and waits for it to unwind.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] if no task has that name.
    pub async fn cancel(&self, name: &str) -> Result<(), TaskError> {
        let entry = self
            .tasks
            .lock()
            .remove(name)
            .ok_or_else(|| TaskError::NotFound(name.to_string()))?;
        entry.abort.abort();
        self.join(name, entry.monitor).await;
        info!("TaskSupervisor: {} cancelled", name);
        Ok(())
    }

    /// Cancels the named task if present and starts `task` in its place.
    ///
    /// # Errors
    ///
    /// As [`submit`](Self::submit).
    pub async fn restart<F>(&self, name: &str, task: F) -> Result<(), TaskError>
    where
        F: Future<Output = TaskResult> + Send + 'static,
    {
        match self.cancel(name).await {
            Ok(()) | Err(TaskError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        debug!("TaskSupervisor: restarting {}", name);
        self.submit(name, task).await
    }

    /// Waits for the named task to finish on its own and removes it.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`], or [`TaskError::Failed`] if the task
    /// returned an error, panicked or was cancelled.
    pub async fn wait(&self, name: &str) -> Result<(), TaskError> {
        let monitor = {
            let mut tasks = self.tasks.lock();
            let entry = tasks
                .get_mut(name)
                .ok_or_else(|| TaskError::NotFound(name.to_string()))?;
            // Hand the monitor over, leaving a finished placeholder behind.
            std::mem::replace(&mut entry.monitor, tokio::spawn(async { Ok(()) }))
        };
        let result = match monitor.await {
            Ok(result) => result,
            Err(e) => Err(TaskError::failed(name, e)),
        };
        self.tasks.lock().remove(name);
        result
    }

    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .lock()
            .get(name)
            .is_some_and(|t| !t.monitor.is_finished())
    }

    /// Names of all tracked tasks, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tasks.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancels every task. Idempotent; later submits are rejected.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("TaskSupervisor: already shut down");
            return;
        }
        let entries: Vec<(String, TaskEntry)> = self.tasks.lock().drain().collect();
        info!("TaskSupervisor: shutting down {} tasks", entries.len());
        for (_, entry) in &entries {
            entry.abort.abort();
        }
        for (name, entry) in entries {
            self.join(&name, entry.monitor).await;
        }
    }

    async fn join(&self, name: &str, monitor: JoinHandle<Result<(), TaskError>>) {
        let abort = monitor.abort_handle();
        if tokio::time::timeout(self.shutdown_grace, monitor).await.is_err() {
            warn!("TaskSupervisor: {} did not stop in time", name);
            abort.abort();
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_STARTUP_WINDOW)
    }
}

impl std::fmt::Debug for TaskSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSupervisor")
            .field("tasks", &self.names())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Spawns `task` plus a monitor that logs how it ended.
///
/// The returned receiver fires on the task's first poll.
fn spawn_supervised<F>(name: String, task: F) -> (TaskEntry, oneshot::Receiver<()>)
where
    F: Future<Output = TaskResult> + Send + 'static,
{
    let (started_tx, started_rx) = oneshot::channel();
    let mut started_tx = Some(started_tx);
    let mut task: Pin<Box<F>> = Box::pin(task);
    let wrapped = std::future::poll_fn(move |cx| {
        if let Some(tx) = started_tx.take() {
            let _ = tx.send(());
        }
        task.as_mut().poll(cx)
    });

    let handle = tokio::spawn(wrapped);
    let abort = handle.abort_handle();
    let monitor = tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => {
                info!("TaskSupervisor: {} finished", name);
                Ok(())
            }
            Ok(Err(e)) => {
                warn!("TaskSupervisor: {} failed: {}", name, e);
                Err(TaskError::failed(name, e))
            }
            Err(e) if e.is_panic() => {
                error!("TaskSupervisor: {} panicked", name);
                Err(TaskError::failed(name, "panicked"))
            }
            Err(_) => {
                debug!("TaskSupervisor: {} cancelled", name);
                Err(TaskError::failed(name, "cancelled"))
            }
        }
    });

    (TaskEntry { abort, monitor }, started_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyrelay_types::ErrorCode;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    async fn forever() -> TaskResult {
        std::future::pending::<()>().await;
        Ok(())
    }

    #[tokio::test]
    async fn submit_and_cancel() {
        let sup = TaskSupervisor::new(Duration::from_secs(1));
        sup.submit("console", forever()).await.unwrap();
        assert!(sup.is_running("console"));
        assert_eq!(sup.names(), vec!["console"]);

        sup.cancel("console").await.unwrap();
        assert!(!sup.is_running("console"));
        assert!(sup.names().is_empty());
    }

    #[tokio::test]
    async fn duplicate_running_name_is_rejected() {
        let sup = TaskSupervisor::new(Duration::from_secs(1));
        sup.submit("watcher", forever()).await.unwrap();
        let err = sup.submit("watcher", forever()).await.unwrap_err();
        assert_eq!(err.code(), "TASK_DUPLICATE_NAME");
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn finished_name_can_be_reused() {
        let sup = TaskSupervisor::new(Duration::from_secs(1));
        sup.submit("once", async { Ok(()) }).await.unwrap();
        sup.wait("once").await.unwrap();
        sup.submit("once", async { Ok(()) }).await.unwrap();
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn cancel_unknown_is_not_found() {
        let sup = TaskSupervisor::default();
        assert!(matches!(
            sup.cancel("nope").await,
            Err(TaskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failure_is_isolated() {
        let sup = TaskSupervisor::new(Duration::from_secs(1));
        sup.submit("healthy", forever()).await.unwrap();
        sup.submit("broken", async { Err::<(), BoxError>("boom".into()) })
            .await
            .unwrap();
        sup.submit("panicky", async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        })
        .await
        .unwrap();

        let broken = sup.wait("broken").await.unwrap_err();
        assert!(broken.to_string().contains("boom"));
        let panicky = sup.wait("panicky").await.unwrap_err();
        assert!(panicky.to_string().contains("panicked"));
        assert!(sup.is_running("healthy"));
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn restart_replaces_task() {
        let runs = Arc::new(AtomicUsize::new(0));
        let sup = TaskSupervisor::new(Duration::from_secs(1));
        for _ in 0..2 {
            let runs = Arc::clone(&runs);
            sup.restart("loop", async move {
                runs.fetch_add(1, Ordering::SeqCst);
                forever().await
            })
            .await
            .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(sup.names(), vec!["loop"]);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_final() {
        let sup = TaskSupervisor::new(Duration::from_secs(1));
        sup.submit("a", forever()).await.unwrap();
        sup.submit("b", forever()).await.unwrap();
        sup.shutdown().await;
        sup.shutdown().await;
        assert!(sup.names().is_empty());
        assert!(matches!(
            sup.submit("c", forever()).await,
            Err(TaskError::ShuttingDown)
        ));
    }
}

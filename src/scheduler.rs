//! Periodic and background task scheduling.
//!
//! Every task runs on the tokio runtime and owns a `watch` stop signal. Periodic
//! tasks run their action, then sleep for the interval; the sleep does not account
//! for the action's own runtime, so drift is expected. A stop request interrupts the
//! sleep, and is also checked before every run, so a task stopped before its first
//! iteration never runs its action.
//!
//! # Lifecycle
//!
//! ```text
//! schedule() -> [run action -> sleep(interval)]* -> stop() -> exit
//!                     │
//!                     └── Err / panic: logged, loop continues
//! ```

use crate::error::{AppResult, PersonalityError};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Recurring unit of work. Each call produces the future for one run.
pub type TaskAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`TaskAction`].
pub fn task_action<F, Fut>(action: F) -> TaskAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || action().boxed())
}

struct TaskInner {
    name: String,
    stop_tx: watch::Sender<bool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a scheduled task. Clones refer to the same task.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.inner.name)
            .field("stopped", &*self.inner.stop_tx.borrow())
            .finish()
    }
}

impl TaskHandle {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Request the task to stop. Idempotent; never blocks.
    pub fn stop(&self) {
        self.inner.stop_tx.send_replace(true);
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.inner.stop_tx.borrow()
    }

    /// True once the task has exited (or was already joined).
    pub fn is_finished(&self) -> bool {
        self.inner
            .join
            .lock()
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the task to exit, aborting it after `timeout`.
    pub async fn join(&self, timeout: Duration) -> AppResult<()> {
        let Some(mut join) = self.inner.join.lock().take() else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, &mut join).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Task '{}' ended abnormally: {}", self.inner.name, e);
                Err(PersonalityError::TaskStop(self.inner.name.clone()))
            }
            Err(_) => {
                warn!(
                    "Task '{}' did not stop within {:?}; aborting",
                    self.inner.name, timeout
                );
                join.abort();
                Err(PersonalityError::TaskStop(self.inner.name.clone()))
            }
        }
    }
}

/// Runs named recurring and background jobs until they are stopped.
#[derive(Default)]
pub struct PeriodicTaskScheduler {
    tasks: Mutex<Vec<TaskHandle>>,
}

impl PeriodicTaskScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` every `interval` until the returned handle is stopped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        interval: Duration,
        action: TaskAction,
    ) -> TaskHandle {
        let name = name.into();
        let task_name = name.clone();
        self.spawn(name, move |stop_rx| run_periodic(task_name, interval, action, stop_rx))
    }

    /// Run a long-lived background future. It receives the stop signal and must exit
    /// promptly once the signal turns `true`.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, task: F) -> TaskHandle
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(task(stop_rx));
        let handle = TaskHandle {
            inner: Arc::new(TaskInner {
                name: name.into(),
                stop_tx,
                join: Mutex::new(Some(join)),
            }),
        };
        self.tasks.lock().push(handle.clone());
        handle
    }

    /// Names of tasks that have not been joined yet.
    pub fn task_names(&self) -> Vec<String> {
        self.tasks
            .lock()
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Signal every task to stop without waiting.
    pub fn stop_all(&self) {
        for task in self.tasks.lock().iter() {
            task.stop();
        }
    }

    /// Stop every task and wait up to `timeout` overall for them to exit.
    pub async fn shutdown(&self, timeout: Duration) -> AppResult<()> {
        self.stop_all();
        let tasks: Vec<TaskHandle> = std::mem::take(&mut *self.tasks.lock());
        let deadline = Instant::now() + timeout;

        let mut errors = Vec::new();
        for task in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if let Err(e) = task.join(remaining).await {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PersonalityError::ShutdownFailed(errors))
        }
    }
}

async fn run_periodic(
    name: String,
    interval: Duration,
    action: TaskAction,
    mut stop_rx: watch::Receiver<bool>,
) {
    info!("Starting periodic task '{}' every {:?}", name, interval);

    loop {
        if *stop_rx.borrow() {
            break;
        }

        match AssertUnwindSafe(action()).catch_unwind().await {
            Ok(Ok(())) => debug!("Periodic task '{}' ran", name),
            Ok(Err(e)) => error!("Periodic task '{}' failed: {:#}", name, e),
            Err(_) => error!("Periodic task '{}' panicked", name),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    // Every handle is gone; nobody can stop us anymore.
                    break;
                }
            }
        }
    }

    info!("Stopping periodic task '{}'", name);
}

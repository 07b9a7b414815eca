//! Task spawning and graceful shutdown.
//!
//! The node runs one long-lived async task per component (publisher,
//! follower, producer, observer). [`TaskManager`] owns the root
//! [`tokio_util::sync::CancellationToken`] and the shutdown-ordering list;
//! [`TaskExecutor`] is the cheaply-cloneable handle components use to spawn
//! work and to learn when to stop.

#![warn(missing_docs)]

use std::{future::Future, time::Duration};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A future that resolves once the node has begun graceful shutdown.
///
/// Components `tokio::select!` against this alongside their normal work so
/// that every suspension point is cancellation-aware.
#[derive(Debug, Clone)]
pub struct GracefulShutdown {
    token: CancellationToken,
}

impl GracefulShutdown {
    /// Waits until shutdown has been requested.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Returns `true` if shutdown has already been requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// A cheaply-cloneable handle used to spawn supervised tasks.
///
/// Mirrors the `TaskExecutor` used throughout reth's node-builder
/// crate (`spawn_critical`, `spawn_critical_with_graceful_shutdown_signal`):
/// a "critical" task is one whose early exit or panic should bring the
/// whole node down rather than silently vanish.
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    handle: tokio::runtime::Handle,
    shutdown: GracefulShutdown,
    panicked: PanicSignal,
}

#[derive(Debug, Clone)]
struct PanicSignal(CancellationToken);

impl TaskExecutor {
    /// Returns the shutdown signal this executor's tasks should observe.
    #[must_use]
    pub fn shutdown_signal(&self) -> GracefulShutdown {
        self.shutdown.clone()
    }

    /// Spawns `fut` as a critical task: if it returns `Err` or panics, the
    /// whole node is signalled to shut down rather than leaving a
    /// subsystem silently dead.
    pub fn spawn_critical<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        let shutdown = self.shutdown.token.clone();
        let panicked = self.panicked.clone();
        self.handle.spawn(async move {
            match fut.await {
                Ok(()) => {
                    info!(target: "tasks", task = name, "critical task exited cleanly");
                }
                Err(err) => {
                    error!(target: "tasks", task = name, %err, "critical task failed, shutting down");
                    panicked.0.cancel();
                    shutdown.cancel();
                }
            }
        });
    }

    /// Spawns a critical task that is handed the shutdown signal directly,
    /// for components whose main loop needs to `select!` against it rather
    /// than poll [`GracefulShutdown::is_requested`] between awaits.
    pub fn spawn_critical_with_graceful_shutdown_signal<F, Fut>(&self, name: &'static str, f: F)
    where
        F: FnOnce(GracefulShutdown) -> Fut,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        let fut = f(self.shutdown.clone());
        self.spawn_critical(name, fut);
    }
}

/// Owns the node's root cancellation token and the ordered list of
/// finalizers to run on shutdown.
///
/// Finalizers are run in reverse registration order (stop: tx pool,
/// follower, producer, publisher, context final commit), each bounded by
/// `finalizer_timeout`.
pub struct TaskManager {
    handle: tokio::runtime::Handle,
    shutdown: GracefulShutdown,
    panicked: PanicSignal,
    finalizers: Vec<(&'static str, Box<dyn FnOnce() -> BoxFinalizeFuture + Send>)>,
    finalizer_timeout: Duration,
}

type BoxFinalizeFuture = std::pin::Pin<Box<dyn Future<Output = ()> + Send>>;

impl TaskManager {
    /// Creates a new manager bound to the current tokio runtime.
    #[must_use]
    pub fn new(finalizer_timeout: Duration) -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
            shutdown: GracefulShutdown { token: CancellationToken::new() },
            panicked: PanicSignal(CancellationToken::new()),
            finalizers: Vec::new(),
            finalizer_timeout,
        }
    }

    /// Returns a handle components can use to spawn tasks.
    #[must_use]
    pub fn executor(&self) -> TaskExecutor {
        TaskExecutor {
            handle: self.handle.clone(),
            shutdown: self.shutdown.clone(),
            panicked: self.panicked.clone(),
        }
    }

    /// Registers a finalizer to run (in reverse order) during shutdown.
    pub fn register_finalizer<F, Fut>(&mut self, name: &'static str, finalizer: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.finalizers.push((name, Box::new(move || Box::pin(finalizer()))));
    }

    /// Returns `true` if a spawned critical task has already requested
    /// shutdown due to failure (as opposed to an external signal).
    #[must_use]
    pub fn task_panicked(&self) -> bool {
        self.panicked.0.is_cancelled()
    }

    /// Waits for an external shutdown signal (Ctrl-C) or an internal
    /// critical-task failure, then runs every registered finalizer in
    /// reverse order, each bounded by `finalizer_timeout`.
    ///
    /// Returns `true` if shutdown was triggered by a critical task failure
    /// rather than an external signal, so the caller can exit with a
    /// non-zero status instead of reporting a clean stop.
    pub async fn run_until_shutdown(mut self) -> bool {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(target: "tasks", "received shutdown signal");
            }
            () = self.shutdown.token.cancelled() => {
                warn!(target: "tasks", "shutting down due to critical task failure");
            }
        }
        self.shutdown.token.cancel();

        while let Some((name, finalizer)) = self.finalizers.pop() {
            info!(target: "tasks", finalizer = name, "running shutdown finalizer");
            let result = tokio::time::timeout(self.finalizer_timeout, finalizer()).await;
            if result.is_err() {
                error!(
                    target: "tasks",
                    finalizer = name,
                    timeout = ?self.finalizer_timeout,
                    "finalizer exceeded its shutdown budget, aborting process"
                );
                std::process::exit(2);
            }
        }

        self.task_panicked()
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("pending_finalizers", &self.finalizers.len())
            .field("finalizer_timeout", &self.finalizer_timeout)
            .finish_non_exhaustive()
    }
}

/// Runs a collection of joinable background handles to completion,
/// logging (rather than propagating) any panic. Used by tests that spawn
/// several tasks and want to wait for all of them without an executor.
pub async fn join_all(mut set: JoinSet<()>) {
    while let Some(result) = set.join_next().await {
        if let Err(err) = result {
            error!(target: "tasks", %err, "joined task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn critical_task_failure_triggers_shutdown() {
        let mut manager = TaskManager::new(Duration::from_millis(200));
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        manager.register_finalizer("mark-ran", move || async move {
            ran_clone.store(true, Ordering::SeqCst);
        });

        let executor = manager.executor();
        executor.spawn_critical("doomed", async { Err(eyre::eyre!("boom")) });

        let failed = manager.run_until_shutdown().await;
        assert!(ran.load(Ordering::SeqCst));
        assert!(failed);
    }

    #[tokio::test]
    async fn graceful_shutdown_signal_observed_by_select() {
        let manager = TaskManager::new(Duration::from_millis(200));
        let signal = manager.executor().shutdown_signal();
        assert!(!signal.is_requested());
    }
}

//! Unix signal handling for the daemon.
//!
//! - SIGTERM/SIGINT: graceful shutdown. No new remote calls start; a run in
//!   flight is abandoned without saving once its in-flight calls return.
//! - SIGHUP: run a sync now.

use std::io;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// Signal types that the daemon handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Shutdown signal (SIGTERM, SIGINT).
    Shutdown,
    /// Immediate sync request (SIGHUP).
    RunNow,
}

/// Signal handler that manages Unix signal processing.
pub struct SignalHandler {
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    /// Bumped on every run-now request.
    run_now_tx: Arc<watch::Sender<u64>>,
    run_now_rx: watch::Receiver<u64>,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHandler {
    /// Creates a new signal handler.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (run_now_tx, run_now_rx) = watch::channel(0);

        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            run_now_tx: Arc::new(run_now_tx),
            run_now_rx,
        }
    }

    /// Installs the signal handlers and spawns the listener task.
    ///
    /// Call once at daemon startup, from within a tokio runtime.
    #[cfg(unix)]
    pub fn spawn_listener(&self) -> io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;

        let shutdown_tx = self.shutdown_tx.clone();
        let run_now_tx = self.run_now_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sigterm.recv() => {
                        info!("received SIGTERM, initiating shutdown");
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                    _ = sigint.recv() => {
                        info!("received SIGINT, initiating shutdown");
                        let _ = shutdown_tx.send(true);
                        break;
                    }
                    _ = sighup.recv() => {
                        info!("received SIGHUP, requesting a sync");
                        run_now_tx.send_modify(|n| *n += 1);
                    }
                }
            }

            debug!("signal listener stopped");
        });
        Ok(())
    }

    /// Non-Unix implementation: Ctrl+C only.
    #[cfg(not(unix))]
    pub fn spawn_listener(&self) -> io::Result<()> {
        let shutdown_tx = self.shutdown_tx.clone();

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("received Ctrl+C, initiating shutdown");
                let _ = shutdown_tx.send(true);
            }
        });
        Ok(())
    }

    /// Returns true if shutdown has been signaled.
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Programmatically triggers a shutdown.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Programmatically requests a sync.
    pub fn trigger_run_now(&self) {
        self.run_now_tx.send_modify(|n| *n += 1);
    }

    /// Creates a shutdown handle that can be passed to other components.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
            rx: self.shutdown_rx.clone(),
        }
    }

    /// Returns a stream of run-now requests made after this call.
    pub fn run_now_requests(&self) -> RunNowRequests {
        let mut rx = self.run_now_rx.clone();
        rx.mark_unchanged();
        RunNowRequests { rx }
    }
}

/// Run-now requests (SIGHUP).
pub struct RunNowRequests {
    rx: watch::Receiver<u64>,
}

impl RunNowRequests {
    /// Waits for the next request. Returns `None` once the handler is gone.
    ///
    /// Requests arriving while the previous one is being served coalesce.
    pub async fn next(&mut self) -> Option<Signal> {
        self.rx.changed().await.ok()?;
        self.rx.mark_unchanged();
        Some(Signal::RunNow)
    }
}

/// A signal that completes when shutdown is signaled.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Waits for the shutdown signal.
    pub async fn wait(mut self) {
        // An error means every sender is gone; nothing can trigger anymore.
        let _ = self.rx.wait_for(|shutdown| *shutdown).await;
    }
}

/// A handle for triggering or checking shutdown status.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    /// A handle not connected to any signal listener.
    pub fn detached() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Triggers a shutdown.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Returns true if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns a future that completes when shutdown is triggered.
    pub fn wait(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.rx.clone(),
        }
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_handler_shutdown() {
        let handler = SignalHandler::new();
        let handle = handler.shutdown_handle();
        assert!(!handler.is_shutdown());

        handler.trigger_shutdown();

        assert!(handler.is_shutdown());
        assert!(handle.is_shutdown());
    }

    #[tokio::test]
    async fn shutdown_handle_wait() {
        let handler = SignalHandler::new();
        let handle = handler.shutdown_handle();

        let wait_handle = handle.clone();
        let wait_task = tokio::spawn(async move {
            wait_handle.wait().wait().await;
            true
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.trigger();

        let result = tokio::time::timeout(Duration::from_millis(100), wait_task).await;
        assert!(result.unwrap().unwrap());
    }

    #[tokio::test]
    async fn run_now_requests_coalesce() {
        let handler = SignalHandler::new();
        handler.trigger_run_now();

        // Requests made before subscribing are not replayed.
        let mut requests = handler.run_now_requests();
        let pending = tokio::time::timeout(Duration::from_millis(20), requests.next()).await;
        assert!(pending.is_err());

        handler.trigger_run_now();
        handler.trigger_run_now();
        let first = tokio::time::timeout(Duration::from_millis(100), requests.next()).await;
        assert_eq!(first.unwrap(), Some(Signal::RunNow));

        let second = tokio::time::timeout(Duration::from_millis(20), requests.next()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn detached_handle() {
        let handle = ShutdownHandle::detached();
        assert!(!handle.is_shutdown());
        handle.trigger();
        assert!(handle.is_shutdown());
        handle.wait().wait().await;
    }
}

//! Daemon command: syncs on a schedule in the foreground.
//!
//! Components, in start order:
//! - PID file (one daemon per data directory)
//! - signal handler (SIGTERM/SIGINT shut down, SIGHUP runs a sync now)
//! - sync service
//! - scheduler, plus a task forwarding SIGHUP to it

use std::sync::Arc;
use std::time::Duration;

use icsbridge_core::RunTrigger;
use icsbridge_server::{PidFile, Scheduler, SignalHandler, default_pid_path};
use tracing::{info, warn};

use crate::commands::build_service;
use crate::config::BridgeConfig;
use crate::error::CliResult;

/// How long shutdown waits for a run in flight to finish its open calls.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

/// Runs until SIGTERM or SIGINT.
pub async fn run(config: &BridgeConfig) -> CliResult<()> {
    config.validate()?;
    let _pid_file = PidFile::create(default_pid_path(&config.data_dir()))?;

    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener()?;

    let service = Arc::new(build_service(config, signal_handler.shutdown_handle())?);

    let scheduler = Scheduler::new(config.scheduler_config());
    let scheduler_handle = scheduler.handle();

    let sync_service = service.clone();
    let scheduler_task = tokio::spawn(scheduler.run(move |trigger| {
        let service = sync_service.clone();
        async move { service.run_once(trigger).await }
    }));

    let mut run_now = signal_handler.run_now_requests();
    let forward_handle = scheduler_handle.clone();
    let forward_task = tokio::spawn(async move {
        while run_now.next().await.is_some() {
            if forward_handle.run_now(RunTrigger::Signal).await.is_err() {
                break;
            }
        }
    });

    info!(
        poll_seconds = config.sync.poll_seconds,
        data_dir = %config.data_dir().display(),
        "daemon started"
    );

    signal_handler.shutdown_handle().wait().wait().await;

    info!("shutting down");
    forward_task.abort();
    if let Err(e) = scheduler_handle.stop().await {
        warn!(error = %e, "failed to send stop command to scheduler");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, scheduler_task).await.is_err() {
        warn!("scheduler did not stop in time");
    }

    info!("daemon stopped");
    Ok(())
}

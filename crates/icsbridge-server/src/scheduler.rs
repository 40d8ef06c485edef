//! Periodic sync scheduling.
//!
//! The scheduler calls a sync function:
//! - once at startup, then every `sync_interval` (with jitter)
//! - after failures, on an exponential backoff instead of the interval
//! - immediately on [`SchedulerCommand::RunNow`]
//!
//! An authentication failure halts scheduled runs: retrying a revoked
//! token every few minutes only fills the logs. Only a requested run
//! (manual or SIGHUP) that succeeds lifts the halt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use icsbridge_core::{RunSummary, RunTrigger};
use rand::Rng;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Base interval between runs.
    pub sync_interval: Duration,
    /// Maximum jitter as a fraction of the interval (0.0-1.0).
    pub jitter_fraction: f64,
    /// Delay after the first failure.
    pub initial_backoff: Duration,
    /// Upper bound of the failure backoff.
    pub max_backoff: Duration,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(900),
            jitter_fraction: 0.1,
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(900),
            backoff_multiplier: 2.0,
        }
    }
}

impl SchedulerConfig {
    /// Creates a config with the given interval.
    pub fn new(sync_interval: Duration) -> Self {
        Self {
            sync_interval,
            max_backoff: sync_interval.max(Duration::from_secs(1)),
            ..Default::default()
        }
    }

    /// Builder: set jitter fraction.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Builder: set backoff parameters.
    pub fn with_backoff(mut self, initial: Duration, max: Duration, multiplier: f64) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self.backoff_multiplier = multiplier;
        self
    }

    /// The interval with jitter applied.
    pub fn next_sync_delay(&self) -> Duration {
        let base = self.sync_interval.as_secs_f64();
        let range = base * self.jitter_fraction;
        let jitter = if range > 0.0 {
            rand::rng().random_range(-range..=range)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(0.0))
    }

    /// Delay after `consecutive_failures` failed runs.
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let delay = self.initial_backoff.as_secs_f64()
            * self.backoff_multiplier.powi(consecutive_failures as i32 - 1);
        Duration::from_secs_f64(delay.min(self.max_backoff.as_secs_f64()))
    }
}

/// Commands accepted by a running scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Run now.
    RunNow { trigger: RunTrigger },
    /// Skip scheduled runs until resumed.
    Pause,
    /// Resume scheduled runs.
    Resume,
    /// Leave the loop.
    Stop,
}

/// Observable scheduler state.
#[derive(Debug, Clone, Default)]
pub struct SchedulerState {
    /// Scheduled runs are skipped.
    pub paused: bool,
    /// Scheduled runs are skipped until a requested run succeeds.
    pub halted: bool,
    /// Failed runs since the last success.
    pub consecutive_failures: u32,
    /// Last completed run.
    pub last_success: Option<DateTime<Utc>>,
    /// Last run attempt, successful or not.
    pub last_attempt: Option<DateTime<Utc>>,
    /// Error of the last failed run.
    pub last_error: Option<String>,
    /// Summary of the last completed run.
    pub last_summary: Option<RunSummary>,
}

impl SchedulerState {
    /// Records a completed run.
    pub fn record_success(&mut self, summary: RunSummary) {
        self.consecutive_failures = 0;
        self.halted = false;
        self.last_success = Some(Utc::now());
        self.last_attempt = self.last_success;
        self.last_error = None;
        self.last_summary = Some(summary);
    }

    /// Records a failed run.
    pub fn record_failure(&mut self, error: &SyncError) {
        self.consecutive_failures += 1;
        self.last_attempt = Some(Utc::now());
        self.last_error = Some(error.to_string());
        if error.is_auth() {
            self.halted = true;
        }
    }
}

/// Shared scheduler state.
pub type SharedSchedulerState = Arc<RwLock<SchedulerState>>;

/// Drives periodic runs.
pub struct Scheduler {
    config: SchedulerConfig,
    state: SharedSchedulerState,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl Scheduler {
    /// Creates a scheduler.
    pub fn new(config: SchedulerConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(16);
        Self {
            config,
            state: Arc::new(RwLock::new(SchedulerState::default())),
            command_tx,
            command_rx,
        }
    }

    /// Returns a handle for sending commands.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            command_tx: self.command_tx.clone(),
            state: self.state.clone(),
        }
    }

    /// Runs the loop until [`SchedulerCommand::Stop`].
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn(RunTrigger) -> Fut + Send + Sync,
        Fut: Future<Output = SyncResult<RunSummary>> + Send,
    {
        info!(
            interval_secs = self.config.sync_interval.as_secs(),
            "scheduler started"
        );

        self.do_sync(&sync_fn, RunTrigger::Scheduled).await;

        loop {
            let delay = self.next_delay().await;
            debug!(delay_secs = delay.as_secs(), "next scheduled run");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let state = self.state.read().await;
                    if state.paused || state.halted {
                        debug!(paused = state.paused, halted = state.halted, "skipping scheduled run");
                        continue;
                    }
                    drop(state);
                    self.do_sync(&sync_fn, RunTrigger::Scheduled).await;
                }
                command = self.command_rx.recv() => match command {
                    Some(SchedulerCommand::RunNow { trigger }) => {
                        debug!(trigger = ?trigger, "run requested");
                        self.do_sync(&sync_fn, trigger).await;
                    }
                    Some(SchedulerCommand::Pause) => {
                        info!("scheduler paused");
                        self.state.write().await.paused = true;
                    }
                    Some(SchedulerCommand::Resume) => {
                        info!("scheduler resumed");
                        self.state.write().await.paused = false;
                    }
                    Some(SchedulerCommand::Stop) | None => {
                        info!("scheduler stopping");
                        break;
                    }
                },
            }
        }
    }

    async fn next_delay(&self) -> Duration {
        let failures = self.state.read().await.consecutive_failures;
        if failures > 0 {
            self.config.backoff_delay(failures)
        } else {
            self.config.next_sync_delay()
        }
    }

    async fn do_sync<F, Fut>(&self, sync_fn: &F, trigger: RunTrigger)
    where
        F: Fn(RunTrigger) -> Fut,
        Fut: Future<Output = SyncResult<RunSummary>>,
    {
        match sync_fn(trigger).await {
            Ok(summary) => {
                debug!(summary = %summary, "run finished");
                self.state.write().await.record_success(summary);
            }
            // The other run's outcome is what counts.
            Err(SyncError::Busy) => debug!("run already in progress"),
            Err(SyncError::Cancelled) => debug!("run cancelled"),
            Err(e) => {
                if e.is_auth() {
                    error!(error = %e, "authentication failed, scheduled runs halted until a manual run succeeds");
                } else {
                    warn!(error = %e, "run failed");
                }
                self.state.write().await.record_failure(&e);
            }
        }
    }
}

/// Handle for commanding a running scheduler.
#[derive(Clone, Debug)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: SharedSchedulerState,
}

impl SchedulerHandle {
    /// Requests an immediate run.
    pub async fn run_now(
        &self,
        trigger: RunTrigger,
    ) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx
            .send(SchedulerCommand::RunNow { trigger })
            .await
    }

    /// Pauses scheduled runs.
    pub async fn pause(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Pause).await
    }

    /// Resumes scheduled runs.
    pub async fn resume(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Resume).await
    }

    /// Stops the scheduler.
    pub async fn stop(&self) -> Result<(), mpsc::error::SendError<SchedulerCommand>> {
        self.command_tx.send(SchedulerCommand::Stop).await
    }

    /// Snapshot of the scheduler state.
    pub async fn state(&self) -> SchedulerState {
        self.state.read().await.clone()
    }
}

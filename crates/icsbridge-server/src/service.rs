//! The sync service: one object owning the feed, the target, the state store
//! and the run lock.
//!
//! [`SyncService::run_once`] is the whole contract exposed to the scheduler,
//! the CLI and any control surface. Runs are serialized: a second caller gets
//! [`SyncError::Busy`] instead of racing the first over the state file.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use icsbridge_core::{RunSummary, RunTrigger, SyncState, SyncWindow, SyncedRecord};
use icsbridge_providers::{EventTemplate, FeedSource, ManagedEvent, TargetCalendar, expand};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::reconcile::{self, ApplyOptions, Plan, PlanOptions, RemoteView, WindowExitPolicy};
use crate::retry::RetryPolicy;
use crate::signals::ShutdownHandle;
use crate::store::StateStore;

/// Tunables for a sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Days before now included in the window.
    pub lookback_days: u32,
    /// Days after now included in the window.
    pub lookahead_days: u32,
    /// How occurrences are rendered on the target.
    pub template: EventTemplate,
    /// What happens to occurrences that disappear.
    pub window_exit: WindowExitPolicy,
    /// Maximum concurrent remote calls.
    pub concurrency: usize,
    /// Retry policy for transient remote failures.
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            lookback_days: 1,
            lookahead_days: 30,
            template: EventTemplate::default(),
            window_exit: WindowExitPolicy::default(),
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncOptions {
    /// Builder: set the window bounds in days.
    pub fn with_window(mut self, lookback_days: u32, lookahead_days: u32) -> Self {
        self.lookback_days = lookback_days;
        self.lookahead_days = lookahead_days;
        self
    }

    /// Builder: set the rendering template.
    pub fn with_template(mut self, template: EventTemplate) -> Self {
        self.template = template;
        self
    }

    /// Builder: set the window exit policy.
    pub fn with_window_exit(mut self, policy: WindowExitPolicy) -> Self {
        self.window_exit = policy;
        self
    }

    /// Builder: set the concurrency bound.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Builder: set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The sync window around `now`.
    pub fn window(&self, now: DateTime<Utc>) -> SyncWindow {
        SyncWindow::around(now, self.lookback_days, self.lookahead_days)
    }
}

/// A dry-run result.
#[derive(Debug, Clone)]
pub struct DryRun {
    /// The window the feed was expanded in.
    pub window: SyncWindow,
    /// Malformed source entries skipped.
    pub skipped: usize,
    /// What a run would do now.
    pub plan: Plan,
}

/// Differences between the remote calendar and the sync state.
#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    /// The window that was listed.
    pub window: SyncWindow,
    /// Managed remote events found in the window.
    pub remote_managed: usize,
    /// Records in the sync state.
    pub tracked: usize,
    /// Managed remote events no record points to.
    pub untracked: Vec<ManagedEvent>,
    /// Records whose remote event was not found in the window.
    pub missing: Vec<SyncedRecord>,
}

impl AuditReport {
    /// Returns true if remote and state agree.
    pub fn is_clean(&self) -> bool {
        self.untracked.is_empty() && self.missing.is_empty()
    }
}

/// Runs reconciliations against one feed and one target.
pub struct SyncService {
    feed: Arc<dyn FeedSource>,
    target: Arc<dyn TargetCalendar>,
    store: StateStore,
    options: SyncOptions,
    run_lock: Mutex<()>,
    shutdown: ShutdownHandle,
}

impl SyncService {
    /// Creates a service.
    pub fn new(
        feed: Arc<dyn FeedSource>,
        target: Arc<dyn TargetCalendar>,
        store: StateStore,
        options: SyncOptions,
    ) -> Self {
        Self {
            feed,
            target,
            store,
            options,
            run_lock: Mutex::new(()),
            shutdown: ShutdownHandle::detached(),
        }
    }

    /// Builder: observe this shutdown handle during runs.
    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// The run options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// The state store.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Runs one reconciliation, or fails with [`SyncError::Busy`] if one is
    /// already in flight.
    ///
    /// Per-occurrence failures do not fail the run; they are listed in the
    /// returned summary. Every run, aborted or not, is appended to the
    /// history. The state is only saved when the run completes.
    pub async fn run_once(&self, trigger: RunTrigger) -> SyncResult<RunSummary> {
        let _guard = self.run_lock.try_lock().map_err(|_| SyncError::Busy)?;
        self.run_locked(trigger).await
    }

    /// Like [`run_once`](Self::run_once), but waits for a run in flight.
    pub async fn run_once_queued(&self, trigger: RunTrigger) -> SyncResult<RunSummary> {
        let _guard = self.run_lock.lock().await;
        self.run_locked(trigger).await
    }

    async fn run_locked(&self, trigger: RunTrigger) -> SyncResult<RunSummary> {
        let mut summary = RunSummary::start(trigger, Utc::now());
        info!(run_id = %summary.run_id, trigger = ?trigger, "sync run started");

        match self.execute(&mut summary).await {
            Ok(state) => {
                summary.complete(Utc::now());
                self.store.save(&state, &summary)?;
                info!(
                    run_id = %summary.run_id,
                    in_window = summary.in_window,
                    created = summary.created,
                    updated = summary.updated,
                    removed = summary.removed,
                    errored = summary.errored,
                    "sync run completed"
                );
                Ok(summary)
            }
            Err(err) => {
                summary.abort(Utc::now(), err.to_string());
                if let Err(e) = self.store.append_history(&summary) {
                    warn!(error = %e, "cannot record aborted run");
                }
                warn!(run_id = %summary.run_id, error = %err, "sync run aborted, state not saved");
                Err(err)
            }
        }
    }

    async fn execute(&self, summary: &mut RunSummary) -> SyncResult<SyncState> {
        let (dry, prior) = self.prepare(summary.started_at).await?;
        summary.skipped = dry.skipped;

        let apply_options = ApplyOptions {
            retry: self.options.retry.clone(),
            concurrency: self.options.concurrency,
        };
        let settlements =
            reconcile::apply(&dry.plan, self.target.as_ref(), &apply_options, &self.shutdown).await?;

        reconcile::summarize(&dry.plan, &settlements, summary);
        Ok(reconcile::settle(&prior, &dry.plan, &settlements, Utc::now()))
    }

    /// Fetches, expands, lists the target and plans.
    async fn prepare(&self, now: DateTime<Utc>) -> SyncResult<(DryRun, SyncState)> {
        if self.shutdown.is_shutdown() {
            return Err(SyncError::Cancelled);
        }

        let document = self.feed.fetch().await.map_err(SyncError::Fetch)?;
        let window = self.options.window(now);
        let expansion = expand(&document, &window).map_err(SyncError::Fetch)?;
        debug!(
            feed = %self.feed.describe(),
            occurrences = expansion.occurrences.len(),
            skipped = expansion.skipped,
            "feed expanded"
        );

        let remote = self.remote_view(window).await?;
        let prior = self.store.load();
        let plan = reconcile::plan(
            &expansion.occurrences,
            &prior,
            &remote,
            &PlanOptions {
                template: self.options.template.clone(),
                window_exit: self.options.window_exit,
                now,
            },
        );
        let dry = DryRun {
            window,
            skipped: expansion.skipped,
            plan,
        };
        Ok((dry, prior))
    }

    /// Lists the managed events in `window`.
    ///
    /// Rejected credentials abort the run. Any other listing failure only
    /// costs drift detection: the plan then trusts the state.
    async fn remote_view(&self, window: SyncWindow) -> SyncResult<RemoteView> {
        let stop = || self.shutdown.is_shutdown();
        match self
            .options
            .retry
            .run(|| self.target.list_managed(window), stop)
            .await
        {
            Ok(events) => Ok(RemoteView::listed(events)),
            Err(e) if e.is_auth() => Err(SyncError::Auth(e)),
            Err(e) => {
                warn!(error = %e, "cannot list target, trusting sync state");
                Ok(RemoteView::unknown())
            }
        }
    }

    /// Computes what a run would do now without writing to the target or
    /// the state.
    pub async fn plan_only(&self) -> SyncResult<DryRun> {
        let (dry, _) = self.prepare(Utc::now()).await?;
        Ok(dry)
    }

    /// Returns up to `limit` past runs, newest first.
    pub fn history(&self, limit: usize) -> Vec<RunSummary> {
        self.store.history(limit)
    }

    /// Compares the managed events on the target with the sync state.
    ///
    /// Read-only. Untracked managed events typically come from a lost state
    /// file; they are reported, never deleted.
    pub async fn audit(&self) -> SyncResult<AuditReport> {
        let window = self.options.window(Utc::now());
        let remote = self
            .target
            .list_managed(window)
            .await
            .map_err(SyncError::from_target)?;
        let state = self.store.load();

        let untracked: Vec<ManagedEvent> = remote
            .iter()
            .filter(|event| match &event.key {
                Some(key) => state
                    .get(key)
                    .is_none_or(|record| record.remote_id != event.remote_id),
                None => true,
            })
            .cloned()
            .collect();

        let missing: Vec<SyncedRecord> = state
            .iter()
            .filter(|record| record.occurrence_end.is_none_or(|end| end > window.start))
            .filter(|record| !remote.iter().any(|event| event.remote_id == record.remote_id))
            .cloned()
            .collect();

        info!(
            remote = remote.len(),
            tracked = state.len(),
            untracked = untracked.len(),
            missing = missing.len(),
            "audit finished"
        );
        Ok(AuditReport {
            window,
            remote_managed: remote.len(),
            tracked: state.len(),
            untracked,
            missing,
        })
    }
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("feed", &self.feed.describe())
            .field("target", &self.target.name())
            .field("store", &self.store)
            .field("options", &self.options)
            .finish()
    }
}

//! The reconciliation engine.
//!
//! A run is three steps:
//!
//! 1. [`plan`] diffs the desired occurrences against the prior state and
//!    what the target currently holds ([`RemoteView`]), and yields the
//!    minimal set of [`Action`]s. Pure.
//! 2. [`apply`] executes the actions against a [`TargetCalendar`] with
//!    bounded concurrency and retries, producing one [`Settlement`] per
//!    action that was started.
//! 3. [`settle`] folds the successful settlements into the next
//!    [`SyncState`]. Failed actions leave their prior record untouched, so a
//!    partially failed run never loses track of a remote event.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::stream::{self, StreamExt};
use icsbridge_core::{
    ActionKind, Fingerprint, RunSummary, SourceOccurrence, StableKey, SyncState, SyncedRecord,
    fingerprint, key_of,
};
use icsbridge_providers::{
    EventTemplate, ManagedEvent, MirrorEvent, ProviderError, RemoteOutcome, TargetCalendar,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;
use crate::signals::ShutdownHandle;

/// What happens to a tracked occurrence that is no longer desired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowExitPolicy {
    /// Delete the remote event.
    #[default]
    Delete,
    /// Drop the record but keep the remote event, if the occurrence has
    /// already ended. Occurrences removed while still upcoming are deleted.
    Forget,
}

impl WindowExitPolicy {
    /// Returns the config spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Forget => "forget",
        }
    }
}

impl fmt::Display for WindowExitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowExitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "forget" => Ok(Self::Forget),
            other => Err(format!("unknown window exit policy '{}' (expected delete or forget)", other)),
        }
    }
}

/// Inputs to [`plan`] besides the occurrences and the prior state.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// How occurrences are rendered.
    pub template: EventTemplate,
    /// Policy for records no longer desired.
    pub window_exit: WindowExitPolicy,
    /// Reference time for the forget policy.
    pub now: DateTime<Utc>,
}

/// The managed events the target holds in the window.
///
/// Lets [`plan`] notice tracked events that were edited or deleted behind
/// our back. When the listing is unavailable the prior state is trusted.
#[derive(Debug, Clone, Default)]
pub struct RemoteView {
    /// Listed events by remote id; `None` when not listed.
    events: Option<HashMap<String, ManagedEvent>>,
}

/// How a tracked remote event differs from what we wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drift {
    Missing,
    Edited,
}

impl RemoteView {
    /// Nothing is known about the target.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// The target was listed and holds `events`.
    pub fn listed(events: Vec<ManagedEvent>) -> Self {
        let events = events
            .into_iter()
            .map(|event| (event.remote_id.clone(), event))
            .collect();
        Self { events: Some(events) }
    }

    /// Returns true if the target was listed.
    pub fn is_listed(&self) -> bool {
        self.events.is_some()
    }

    fn drift(&self, record: &SyncedRecord, rendered: &MirrorEvent) -> Option<Drift> {
        let events = self.events.as_ref()?;
        match events.get(&record.remote_id) {
            None => Some(Drift::Missing),
            Some(remote) if !remote.matches(rendered) => Some(Drift::Edited),
            Some(_) => None,
        }
    }
}

/// One remote mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The occurrence is new.
    Create {
        event: MirrorEvent,
        fingerprint: Fingerprint,
        end: DateTime<Utc>,
    },
    /// The occurrence changed (or the rendering did).
    Update {
        remote_id: String,
        event: MirrorEvent,
        fingerprint: Fingerprint,
        end: DateTime<Utc>,
    },
    /// The occurrence is gone.
    Delete { key: StableKey, remote_id: String },
}

impl Action {
    /// Identity of the affected occurrence.
    pub fn key(&self) -> &StableKey {
        match self {
            Self::Create { event, .. } | Self::Update { event, .. } => &event.key,
            Self::Delete { key, .. } => key,
        }
    }

    /// The action kind.
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Create { .. } => ActionKind::Create,
            Self::Update { .. } => ActionKind::Update,
            Self::Delete { .. } => ActionKind::Delete,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { event, .. } => write!(f, "create {} \"{}\"", event.key, event.summary),
            Self::Update { event, remote_id, .. } => {
                write!(f, "update {} ({}) \"{}\"", event.key, remote_id, event.summary)
            }
            Self::Delete { key, remote_id } => write!(f, "delete {} ({})", key, remote_id),
        }
    }
}

/// The diff between desired occurrences and prior state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Creates and updates in key order, then deletes in key order.
    pub actions: Vec<Action>,
    /// Desired occurrences already mirrored as-is.
    pub unchanged: usize,
    /// Records to drop without a remote call (forget policy).
    pub forget: Vec<StableKey>,
    /// Distinct desired occurrences.
    pub in_window: usize,
    /// The rendering profile differs from the one in the prior state.
    pub profile_changed: bool,
    /// Rendering profile the plan was made with.
    pub profile: String,
    /// Unchanged occurrences rewritten because the remote copy was edited
    /// or deleted.
    pub drifted: usize,
}

impl Plan {
    /// Number of actions of `kind`.
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind() == kind).count()
    }

    /// Returns true if the plan needs no remote call and no state change.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.forget.is_empty()
    }
}

/// Diffs `desired` against `prior` and the `remote` copies.
///
/// The source wins: a tracked event whose remote copy was edited is
/// updated back, one that was deleted remotely is created again under the
/// same key. Duplicate keys in `desired` keep their first occurrence.
pub fn plan(
    desired: &[SourceOccurrence],
    prior: &SyncState,
    remote: &RemoteView,
    options: &PlanOptions,
) -> Plan {
    let profile = options.template.profile();
    let profile_changed = prior.render_profile.as_deref() != Some(profile.as_str());

    let mut wanted: BTreeMap<StableKey, &SourceOccurrence> = BTreeMap::new();
    for occurrence in desired {
        wanted.entry(key_of(occurrence)).or_insert(occurrence);
    }

    let mut plan = Plan {
        in_window: wanted.len(),
        profile_changed,
        profile,
        ..Plan::default()
    };

    for (key, occurrence) in &wanted {
        let fingerprint = fingerprint(occurrence);
        let event = options.template.render(occurrence);
        let Some(record) = prior.get(key) else {
            plan.actions.push(Action::Create {
                event,
                fingerprint,
                end: occurrence.end,
            });
            continue;
        };

        let changed = record.fingerprint != fingerprint || profile_changed;
        match remote.drift(record, &event) {
            Some(Drift::Missing) => {
                if !changed {
                    plan.drifted += 1;
                }
                debug!(key = %key, remote_id = %record.remote_id, "remote event missing, recreating");
                plan.actions.push(Action::Create {
                    event,
                    fingerprint,
                    end: occurrence.end,
                });
            }
            drift if changed || drift.is_some() => {
                if !changed {
                    plan.drifted += 1;
                    debug!(key = %key, remote_id = %record.remote_id, "remote event edited, restoring");
                }
                plan.actions.push(Action::Update {
                    remote_id: record.remote_id.clone(),
                    event,
                    fingerprint,
                    end: occurrence.end,
                });
            }
            _ => plan.unchanged += 1,
        }
    }

    for record in prior.iter().filter(|r| !wanted.contains_key(&r.key)) {
        let expired = record.occurrence_end.is_some_and(|end| end <= options.now);
        if options.window_exit == WindowExitPolicy::Forget && expired {
            plan.forget.push(record.key.clone());
        } else {
            plan.actions.push(Action::Delete {
                key: record.key.clone(),
                remote_id: record.remote_id.clone(),
            });
        }
    }

    debug!(
        creates = plan.count(ActionKind::Create),
        updates = plan.count(ActionKind::Update),
        deletes = plan.count(ActionKind::Delete),
        forget = plan.forget.len(),
        unchanged = plan.unchanged,
        drifted = plan.drifted,
        profile_changed,
        "planned reconciliation"
    );
    plan
}

/// The result of one started action.
#[derive(Debug)]
pub enum Settlement {
    /// A remote event now exists for the key. `healed` is set when an update
    /// found the remote event missing and recreated it.
    Created {
        key: StableKey,
        remote_id: String,
        fingerprint: Fingerprint,
        end: DateTime<Utc>,
        healed: bool,
    },
    /// The remote event was overwritten.
    Updated {
        key: StableKey,
        remote_id: String,
        fingerprint: Fingerprint,
        end: DateTime<Utc>,
    },
    /// The remote event is gone (deleted now, or already missing).
    Deleted { key: StableKey, already_gone: bool },
    /// The action failed; the prior record stays authoritative.
    Failed {
        key: StableKey,
        action: ActionKind,
        error: ProviderError,
    },
}

impl Settlement {
    /// Identity of the affected occurrence.
    pub fn key(&self) -> &StableKey {
        match self {
            Self::Created { key, .. }
            | Self::Updated { key, .. }
            | Self::Deleted { key, .. }
            | Self::Failed { key, .. } => key,
        }
    }
}

/// Knobs for [`apply`].
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
    /// Maximum concurrent remote calls.
    pub concurrency: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            concurrency: 4,
        }
    }
}

/// Why the remaining actions were not started.
#[derive(Default)]
struct Halt {
    auth: Mutex<Option<ProviderError>>,
}

impl Halt {
    fn is_set(&self, shutdown: &ShutdownHandle) -> bool {
        shutdown.is_shutdown() || self.auth.lock().map(|a| a.is_some()).unwrap_or(true)
    }

    fn record_auth(&self, error: &ProviderError) {
        if let Ok(mut auth) = self.auth.lock()
            && auth.is_none()
        {
            let mut copy = ProviderError::new(error.code(), error.message());
            if let Some(provider) = error.provider() {
                copy = copy.with_provider(provider);
            }
            *auth = Some(copy);
        }
    }
}

/// Executes the plan's actions.
///
/// Once shutdown is requested or the target rejects our credentials, no
/// further action is started. Actions already in flight complete, then the
/// run is abandoned with [`SyncError::Cancelled`] or [`SyncError::Auth`].
pub async fn apply(
    plan: &Plan,
    target: &dyn TargetCalendar,
    options: &ApplyOptions,
    shutdown: &ShutdownHandle,
) -> SyncResult<Vec<Settlement>> {
    let halt = Halt::default();
    let concurrency = options.concurrency.max(1);

    // Boxed: the bare `apply_one` future is not general over the closure's
    // borrows, and callers' futures would stop being `Send`.
    let settlements: Vec<Option<Settlement>> = stream::iter(0..plan.actions.len())
        .map(|i| apply_one(&plan.actions[i], target, &options.retry, &halt, shutdown).boxed())
        .buffer_unordered(concurrency)
        .collect()
        .await;

    let auth = halt.auth.lock().ok().and_then(|mut a| a.take());
    if let Some(error) = auth {
        warn!(error = %error, "target rejected credentials, abandoning run");
        return Err(SyncError::Auth(error));
    }
    if shutdown.is_shutdown() {
        info!("shutdown requested, abandoning run");
        return Err(SyncError::Cancelled);
    }
    Ok(settlements.into_iter().flatten().collect())
}

async fn apply_one(
    action: &Action,
    target: &dyn TargetCalendar,
    retry: &RetryPolicy,
    halt: &Halt,
    shutdown: &ShutdownHandle,
) -> Option<Settlement> {
    if halt.is_set(shutdown) {
        return None;
    }
    let stop = || halt.is_set(shutdown);

    let settlement = match action {
        Action::Create {
            event,
            fingerprint,
            end,
        } => match retry.run(|| target.create(event), stop).await {
            Ok(remote_id) => Settlement::Created {
                key: event.key.clone(),
                remote_id,
                fingerprint: fingerprint.clone(),
                end: *end,
                healed: false,
            },
            Err(error) => failed(action, error),
        },
        Action::Update {
            remote_id,
            event,
            fingerprint,
            end,
        } => match retry.run(|| target.update(remote_id, event), stop).await {
            Ok(RemoteOutcome::Applied) => Settlement::Updated {
                key: event.key.clone(),
                remote_id: remote_id.clone(),
                fingerprint: fingerprint.clone(),
                end: *end,
            },
            Ok(RemoteOutcome::NotFound) => {
                info!(key = %event.key, remote_id = %remote_id, "remote event missing, recreating");
                match retry.run(|| target.create(event), stop).await {
                    Ok(new_id) => Settlement::Created {
                        key: event.key.clone(),
                        remote_id: new_id,
                        fingerprint: fingerprint.clone(),
                        end: *end,
                        healed: true,
                    },
                    Err(error) => failed(action, error),
                }
            }
            Err(error) => failed(action, error),
        },
        Action::Delete { key, remote_id } => match retry.run(|| target.delete(remote_id), stop).await {
            Ok(outcome) => Settlement::Deleted {
                key: key.clone(),
                already_gone: outcome == RemoteOutcome::NotFound,
            },
            Err(error) => failed(action, error),
        },
    };

    if let Settlement::Failed { key, action, error } = &settlement {
        if error.is_auth() {
            halt.record_auth(error);
        } else {
            warn!(key = %key, action = %action, error = %error, "action failed");
        }
    }
    Some(settlement)
}

fn failed(action: &Action, error: ProviderError) -> Settlement {
    Settlement::Failed {
        key: action.key().clone(),
        action: action.kind(),
        error,
    }
}

/// Builds the next state from the prior one and the run's settlements.
///
/// Only successful settlements change records. The new rendering profile
/// is adopted unless an update made because of the profile change failed;
/// keeping the old one makes the next run retry those rewrites.
pub fn settle(prior: &SyncState, plan: &Plan, settlements: &[Settlement], now: DateTime<Utc>) -> SyncState {
    let mut state = prior.clone();

    for settlement in settlements {
        match settlement {
            Settlement::Created {
                key,
                remote_id,
                fingerprint,
                end,
                ..
            }
            | Settlement::Updated {
                key,
                remote_id,
                fingerprint,
                end,
            } => state.insert(SyncedRecord {
                key: key.clone(),
                remote_id: remote_id.clone(),
                fingerprint: fingerprint.clone(),
                last_synced_at: now,
                occurrence_end: Some(*end),
            }),
            Settlement::Deleted { key, .. } => {
                state.remove(key);
            }
            Settlement::Failed { .. } => {}
        }
    }

    for key in &plan.forget {
        state.remove(key);
    }

    let rewrite_failed = plan.profile_changed
        && settlements.iter().any(|s| {
            matches!(
                s,
                Settlement::Failed {
                    action: ActionKind::Update,
                    ..
                }
            )
        });
    if !rewrite_failed {
        state.render_profile = Some(plan.profile.clone());
    }
    state.last_run = Some(now);
    state
}

/// Adds the plan and settlement counts to `summary`.
pub fn summarize(plan: &Plan, settlements: &[Settlement], summary: &mut RunSummary) {
    summary.in_window = plan.in_window;
    summary.unchanged = plan.unchanged;
    summary.forgotten = plan.forget.len();

    for settlement in settlements {
        match settlement {
            Settlement::Created { .. } => summary.created += 1,
            Settlement::Updated { .. } => summary.updated += 1,
            Settlement::Deleted { .. } => summary.removed += 1,
            Settlement::Failed { key, action, error } => {
                summary.record_error(key.clone(), *action, error.to_string())
            }
        }
    }
}

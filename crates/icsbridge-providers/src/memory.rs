//! In-memory target calendar.
//!
//! Behaves like a remote calendar (ids, not-found, managed stamp) and can be
//! disturbed from the outside: events edited or deleted behind the engine's
//! back, injected failures, artificial latency. Used by the engine's tests and
//! by `plan`-style dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use icsbridge_core::{StableKey, SyncWindow};
use tokio::sync::Mutex;

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::mirror::MirrorEvent;
use crate::target::{BoxFuture, ManagedEvent, RemoteOutcome, TargetCalendar};

/// The calendar operations faults can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
    Delete,
    List,
}

/// An injected failure.
#[derive(Debug, Clone)]
struct Fault {
    operation: Operation,
    key: Option<StableKey>,
    code: ProviderErrorCode,
    retry_after: Option<Duration>,
    /// `None` fails forever.
    remaining: Option<usize>,
    /// Apply the write before failing, like a reply lost in transit.
    commit: bool,
}

impl Fault {
    fn matches(&self, operation: Operation, key: Option<&StableKey>) -> bool {
        self.operation == operation
            && self.remaining != Some(0)
            && match (&self.key, key) {
                (Some(wanted), Some(actual)) => wanted == actual,
                (Some(_), None) => false,
                (None, _) => true,
            }
    }

    fn error(&self) -> ProviderError {
        let mut err = ProviderError::new(self.code, "injected failure").with_provider("memory");
        if let Some(delay) = self.retry_after {
            err = err.with_retry_after(delay);
        }
        err
    }
}

#[derive(Debug, Clone)]
struct StoredEvent {
    event: MirrorEvent,
    managed: bool,
}

#[derive(Debug, Default)]
struct Inner {
    events: BTreeMap<String, StoredEvent>,
    faults: Vec<Fault>,
    calls: HashMap<Operation, usize>,
    next_id: u64,
}

impl Inner {
    fn take_fault(&mut self, operation: Operation, key: Option<&StableKey>) -> Option<ProviderError> {
        match self.next_fault(operation, key)? {
            (err, false) => Some(err),
            (_, true) => None,
        }
    }

    /// Consumes the next matching fault, returning its error and whether the
    /// write should still be applied.
    fn next_fault(&mut self, operation: Operation, key: Option<&StableKey>) -> Option<(ProviderError, bool)> {
        let fault = self.faults.iter_mut().find(|f| f.matches(operation, key))?;
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
        }
        Some((fault.error(), fault.commit))
    }

    /// Id of the live managed event stored for `key`, if any.
    fn managed_id(&self, key: &StableKey) -> Option<String> {
        self.events
            .iter()
            .find(|(_, s)| s.managed && &s.event.key == key)
            .map(|(id, _)| id.clone())
    }

    fn key_of(&self, remote_id: &str) -> Option<StableKey> {
        self.events.get(remote_id).map(|s| s.event.key.clone())
    }
}

/// A calendar held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryCalendar {
    inner: Mutex<Inner>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryCalendar {
    /// Creates an empty calendar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fails the next `times` calls of `operation`.
    pub async fn fail_next(&self, operation: Operation, code: ProviderErrorCode, times: usize) {
        self.push_fault(Fault {
            operation,
            key: None,
            code,
            retry_after: None,
            remaining: Some(times),
            commit: false,
        })
        .await;
    }

    /// Fails the next `times` calls of `operation` with a rate-limit error
    /// carrying `Retry-After`.
    pub async fn rate_limit_next(&self, operation: Operation, times: usize, retry_after: Duration) {
        self.push_fault(Fault {
            operation,
            key: None,
            code: ProviderErrorCode::RateLimited,
            retry_after: Some(retry_after),
            remaining: Some(times),
            commit: false,
        })
        .await;
    }

    /// Applies the next `times` creates, then reports a transient failure
    /// for each as if the reply had been lost.
    pub async fn lose_create_reply_next(&self, times: usize) {
        self.push_fault(Fault {
            operation: Operation::Create,
            key: None,
            code: ProviderErrorCode::ServerError,
            retry_after: None,
            remaining: Some(times),
            commit: true,
        })
        .await;
    }

    /// Fails every call of `operation` that touches `key`.
    pub async fn fail_key(&self, operation: Operation, key: StableKey, code: ProviderErrorCode) {
        self.push_fault(Fault {
            operation,
            key: Some(key),
            code,
            retry_after: None,
            remaining: None,
            commit: false,
        })
        .await;
    }

    /// Removes every injected failure.
    pub async fn clear_faults(&self) {
        self.inner.lock().await.faults.clear();
    }

    async fn push_fault(&self, fault: Fault) {
        self.inner.lock().await.faults.push(fault);
    }

    /// Deletes an event as a user would, behind the engine's back.
    pub async fn remote_delete(&self, remote_id: &str) -> bool {
        self.inner.lock().await.events.remove(remote_id).is_some()
    }

    /// Retitles an event as a user would.
    pub async fn remote_retitle(&self, remote_id: &str, summary: &str) -> bool {
        self.remote_edit(remote_id, |event| event.summary = summary.to_string())
            .await
    }

    /// Edits an event as a user would, bypassing `update`.
    pub async fn remote_edit(&self, remote_id: &str, edit: impl FnOnce(&mut MirrorEvent)) -> bool {
        match self.inner.lock().await.events.get_mut(remote_id) {
            Some(stored) => {
                edit(&mut stored.event);
                true
            }
            None => false,
        }
    }

    /// Inserts an event that carries the managed stamp without having been
    /// created through this calendar's `create` (e.g. left over from a lost
    /// state file).
    pub async fn insert_orphan(&self, event: MirrorEvent) -> String {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = format!("orphan-{}", inner.next_id);
        inner.events.insert(id.clone(), StoredEvent { event, managed: true });
        id
    }

    /// Inserts an event that is not managed by this tool.
    pub async fn insert_foreign(&self, event: MirrorEvent) -> String {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = format!("foreign-{}", inner.next_id);
        inner.events.insert(id.clone(), StoredEvent { event, managed: false });
        id
    }

    /// Returns a stored event.
    pub async fn get(&self, remote_id: &str) -> Option<MirrorEvent> {
        self.inner
            .lock()
            .await
            .events
            .get(remote_id)
            .map(|s| s.event.clone())
    }

    /// Returns all events, keyed by remote id.
    pub async fn events(&self) -> BTreeMap<String, MirrorEvent> {
        self.inner
            .lock()
            .await
            .events
            .iter()
            .map(|(id, s)| (id.clone(), s.event.clone()))
            .collect()
    }

    /// Number of stored events, managed or not.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of calls made for `operation`, failed ones included.
    pub async fn calls(&self, operation: Operation) -> usize {
        self.inner
            .lock()
            .await
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of concurrent calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, operation: Operation) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        *self.inner.lock().await.calls.entry(operation).or_default() += 1;
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Creates are idempotent per key: a live managed event with the same
    /// key is overwritten and its id returned.
    async fn create_impl(&self, event: &MirrorEvent) -> ProviderResult<String> {
        let mut inner = self.inner.lock().await;
        let lost_reply = match inner.next_fault(Operation::Create, Some(&event.key)) {
            Some((err, false)) => return Err(err),
            Some((err, true)) => Some(err),
            None => None,
        };
        let id = match inner.managed_id(&event.key) {
            Some(id) => id,
            None => {
                inner.next_id += 1;
                format!("mem-{}", inner.next_id)
            }
        };
        inner.events.insert(
            id.clone(),
            StoredEvent {
                event: event.clone(),
                managed: true,
            },
        );
        match lost_reply {
            Some(err) => Err(err),
            None => Ok(id),
        }
    }

    async fn update_impl(&self, remote_id: &str, event: &MirrorEvent) -> ProviderResult<RemoteOutcome> {
        let mut inner = self.inner.lock().await;
        if let Some(err) = inner.take_fault(Operation::Update, Some(&event.key)) {
            return Err(err);
        }
        match inner.events.get_mut(remote_id) {
            Some(stored) => {
                stored.event = event.clone();
                Ok(RemoteOutcome::Applied)
            }
            None => Ok(RemoteOutcome::NotFound),
        }
    }

    async fn delete_impl(&self, remote_id: &str) -> ProviderResult<RemoteOutcome> {
        let mut inner = self.inner.lock().await;
        let key = inner.key_of(remote_id);
        if let Some(err) = inner.take_fault(Operation::Delete, key.as_ref()) {
            return Err(err);
        }
        Ok(match inner.events.remove(remote_id) {
            Some(_) => RemoteOutcome::Applied,
            None => RemoteOutcome::NotFound,
        })
    }

    async fn list_impl(&self, window: SyncWindow) -> ProviderResult<Vec<ManagedEvent>> {
        let mut inner = self.inner.lock().await;
        if let Some(err) = inner.take_fault(Operation::List, None) {
            return Err(err);
        }
        Ok(inner
            .events
            .iter()
            .filter(|(_, s)| s.managed && window.overlaps(s.event.start, s.event.end))
            .map(|(id, s)| ManagedEvent::from_mirror(id.clone(), &s.event))
            .collect())
    }
}

impl TargetCalendar for InMemoryCalendar {
    fn name(&self) -> &str {
        "memory"
    }

    fn create<'a>(&'a self, event: &'a MirrorEvent) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            self.enter(Operation::Create).await;
            let result = self.create_impl(event).await;
            self.leave();
            result
        })
    }

    fn update<'a>(
        &'a self,
        remote_id: &'a str,
        event: &'a MirrorEvent,
    ) -> BoxFuture<'a, ProviderResult<RemoteOutcome>> {
        Box::pin(async move {
            self.enter(Operation::Update).await;
            let result = self.update_impl(remote_id, event).await;
            self.leave();
            result
        })
    }

    fn delete<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, ProviderResult<RemoteOutcome>> {
        Box::pin(async move {
            self.enter(Operation::Delete).await;
            let result = self.delete_impl(remote_id).await;
            self.leave();
            result
        })
    }

    fn list_managed(&self, window: SyncWindow) -> BoxFuture<'_, ProviderResult<Vec<ManagedEvent>>> {
        Box::pin(async move {
            self.enter(Operation::List).await;
            let result = self.list_impl(window).await;
            self.leave();
            result
        })
    }
}

/// Helper for tests elsewhere in the workspace: a mirror event for `key`.
pub fn sample_event(uid: &str, start: DateTime<Utc>, summary: &str) -> MirrorEvent {
    MirrorEvent {
        key: icsbridge_core::stable_key(uid, start, false),
        uid: uid.to_string(),
        summary: summary.to_string(),
        start,
        end: start + chrono::Duration::hours(1),
        all_day: false,
        location: None,
        description: None,
        transparency: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn create_update_delete() {
        let calendar = InMemoryCalendar::new();
        let event = sample_event("a", start(), "Maths");

        let id = calendar.create(&event).await.unwrap();
        assert_eq!(calendar.len().await, 1);

        let mut changed = event.clone();
        changed.summary = "Physics".to_string();
        assert_eq!(calendar.update(&id, &changed).await.unwrap(), RemoteOutcome::Applied);
        assert_eq!(calendar.get(&id).await.unwrap().summary, "Physics");

        assert_eq!(calendar.delete(&id).await.unwrap(), RemoteOutcome::Applied);
        assert_eq!(calendar.delete(&id).await.unwrap(), RemoteOutcome::NotFound);
        assert_eq!(calendar.update(&id, &event).await.unwrap(), RemoteOutcome::NotFound);
        assert!(calendar.is_empty().await);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let calendar = InMemoryCalendar::new();
        calendar.fail_next(Operation::Create, ProviderErrorCode::ServerError, 2).await;
        let event = sample_event("a", start(), "Maths");

        assert_eq!(calendar.create(&event).await.unwrap_err().kind(), FailureKind::Transient);
        assert!(calendar.create(&event).await.is_err());
        assert!(calendar.create(&event).await.is_ok());
        assert_eq!(calendar.calls(Operation::Create).await, 3);
    }

    #[tokio::test]
    async fn create_is_idempotent_per_key() {
        let calendar = InMemoryCalendar::new();
        let event = sample_event("a", start(), "Maths");
        calendar.lose_create_reply_next(1).await;

        let err = calendar.create(&event).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calendar.len().await, 1);

        let mut retitled = event.clone();
        retitled.summary = "Physics".to_string();
        let id = calendar.create(&retitled).await.unwrap();
        assert_eq!(calendar.len().await, 1);
        assert_eq!(calendar.get(&id).await.unwrap().summary, "Physics");

        calendar.insert_foreign(sample_event("a", start(), "Mine")).await;
        assert_eq!(calendar.create(&event).await.unwrap(), id);
        assert_eq!(calendar.len().await, 2);
    }

    #[tokio::test]
    async fn key_faults_are_permanent_and_scoped() {
        let calendar = InMemoryCalendar::new();
        let bad = sample_event("bad", start(), "Bad");
        let good = sample_event("good", start(), "Good");
        calendar
            .fail_key(Operation::Create, bad.key.clone(), ProviderErrorCode::BadRequest)
            .await;

        assert!(calendar.create(&bad).await.is_err());
        assert!(calendar.create(&bad).await.is_err());
        assert!(calendar.create(&good).await.is_ok());
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let calendar = InMemoryCalendar::new();
        calendar
            .rate_limit_next(Operation::Delete, 1, Duration::from_millis(5))
            .await;
        let err = calendar.delete("missing").await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_millis(5)));
    }

    #[tokio::test]
    async fn list_managed_skips_foreign_events() {
        let calendar = InMemoryCalendar::new();
        calendar.create(&sample_event("a", start(), "Maths")).await.unwrap();
        calendar.insert_foreign(sample_event("dentist", start(), "Dentist")).await;

        let window = SyncWindow::around(start(), 1, 30);
        let managed = calendar.list_managed(window).await.unwrap();
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].summary, "Maths");
        assert!(managed[0].matches(&sample_event("a", start(), "Maths")));
        assert!(!managed[0].matches(&sample_event("a", start(), "Physics")));
    }
}

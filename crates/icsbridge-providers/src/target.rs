//! The target calendar abstraction.
//!
//! [`TargetCalendar`] is the seam between the reconciler and a writable
//! calendar service. Implementations report failures as [`ProviderError`]s
//! and a missing remote event as [`RemoteOutcome::NotFound`], never by
//! panicking, so the reconciler can retry or self-heal.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use icsbridge_core::{StableKey, SyncWindow, Transparency};
use serde::{Deserialize, Serialize};

use crate::error::ProviderResult;
use crate::mirror::MirrorEvent;

/// A boxed future for async trait methods.
///
/// Keeps [`TargetCalendar`] object-safe so the service can hold an
/// `Arc<dyn TargetCalendar>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a write against an existing remote event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// The change was applied.
    Applied,
    /// The referenced remote event does not exist (any more).
    NotFound,
}

/// A remote event carrying the managed stamp, projected onto the fields
/// the adapter writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedEvent {
    /// Remote event id.
    pub remote_id: String,
    /// Stable key from the stamp, if present.
    pub key: Option<StableKey>,
    /// Remote title.
    pub summary: String,
    /// Remote start, if it could be read.
    pub start: Option<DateTime<Utc>>,
    /// Remote end, if it could be read.
    pub end: Option<DateTime<Utc>>,
    /// Stored as a date-only event.
    pub all_day: bool,
    /// Empty when unset.
    pub location: String,
    /// Empty when unset.
    pub description: String,
    pub transparency: Transparency,
    /// Visibility is private.
    pub private: bool,
}

impl ManagedEvent {
    /// Projection of `event` as stored under `remote_id`.
    pub fn from_mirror(remote_id: impl Into<String>, event: &MirrorEvent) -> Self {
        let (start, end) = event.written_span();
        Self {
            remote_id: remote_id.into(),
            key: Some(event.key.clone()),
            summary: event.summary.clone(),
            start: Some(start),
            end: Some(end),
            all_day: event.all_day,
            location: event.location.clone().unwrap_or_default(),
            description: event.description.clone().unwrap_or_default(),
            transparency: event.transparency,
            private: true,
        }
    }

    /// Returns true if the remote copy still shows what `event` would write.
    ///
    /// Unset and empty text compare equal, as the API drops empty strings.
    pub fn matches(&self, event: &MirrorEvent) -> bool {
        let (start, end) = event.written_span();
        self.key.as_ref() == Some(&event.key)
            && self.summary == event.summary
            && self.location == event.location.as_deref().unwrap_or_default()
            && self.description == event.description.as_deref().unwrap_or_default()
            && self.transparency == event.transparency
            && self.private
            && self.all_day == event.all_day
            && self.start == Some(start)
            && self.end == Some(end)
    }
}

/// A writable calendar that mirrored events are applied to.
///
/// # Example Implementation
///
/// ```ignore
/// impl TargetCalendar for MyCalendar {
///     fn name(&self) -> &str { "mine" }
///
///     fn create<'a>(&'a self, event: &'a MirrorEvent) -> BoxFuture<'a, ProviderResult<String>> {
///         Box::pin(async move { self.api.insert(event).await })
///     }
///     // ... other methods
/// }
/// ```
pub trait TargetCalendar: Send + Sync {
    /// Short name used in logs and errors (e.g. "google").
    fn name(&self) -> &str;

    /// Creates a remote event and returns its id.
    ///
    /// Must be idempotent per key: when an event stored by an earlier
    /// `create` of the same key still exists (for instance because the reply
    /// to that call was lost), it is overwritten and its id returned instead
    /// of inserting a second copy.
    fn create<'a>(&'a self, event: &'a MirrorEvent) -> BoxFuture<'a, ProviderResult<String>>;

    /// Overwrites an existing remote event.
    fn update<'a>(
        &'a self,
        remote_id: &'a str,
        event: &'a MirrorEvent,
    ) -> BoxFuture<'a, ProviderResult<RemoteOutcome>>;

    /// Deletes a remote event.
    fn delete<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, ProviderResult<RemoteOutcome>>;

    /// Lists remote events carrying the managed stamp that overlap `window`.
    ///
    /// Read-only. The reconciler compares tracked records against this
    /// listing to find remote edits and deletions; `audit` reports from it.
    fn list_managed(&self, window: SyncWindow) -> BoxFuture<'_, ProviderResult<Vec<ManagedEvent>>>;
}

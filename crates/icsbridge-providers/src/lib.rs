//! Sources and targets for calendar mirroring.
//!
//! This crate provides both ends of the mirror:
//!
//! - [`FeedFetcher`] - Downloads an ICS feed
//! - [`expand`] - Turns a feed document into concrete [`SourceOccurrence`]s
//!   inside a sync window, expanding recurrence rules
//! - [`EventTemplate`] - Renders occurrences into [`MirrorEvent`]s
//! - [`TargetCalendar`] - The trait writable calendars implement
//! - [`ProviderError`] - Error types shared by all of the above
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    ICS feed     │
//! └────────┬────────┘
//!          │ FeedFetcher::fetch()
//!          ▼
//! ┌─────────────────┐
//! │  ics::expand()  │
//! └────────┬────────┘
//!          │ SourceOccurrence
//!          ▼
//! ┌─────────────────┐
//! │  EventTemplate  │
//! └────────┬────────┘
//!          │ MirrorEvent
//!          ▼
//! ┌─────────────────┐    ┌─────────────────┐
//! │ GoogleCalendar  │    │ InMemoryCalendar│
//! └─────────────────┘    └─────────────────┘
//!       TargetCalendar implementations
//! ```
//!
//! [`SourceOccurrence`]: icsbridge_core::SourceOccurrence

pub mod error;
pub mod feed;
#[cfg(feature = "google")]
pub mod google;
pub mod ics;
pub mod memory;
pub mod mirror;
pub mod target;

// Re-export main types at crate root
pub use error::{FailureKind, ProviderError, ProviderErrorCode, ProviderResult};
pub use feed::{
    DEFAULT_FEED_TIMEOUT, FeedFetcher, FeedSource, StaticFeed, decode_document, normalize_feed_url,
};
pub use ics::{Expansion, expand};
pub use memory::{InMemoryCalendar, Operation};
pub use mirror::{EventTemplate, MirrorEvent};
pub use target::{BoxFuture, ManagedEvent, RemoteOutcome, TargetCalendar};

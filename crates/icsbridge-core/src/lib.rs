//! Core types: occurrences, stable keys, sync state, run summaries

pub mod key;
pub mod occurrence;
pub mod state;
pub mod summary;
pub mod time;
pub mod tracing;

pub use key::{Fingerprint, StableKey, fingerprint, key_of, stable_key};
pub use occurrence::{SourceOccurrence, Transparency};
pub use state::{STATE_VERSION, SyncState, SyncedRecord};
pub use summary::{ActionKind, OccurrenceError, RunOutcome, RunSummary, RunTrigger};
pub use time::{SyncWindow, date_to_utc};
pub use tracing::{LogFormat, TracingConfig, TracingError, init_tracing};

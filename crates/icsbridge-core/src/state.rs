//! Persisted sync bookkeeping.
//!
//! [`SyncState`] is the only durable artifact owned by the sync engine: the
//! mapping from [`StableKey`] to the remote event created for it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::{Fingerprint, StableKey};

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

/// What the engine knows about one mirrored occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedRecord {
    /// Identity of the occurrence.
    pub key: StableKey,
    /// Remote event id returned by the create call.
    pub remote_id: String,
    /// Fingerprint of the occurrence as last written.
    pub fingerprint: Fingerprint,
    /// When the remote event was last written.
    pub last_synced_at: DateTime<Utc>,
    /// End of the occurrence as last written. Lets a window-exit policy tell
    /// expired occurrences from removed ones.
    #[serde(default)]
    pub occurrence_end: Option<DateTime<Utc>>,
}

/// The full set of mirrored occurrences plus run metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Format version.
    #[serde(default = "default_version")]
    pub version: u32,
    /// When the last completed run finished.
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    /// Hash of the rendering options the records were written with.
    #[serde(default)]
    pub render_profile: Option<String>,
    /// Records keyed by stable key.
    #[serde(default)]
    pub records: BTreeMap<StableKey, SyncedRecord>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl Default for SyncState {
    fn default() -> Self {
        Self::empty()
    }
}

impl SyncState {
    /// A state with no prior knowledge (forces a full resync).
    pub fn empty() -> Self {
        Self {
            version: STATE_VERSION,
            last_run: None,
            render_profile: None,
            records: BTreeMap::new(),
        }
    }

    /// Number of mirrored occurrences.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing is mirrored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks up a record.
    pub fn get(&self, key: &StableKey) -> Option<&SyncedRecord> {
        self.records.get(key)
    }

    /// Returns true if the key is tracked.
    pub fn contains(&self, key: &StableKey) -> bool {
        self.records.contains_key(key)
    }

    /// Inserts or replaces a record.
    pub fn insert(&mut self, record: SyncedRecord) {
        self.records.insert(record.key.clone(), record);
    }

    /// Removes a record.
    pub fn remove(&mut self, key: &StableKey) -> Option<SyncedRecord> {
        self.records.remove(key)
    }

    /// Iterates over records in key order.
    pub fn iter(&self) -> impl Iterator<Item = &SyncedRecord> {
        self.records.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(key: &str) -> SyncedRecord {
        SyncedRecord {
            key: StableKey::from_raw(key),
            remote_id: format!("remote-{}", key),
            fingerprint: Fingerprint::from_raw("abc"),
            last_synced_at: Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
            occurrence_end: None,
        }
    }

    #[test]
    fn insert_and_remove() {
        let mut state = SyncState::empty();
        assert!(state.is_empty());

        state.insert(record("a|2025-03-01"));
        state.insert(record("b|2025-03-02"));
        assert_eq!(state.len(), 2);
        assert!(state.contains(&StableKey::from_raw("a|2025-03-01")));

        let removed = state.remove(&StableKey::from_raw("a|2025-03-01")).unwrap();
        assert_eq!(removed.remote_id, "remote-a|2025-03-01");
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn serde_roundtrip() {
        let mut state = SyncState::empty();
        state.insert(record("a|2025-03-01"));
        state.last_run = Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap());

        let json = serde_json::to_string_pretty(&state).unwrap();
        let parsed: SyncState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn missing_fields_default() {
        let parsed: SyncState = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed, SyncState::empty());
    }
}

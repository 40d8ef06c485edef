//! Occurrence identity and change detection.
//!
//! - [`StableKey`] identifies one logical occurrence across runs.
//! - [`Fingerprint`] detects whether a mirrored occurrence needs an update.
//!
//! Both are pure functions of their inputs: no clock, no process state, no
//! dependence on the order of the source document.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::occurrence::SourceOccurrence;

/// Deterministic identity of one occurrence: `"{uid}|{fragment}"`.
///
/// The fragment is the occurrence date (`2025-03-10`) for all-day entries and
/// the UTC start instant (`2025-03-10T09:00:00Z`) otherwise. The fragment never
/// contains `|`, so the key splits back into its parts at the last separator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableKey(String);

impl StableKey {
    /// Wraps an already-derived key (e.g. one read back from the remote calendar).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the source UID part of the key.
    pub fn uid(&self) -> &str {
        self.0.rsplit_once('|').map_or(self.0.as_str(), |(uid, _)| uid)
    }
}

impl fmt::Display for StableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Change-detection hash over the mutable fields of an occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wraps a previously computed fingerprint.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives the stable key for `(uid, occurrence_start)`.
pub fn stable_key(uid: &str, start: DateTime<Utc>, all_day: bool) -> StableKey {
    let fragment = if all_day {
        start.date_naive().format("%Y-%m-%d").to_string()
    } else {
        start.to_rfc3339_opts(SecondsFormat::Secs, true)
    };
    StableKey(format!("{}|{}", uid, fragment))
}

/// Derives the stable key of an occurrence.
pub fn key_of(occurrence: &SourceOccurrence) -> StableKey {
    stable_key(
        &occurrence.uid,
        occurrence.identity_start(),
        occurrence.all_day,
    )
}

/// Computes the fingerprint of an occurrence.
///
/// Covers title, start, end, the all-day flag, location, description and
/// transparency: exactly the fields written to the target calendar.
pub fn fingerprint(occurrence: &SourceOccurrence) -> Fingerprint {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, occurrence.title.as_bytes());
    hasher.update(occurrence.start.timestamp().to_le_bytes());
    hasher.update(occurrence.end.timestamp().to_le_bytes());
    hasher.update([u8::from(occurrence.all_day)]);
    hash_optional(&mut hasher, occurrence.location.as_deref());
    hash_optional(&mut hasher, occurrence.description.as_deref());
    hash_field(&mut hasher, occurrence.transparency.as_str().as_bytes());
    Fingerprint(format!("{:x}", hasher.finalize()))
}

// Length-prefixed so adjacent fields cannot run into each other.
fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn hash_optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1]);
            hash_field(hasher, v.as_bytes());
        }
        None => hasher.update([0]),
    }
}

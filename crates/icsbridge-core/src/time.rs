//! Time handling for the sync window.
//!
//! Every run mirrors the occurrences that overlap a rolling
//! [`SyncWindow`] of `[now - lookback, now + lookahead)`.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The rolling time window a run mirrors.
///
/// Represents a half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWindow {
    /// Start of the window (inclusive).
    pub start: DateTime<Utc>,
    /// End of the window (exclusive).
    pub end: DateTime<Utc>,
}

impl SyncWindow {
    /// Creates a new window.
    ///
    /// # Panics
    ///
    /// Panics if `start` is after `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start <= end, "SyncWindow start must be <= end");
        Self { start, end }
    }

    /// Creates the window `[now - lookback_days, now + lookahead_days)`.
    ///
    /// Bounds that fall outside the representable range saturate at
    /// [`DateTime::<Utc>::MIN_UTC`] and [`DateTime::<Utc>::MAX_UTC`].
    pub fn around(now: DateTime<Utc>, lookback_days: u32, lookahead_days: u32) -> Self {
        let start = Duration::try_days(i64::from(lookback_days))
            .and_then(|back| now.checked_sub_signed(back))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = Duration::try_days(i64::from(lookahead_days))
            .and_then(|ahead| now.checked_add_signed(ahead))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { start, end }
    }

    /// Returns the duration of this window.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Checks if a datetime falls within this window (`[start, end)`).
    pub fn contains(&self, dt: DateTime<Utc>) -> bool {
        self.start <= dt && dt < self.end
    }

    /// Checks whether an occurrence spanning `[start, end)` overlaps this window.
    ///
    /// Zero-length occurrences overlap when their instant lies inside the window.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        if start >= end {
            return self.contains(start);
        }
        start < self.end && end > self.start
    }
}

/// Midnight UTC of the given date.
///
/// All-day entries use this convention so keys and fingerprints do not depend
/// on the host timezone.
pub fn date_to_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn around_now() {
        let now = utc(2025, 3, 1, 12, 0);
        let window = SyncWindow::around(now, 1, 30);
        assert_eq!(window.start, utc(2025, 2, 28, 12, 0));
        assert_eq!(window.end, utc(2025, 3, 31, 12, 0));
        assert_eq!(window.duration(), Duration::days(31));
    }

    #[test]
    fn oversized_bounds_saturate() {
        let now = utc(2025, 3, 1, 12, 0);
        let window = SyncWindow::around(now, u32::MAX, u32::MAX);
        assert_eq!(window.start, DateTime::<Utc>::MIN_UTC);
        assert_eq!(window.end, DateTime::<Utc>::MAX_UTC);
        assert!(window.contains(now));
    }

    #[test]
    #[should_panic(expected = "SyncWindow start must be <= end")]
    fn invalid_window() {
        SyncWindow::new(utc(2025, 3, 2, 0, 0), utc(2025, 3, 1, 0, 0));
    }

    #[test]
    fn contains_is_half_open() {
        let window = SyncWindow::new(utc(2025, 3, 1, 0, 0), utc(2025, 3, 2, 0, 0));
        assert!(window.contains(utc(2025, 3, 1, 0, 0)));
        assert!(window.contains(utc(2025, 3, 1, 23, 59)));
        assert!(!window.contains(utc(2025, 3, 2, 0, 0)));
    }

    #[test]
    fn overlaps_partial_and_disjoint() {
        let window = SyncWindow::new(utc(2025, 3, 1, 0, 0), utc(2025, 3, 2, 0, 0));

        // Straddles the start
        assert!(window.overlaps(utc(2025, 2, 28, 23, 0), utc(2025, 3, 1, 1, 0)));
        // Ends exactly at the start
        assert!(!window.overlaps(utc(2025, 2, 28, 23, 0), utc(2025, 3, 1, 0, 0)));
        // Starts exactly at the end
        assert!(!window.overlaps(utc(2025, 3, 2, 0, 0), utc(2025, 3, 2, 1, 0)));
        // Zero-length inside
        assert!(window.overlaps(utc(2025, 3, 1, 9, 0), utc(2025, 3, 1, 9, 0)));
    }

    #[test]
    fn all_day_convention_is_midnight_utc() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert_eq!(date_to_utc(date), utc(2025, 3, 10, 0, 0));
    }

    #[test]
    fn serde_roundtrip() {
        let window = SyncWindow::new(utc(2025, 3, 1, 0, 0), utc(2025, 3, 2, 0, 0));
        let json = serde_json::to_string(&window).unwrap();
        let parsed: SyncWindow = serde_json::from_str(&json).unwrap();
        assert_eq!(window, parsed);
    }
}

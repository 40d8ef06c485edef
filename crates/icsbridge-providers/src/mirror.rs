//! Rendering source occurrences into mirrored busy blocks.
//!
//! A [`MirrorEvent`] is the target-side shape of one occurrence: what the
//! adapter writes, independent of any particular calendar API.

use chrono::{DateTime, Duration, Utc};
use icsbridge_core::{SourceOccurrence, StableKey, Transparency, date_to_utc, key_of};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Extended property marking an event as created by this tool.
pub const MANAGED_PROPERTY: &str = "managed";
/// Extended property holding the stable key.
pub const KEY_PROPERTY: &str = "key";
/// Extended property holding the source UID (informational).
pub const UID_PROPERTY: &str = "uid";

/// An event as it should exist on the target calendar.
///
/// Always written with private visibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorEvent {
    /// Identity stamp.
    pub key: StableKey,
    /// Source UID.
    pub uid: String,
    /// Title shown on the target (may be empty).
    pub summary: String,
    /// Start instant.
    pub start: DateTime<Utc>,
    /// End instant (exclusive).
    pub end: DateTime<Utc>,
    /// Written as a date-only event.
    pub all_day: bool,
    pub location: Option<String>,
    pub description: Option<String>,
    /// Busy or free.
    pub transparency: Transparency,
}

impl MirrorEvent {
    /// Start and end as the target stores them.
    ///
    /// All-day events are whole dates spanning at least one day.
    pub fn written_span(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        if !self.all_day {
            return (self.start, self.end);
        }
        let start = date_to_utc(self.start.date_naive());
        let end = date_to_utc(self.end.date_naive());
        let one_day = start.checked_add_signed(Duration::days(1)).unwrap_or(end);
        (start, end.max(one_day))
    }
}

/// How occurrences are rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventTemplate {
    /// Prepended to every title, separated by a space.
    pub summary_prefix: String,
    /// Write empty titles (busy blocks only).
    pub blank_titles: bool,
    /// Title used when the source entry has none.
    pub default_title: String,
    /// Copy location and description to the target.
    pub include_details: bool,
}

impl Default for EventTemplate {
    fn default() -> Self {
        Self {
            summary_prefix: String::new(),
            blank_titles: false,
            default_title: "Busy".to_string(),
            include_details: true,
        }
    }
}

impl EventTemplate {
    /// Builder: set the title prefix.
    pub fn with_summary_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.summary_prefix = prefix.into();
        self
    }

    /// Builder: blank all titles.
    pub fn with_blank_titles(mut self, blank: bool) -> Self {
        self.blank_titles = blank;
        self
    }

    /// Builder: copy location/description or not.
    pub fn with_details(mut self, include: bool) -> Self {
        self.include_details = include;
        self
    }

    /// Renders an occurrence.
    pub fn render(&self, occurrence: &SourceOccurrence) -> MirrorEvent {
        let details = self.include_details && !self.blank_titles;
        MirrorEvent {
            key: key_of(occurrence),
            uid: occurrence.uid.clone(),
            summary: self.summary(&occurrence.title),
            start: occurrence.start,
            end: occurrence.end,
            all_day: occurrence.all_day,
            location: occurrence.location.clone().filter(|_| details),
            description: occurrence.description.clone().filter(|_| details),
            transparency: occurrence.transparency,
        }
    }

    fn summary(&self, title: &str) -> String {
        if self.blank_titles {
            return String::new();
        }
        let title = match title.trim() {
            "" => self.default_title.as_str(),
            t => t,
        };
        if self.summary_prefix.is_empty() {
            title.to_string()
        } else {
            format!("{} {}", self.summary_prefix, title).trim().to_string()
        }
    }

    /// Short hash of the rendering options.
    ///
    /// Stored with the sync state; a different value on the next run means
    /// every mirrored event must be rewritten.
    pub fn profile(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.summary_prefix.as_bytes());
        hasher.update([0, u8::from(self.blank_titles), u8::from(self.include_details), 0]);
        hasher.update(self.default_title.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn occurrence(title: &str) -> SourceOccurrence {
        SourceOccurrence::new(
            "lesson@school",
            Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap(),
            title,
        )
        .with_location("Room 4")
        .with_description("Bring a calculator")
    }

    #[test]
    fn renders_title_and_details() {
        let event = EventTemplate::default().render(&occurrence("Maths"));
        assert_eq!(event.summary, "Maths");
        assert_eq!(event.key.as_str(), "lesson@school|2025-03-03T09:00:00Z");
        assert_eq!(event.location.as_deref(), Some("Room 4"));
        assert_eq!(event.transparency, Transparency::Opaque);
    }

    #[test]
    fn prefix_and_default_title() {
        let template = EventTemplate::default().with_summary_prefix("[School]");
        assert_eq!(template.render(&occurrence("Maths")).summary, "[School] Maths");
        assert_eq!(template.render(&occurrence("  ")).summary, "[School] Busy");
    }

    #[test]
    fn blank_titles_hide_everything() {
        let template = EventTemplate::default().with_blank_titles(true);
        let event = template.render(&occurrence("Parent meeting"));
        assert_eq!(event.summary, "");
        assert!(event.location.is_none());
        assert!(event.description.is_none());
    }

    #[test]
    fn details_can_be_dropped() {
        let event = EventTemplate::default()
            .with_details(false)
            .render(&occurrence("Maths"));
        assert_eq!(event.summary, "Maths");
        assert!(event.location.is_none());
    }

    #[test]
    fn written_span_widens_all_day_events() {
        let timed = EventTemplate::default().render(&occurrence("Maths"));
        assert_eq!(timed.written_span(), (timed.start, timed.end));

        let day = Utc.with_ymd_and_hms(2025, 3, 7, 0, 0, 0).unwrap();
        let trip = SourceOccurrence::new("trip@school", day, day, "Trip").with_all_day(true);
        let event = EventTemplate::default().render(&trip);
        assert_eq!(
            event.written_span(),
            (day, Utc.with_ymd_and_hms(2025, 3, 8, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn profile_tracks_options() {
        let base = EventTemplate::default();
        assert_eq!(base.profile(), EventTemplate::default().profile());
        assert_eq!(base.profile().len(), 16);
        assert_ne!(base.profile(), base.clone().with_blank_titles(true).profile());
        assert_ne!(base.profile(), base.clone().with_summary_prefix("x").profile());
    }
}

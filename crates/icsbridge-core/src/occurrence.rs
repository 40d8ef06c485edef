//! Source occurrences.
//!
//! A [`SourceOccurrence`] is one concrete, time-bounded instance of a source
//! event inside the sync window. Occurrences are regenerated from the feed on
//! every run and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether an occurrence blocks time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transparency {
    /// Busy time (RFC 5545 `OPAQUE`, the default).
    #[default]
    Opaque,
    /// Free time (RFC 5545 `TRANSPARENT`).
    Transparent,
}

impl Transparency {
    /// Returns the RFC 5545 / Google Calendar spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Opaque => "opaque",
            Self::Transparent => "transparent",
        }
    }
}

/// One concrete instance of a (possibly recurring) source event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOccurrence {
    /// UID of the source VEVENT.
    pub uid: String,
    /// Start instant, normalized to UTC. All-day entries start at midnight UTC.
    pub start: DateTime<Utc>,
    /// End instant (exclusive), normalized to UTC.
    pub end: DateTime<Utc>,
    /// Source title (`SUMMARY`), empty if the source has none.
    pub title: String,
    /// Whether the source entry is date-only.
    pub all_day: bool,
    /// Source location, if any.
    pub location: Option<String>,
    /// Source description, if any.
    pub description: Option<String>,
    /// Free/busy marking from `TRANSP`.
    pub transparency: Transparency,
    /// Original start of the instance this occurrence overrides
    /// (`RECURRENCE-ID`), if it is a modified instance of a series.
    pub recurrence_id: Option<DateTime<Utc>>,
}

impl SourceOccurrence {
    /// Creates an occurrence with the required fields.
    pub fn new(
        uid: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            start,
            end,
            title: title.into(),
            all_day: false,
            location: None,
            description: None,
            transparency: Transparency::Opaque,
            recurrence_id: None,
        }
    }

    /// Builder: mark as all-day.
    pub fn with_all_day(mut self, all_day: bool) -> Self {
        self.all_day = all_day;
        self
    }

    /// Builder: set location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Builder: set description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder: set transparency.
    pub fn with_transparency(mut self, transparency: Transparency) -> Self {
        self.transparency = transparency;
        self
    }

    /// Builder: set the overridden instance start.
    pub fn with_recurrence_id(mut self, recurrence_id: DateTime<Utc>) -> Self {
        self.recurrence_id = Some(recurrence_id);
        self
    }

    /// The start instant that identifies this occurrence.
    ///
    /// Modified instances keep the identity of the instance they replace.
    pub fn identity_start(&self) -> DateTime<Utc> {
        self.recurrence_id.unwrap_or(self.start)
    }
}

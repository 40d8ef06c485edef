//! Per-run statistics for the control surface.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::StableKey;

/// What started a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// The periodic scheduler.
    #[default]
    Scheduled,
    /// An operator request (CLI or control surface).
    Manual,
    /// SIGHUP.
    Signal,
}

/// The kind of remote mutation an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl ActionKind {
    /// Returns a lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure scoped to a single occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceError {
    /// The affected occurrence.
    pub key: StableKey,
    /// The action that failed.
    pub action: ActionKind,
    /// Error text.
    pub message: String,
}

/// How a run ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Still applying actions.
    #[default]
    Running,
    /// Finished and persisted.
    Completed,
    /// Stopped before persisting; the previous state remains authoritative.
    Aborted {
        /// Why the run stopped.
        reason: String,
    },
}

/// Counts and errors for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// What started the run.
    pub trigger: RunTrigger,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished (completed or aborted).
    pub finished_at: Option<DateTime<Utc>>,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Occurrences found inside the window.
    pub in_window: usize,
    /// Malformed source entries that were skipped.
    pub skipped: usize,
    /// Occurrences that needed no remote call.
    pub unchanged: usize,
    /// Remote events created (including self-healed updates).
    pub created: usize,
    /// Remote events updated.
    pub updated: usize,
    /// Remote events deleted (or already gone).
    pub removed: usize,
    /// Records dropped from state without touching the remote event.
    #[serde(default)]
    pub forgotten: usize,
    /// Occurrences whose action failed.
    pub errored: usize,
    /// Per-occurrence failures.
    pub errors: Vec<OccurrenceError>,
}

impl RunSummary {
    /// Starts a new summary.
    pub fn start(trigger: RunTrigger, now: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trigger,
            started_at: now,
            finished_at: None,
            outcome: RunOutcome::Running,
            in_window: 0,
            skipped: 0,
            unchanged: 0,
            created: 0,
            updated: 0,
            removed: 0,
            forgotten: 0,
            errored: 0,
            errors: Vec::new(),
        }
    }

    /// Records a per-occurrence failure.
    pub fn record_error(&mut self, key: StableKey, action: ActionKind, message: impl Into<String>) {
        self.errored += 1;
        self.errors.push(OccurrenceError {
            key,
            action,
            message: message.into(),
        });
    }

    /// Marks the run as completed.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.finished_at = Some(now);
        self.outcome = RunOutcome::Completed;
    }

    /// Marks the run as aborted.
    pub fn abort(&mut self, now: DateTime<Utc>, reason: impl Into<String>) {
        self.finished_at = Some(now);
        self.outcome = RunOutcome::Aborted {
            reason: reason.into(),
        };
    }

    /// Returns true if the run completed (per-occurrence errors allowed).
    pub fn is_completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }

    /// Number of remote mutations performed.
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.removed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            RunOutcome::Aborted { reason } => write!(f, "aborted: {}", reason),
            RunOutcome::Running => write!(f, "running"),
            RunOutcome::Completed => write!(
                f,
                "created={} updated={} removed={} errors={} in_window={}",
                self.created, self.updated, self.removed, self.errored, self.in_window
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn records_errors() {
        let mut summary = RunSummary::start(RunTrigger::Manual, now());
        summary.record_error(StableKey::from_raw("a|x"), ActionKind::Update, "boom");
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.errors[0].action, ActionKind::Update);
        assert_eq!(summary.errors[0].message, "boom");
    }

    #[test]
    fn completion_and_display() {
        let mut summary = RunSummary::start(RunTrigger::Scheduled, now());
        summary.created = 2;
        summary.in_window = 5;
        assert!(!summary.is_completed());

        summary.complete(now());
        assert!(summary.is_completed());
        assert_eq!(summary.changes(), 2);
        assert_eq!(
            summary.to_string(),
            "created=2 updated=0 removed=0 errors=0 in_window=5"
        );
    }

    #[test]
    fn aborted_outcome_serializes_with_reason() {
        let mut summary = RunSummary::start(RunTrigger::Manual, now());
        summary.abort(now(), "feed unreachable");

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["outcome"]["status"], "aborted");
        assert_eq!(json["outcome"]["reason"], "feed unreachable");
        assert_eq!(summary.to_string(), "aborted: feed unreachable");
    }
}

//! Durable sync state and run history.
//!
//! Both files live in the data directory and are replaced atomically:
//! the new content is written to a sibling temp file, fsynced, then
//! renamed over the old one. A crash at any point leaves either the old
//! or the new file, never a torn one.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use icsbridge_core::{RunSummary, STATE_VERSION, SyncState};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::SyncResult;

/// File name of the sync state.
pub const STATE_FILE: &str = "state.json";
/// File name of the run history.
pub const HISTORY_FILE: &str = "history.json";
/// Default number of runs kept in the history file.
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Reads and writes `state.json` and `history.json`.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    history_cap: usize,
}

impl StateStore {
    /// Creates a store rooted at `dir`. Nothing is touched until the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }

    /// Builder: set how many runs the history keeps.
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.history_cap = cap.max(1);
        self
    }

    /// Data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file.
    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Path of the history file.
    pub fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    /// Loads the sync state.
    ///
    /// Never fails: a missing, unreadable or corrupt file yields an empty
    /// state, which makes the next run a full resync.
    pub fn load(&self) -> SyncState {
        let path = self.state_path();
        let Some(state) = read_json::<SyncState>(&path) else {
            return SyncState::empty();
        };
        if state.version != STATE_VERSION {
            warn!(
                path = %path.display(),
                found = state.version,
                expected = STATE_VERSION,
                "unsupported state version, starting from empty state"
            );
            return SyncState::empty();
        }
        debug!(path = %path.display(), records = state.len(), "loaded sync state");
        state
    }

    /// Persists the settled state and appends the run to the history.
    pub fn save(&self, state: &SyncState, summary: &RunSummary) -> SyncResult<()> {
        fs::create_dir_all(&self.dir)?;
        write_json_atomic(&self.state_path(), state)?;
        info!(records = state.len(), "saved sync state");
        self.append_history(summary)
    }

    /// Appends a run to the history without touching the state file.
    pub fn append_history(&self, summary: &RunSummary) -> SyncResult<()> {
        fs::create_dir_all(&self.dir)?;
        let mut runs = self.read_history();
        runs.push(summary.clone());
        if runs.len() > self.history_cap {
            let excess = runs.len() - self.history_cap;
            runs.drain(..excess);
        }
        write_json_atomic(&self.history_path(), &runs)?;
        Ok(())
    }

    /// Returns up to `limit` runs, newest first.
    pub fn history(&self, limit: usize) -> Vec<RunSummary> {
        self.read_history().into_iter().rev().take(limit).collect()
    }

    /// Oldest first, as stored.
    fn read_history(&self) -> Vec<RunSummary> {
        read_json(&self.history_path()).unwrap_or_default()
    }
}

/// Reads a JSON file, logging and returning `None` on any failure.
fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no file yet");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read file, ignoring it");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt file, ignoring it");
            None
        }
    }
}

/// Serializes `value` and atomically replaces `path` with it.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    sync_parent_dir(path);
    Ok(())
}

/// Persists the rename itself.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

//! Sync error types.

use std::io;

use icsbridge_providers::ProviderError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that stop a run (or a control operation) as a whole.
///
/// Failures scoped to one occurrence are not errors at this level; they
/// are recorded in the run summary.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The feed could not be fetched or parsed.
    #[error("feed fetch failed: {0}")]
    Fetch(#[source] ProviderError),

    /// The target rejected our credentials.
    #[error("target authentication failed: {0}")]
    Auth(#[source] ProviderError),

    /// A read-only target query failed.
    #[error("target request failed: {0}")]
    Target(#[source] ProviderError),

    /// Another run holds the run lock.
    #[error("Sync already in progress")]
    Busy,

    /// Shutdown was requested while the run was in flight.
    #[error("run cancelled by shutdown")]
    Cancelled,

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Another daemon owns the data directory.
    #[error("daemon already running (PID file exists: {path})")]
    AlreadyRunning { path: String },

    /// IO error (state, history, PID file).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an already running error.
    pub fn already_running(path: impl Into<String>) -> Self {
        Self::AlreadyRunning { path: path.into() }
    }

    /// Classifies a target error raised outside of applying actions.
    pub fn from_target(error: ProviderError) -> Self {
        if error.is_auth() {
            Self::Auth(error)
        } else {
            Self::Target(error)
        }
    }

    /// Returns true for [`SyncError::Busy`].
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }

    /// Returns true for [`SyncError::Auth`].
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

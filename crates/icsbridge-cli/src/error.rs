//! CLI error types.

use icsbridge_core::TracingError;
use icsbridge_providers::ProviderError;
use icsbridge_server::SyncError;
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors surfaced to the user.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Building the feed or the target failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A run or a store operation failed.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Logging could not be set up.
    #[error(transparent)]
    Tracing(#[from] TracingError),

    /// Output could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Process exit code: 2 when another run owns the state, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Sync(SyncError::Busy | SyncError::AlreadyRunning { .. }) => 2,
            _ => 1,
        }
    }
}

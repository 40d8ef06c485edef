//! Google Calendar target configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Base URL for Google Calendar API v3.
pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Configuration for the Google Calendar target.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// Calendar to write to. Defaults to `"primary"`.
    pub calendar_id: String,

    /// Path of the credential artifact (`token.json`).
    ///
    /// Read once at startup and never written.
    pub token_path: PathBuf,

    /// Per-request timeout.
    pub timeout: Duration,

    /// User agent string for API requests.
    pub user_agent: String,

    /// API base URL, overridable for proxies.
    pub api_base: String,
}

impl GoogleConfig {
    /// Default timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

    /// Creates a configuration writing to `calendar_id`.
    pub fn new(calendar_id: impl Into<String>) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            token_path: Self::default_token_path(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            user_agent: format!("icsbridge/{}", env!("CARGO_PKG_VERSION")),
            api_base: CALENDAR_API_BASE.to_string(),
        }
    }

    /// `~/.local/share/icsbridge/token.json` (platform data dir).
    pub fn default_token_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("icsbridge")
            .join("token.json")
    }

    /// Sets the token path.
    pub fn with_token_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_path = path.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the API base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// URL of the events collection.
    pub fn events_url(&self) -> String {
        format!(
            "{}/calendars/{}/events",
            self.api_base,
            urlencoding::encode(&self.calendar_id)
        )
    }

    /// URL of one event.
    pub fn event_url(&self, event_id: &str) -> String {
        format!("{}/{}", self.events_url(), urlencoding::encode(event_id))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.calendar_id.trim().is_empty() {
            return Err("calendar id is required".to_string());
        }
        if self.timeout.is_zero() {
            return Err("request timeout must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self::new("primary")
    }
}

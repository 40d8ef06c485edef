//! Configuration.
//!
//! Settings come from an optional `config.toml` (default
//! `~/.config/icsbridge/config.toml`), then environment variables override
//! individual values:
//!
//! | variable | setting | default |
//! |---|---|---|
//! | `ICS_URL` | `feed.url` | required |
//! | `GOOGLE_CALENDAR_ID` | `google.calendar_id` | `primary` |
//! | `POLL_SECONDS` | `sync.poll_seconds` | 900 |
//! | `SYNC_LOOKBACK_DAYS` | `sync.lookback_days` | 1 |
//! | `SYNC_LOOKAHEAD_DAYS` | `sync.lookahead_days` | 30 |
//! | `BUSY_BLOCKERS` | `mirror.blank_titles` | false |
//! | `SUMMARY_PREFIX` | `mirror.summary_prefix` | empty |
//! | `ICSBRIDGE_DATA_DIR` | `data_dir` | `~/.local/share/icsbridge` |
//! | `ICSBRIDGE_TOKEN_PATH` | `google.token_path` | `<data_dir>/token.json` |
//! | `ICSBRIDGE_WINDOW_EXIT` | `sync.window_exit` | `delete` |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use icsbridge_providers::EventTemplate;
use icsbridge_server::{RetryPolicy, SchedulerConfig, SyncOptions, WindowExitPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Configuration for icsbridge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Directory holding `state.json`, `history.json` and the PID file.
    pub data_dir: Option<PathBuf>,

    /// Source feed settings.
    pub feed: FeedSettings,

    /// Target calendar settings.
    pub google: GoogleSettings,

    /// Reconciliation settings.
    pub sync: SyncSettings,

    /// How mirrored events look.
    pub mirror: EventTemplate,
}

/// Source feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    /// ICS feed URL (`https://` or `webcal://`).
    pub url: Option<String>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 30,
        }
    }
}

/// Google Calendar settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    /// Calendar to write to.
    pub calendar_id: String,

    /// Credential artifact, read-only.
    pub token_path: Option<PathBuf>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            calendar_id: "primary".to_string(),
            token_path: None,
            timeout_secs: 30,
        }
    }
}

/// Reconciliation settings.
/// Upper bound for either side of the sync window.
pub const MAX_WINDOW_DAYS: u32 = 3650;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds between scheduled runs.
    pub poll_seconds: u64,

    /// Days before today mirrored.
    pub lookback_days: u32,

    /// Days after today mirrored.
    pub lookahead_days: u32,

    /// What happens to events that leave the feed.
    pub window_exit: WindowExitPolicy,

    /// Concurrent calendar requests.
    pub concurrency: usize,

    /// Attempts per remote call, the first one included.
    pub max_attempts: u32,

    /// Runs kept in `history.json`.
    pub history_cap: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_seconds: 900,
            lookback_days: 1,
            lookahead_days: 30,
            window_exit: WindowExitPolicy::Delete,
            concurrency: 4,
            max_attempts: 4,
            history_cap: icsbridge_server::DEFAULT_HISTORY_CAP,
        }
    }
}

impl BridgeConfig {
    /// Loads the file (if any) and applies the process environment.
    ///
    /// An explicit `path` must exist; the default path may be absent.
    pub fn load(path: Option<&Path>) -> CliResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::load_from(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Loads configuration from a specific file, without the environment.
    pub fn load_from(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CliError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| CliError::config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// Parses TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Overrides settings from environment variables read through `lookup`.
    ///
    /// Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> CliResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("ICS_URL") {
            self.feed.url = Some(url);
        }
        if let Some(id) = get("GOOGLE_CALENDAR_ID") {
            self.google.calendar_id = id;
        }
        if let Some(raw) = get("POLL_SECONDS") {
            self.sync.poll_seconds = parse_env("POLL_SECONDS", &raw)?;
        }
        if let Some(raw) = get("SYNC_LOOKBACK_DAYS") {
            self.sync.lookback_days = parse_env("SYNC_LOOKBACK_DAYS", &raw)?;
        }
        if let Some(raw) = get("SYNC_LOOKAHEAD_DAYS") {
            self.sync.lookahead_days = parse_env("SYNC_LOOKAHEAD_DAYS", &raw)?;
        }
        if let Some(raw) = get("BUSY_BLOCKERS") {
            self.mirror.blank_titles = parse_bool("BUSY_BLOCKERS", &raw)?;
        }
        // An empty prefix is a meaningful override, so read it unfiltered.
        if let Some(prefix) = lookup("SUMMARY_PREFIX") {
            self.mirror.summary_prefix = prefix;
        }
        if let Some(dir) = get("ICSBRIDGE_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = get("ICSBRIDGE_TOKEN_PATH") {
            self.google.token_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = get("ICSBRIDGE_WINDOW_EXIT") {
            self.sync.window_exit = WindowExitPolicy::from_str(&raw)
                .map_err(|e| CliError::config(format!("ICSBRIDGE_WINDOW_EXIT: {}", e)))?;
        }
        Ok(())
    }

    /// Checks the settings a run needs.
    pub fn validate(&self) -> CliResult<()> {
        let url = self.feed.url.as_deref().unwrap_or_default();
        if url.trim().is_empty() {
            return Err(CliError::config(
                "feed URL is required (set ICS_URL or [feed] url)",
            ));
        }
        icsbridge_providers::normalize_feed_url(url)?;

        if self.google.calendar_id.trim().is_empty() {
            return Err(CliError::config("google.calendar_id must not be empty"));
        }
        let checks = [
            (self.sync.poll_seconds == 0, "sync.poll_seconds must be positive"),
            (self.sync.lookahead_days == 0, "sync.lookahead_days must be positive"),
            (self.sync.concurrency == 0, "sync.concurrency must be positive"),
            (self.sync.max_attempts == 0, "sync.max_attempts must be positive"),
            (self.sync.history_cap == 0, "sync.history_cap must be positive"),
            (self.feed.timeout_secs == 0, "feed.timeout_secs must be positive"),
            (self.google.timeout_secs == 0, "google.timeout_secs must be positive"),
        ];
        if let Some((_, message)) = checks.iter().find(|(failed, _)| *failed) {
            return Err(CliError::config(*message));
        }
        for (name, days) in [
            ("sync.lookback_days", self.sync.lookback_days),
            ("sync.lookahead_days", self.sync.lookahead_days),
        ] {
            if days > MAX_WINDOW_DAYS {
                return Err(CliError::config(format!(
                    "{} must be at most {} (got {})",
                    name, MAX_WINDOW_DAYS, days
                )));
            }
        }
        Ok(())
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("icsbridge")
            .join("config.toml")
    }

    /// The effective data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("icsbridge")
        })
    }

    /// The effective credential artifact path.
    pub fn token_path(&self) -> PathBuf {
        self.google
            .token_path
            .clone()
            .unwrap_or_else(|| self.data_dir().join("token.json"))
    }

    /// The feed URL, after [`validate`](Self::validate).
    pub fn feed_url(&self) -> CliResult<&str> {
        self.feed
            .url
            .as_deref()
            .ok_or_else(|| CliError::config("feed URL is required"))
    }

    /// Options for the sync service.
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions::default()
            .with_window(self.sync.lookback_days, self.sync.lookahead_days)
            .with_template(self.mirror.clone())
            .with_window_exit(self.sync.window_exit)
            .with_concurrency(self.sync.concurrency)
            .with_retry(RetryPolicy::default().with_max_attempts(self.sync.max_attempts))
    }

    /// Scheduler configuration.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(Duration::from_secs(self.sync.poll_seconds))
    }

    /// Google target configuration.
    #[cfg(feature = "google")]
    pub fn google_config(&self) -> icsbridge_providers::google::GoogleConfig {
        icsbridge_providers::google::GoogleConfig::new(&self.google.calendar_id)
            .with_token_path(self.token_path())
            .with_timeout(Duration::from_secs(self.google.timeout_secs))
    }
}

fn parse_env<T: FromStr>(name: &str, raw: &str) -> CliResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| CliError::config(format!("{}: invalid value '{}': {}", name, raw, e)))
}

fn parse_bool(name: &str, raw: &str) -> CliResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(CliError::config(format!(
            "{}: invalid boolean '{}'",
            name, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn valid() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.feed.url = Some("https://school.example/feed.ics".to_string());
        config
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = BridgeConfig::default();
        assert_eq!(config.google.calendar_id, "primary");
        assert_eq!(config.sync.poll_seconds, 900);
        assert_eq!(config.sync.lookback_days, 1);
        assert_eq!(config.sync.lookahead_days, 30);
        assert_eq!(config.sync.window_exit, WindowExitPolicy::Delete);
        assert!(!config.mirror.blank_titles);
        assert!(config.mirror.summary_prefix.is_empty());
    }

    #[test]
    fn toml_file_is_read() {
        let config = BridgeConfig::from_toml(
            r#"
data_dir = "/var/lib/icsbridge"

[feed]
url = "webcal://school.example/feed.ics"

[google]
calendar_id = "family@group.calendar.google.com"

[sync]
poll_seconds = 300
window_exit = "forget"

[mirror]
summary_prefix = "[School]"
"#,
        )
        .unwrap();

        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/icsbridge"));
        assert_eq!(config.token_path(), PathBuf::from("/var/lib/icsbridge/token.json"));
        assert_eq!(config.google.calendar_id, "family@group.calendar.google.com");
        assert_eq!(config.sync.poll_seconds, 300);
        assert_eq!(config.sync.lookahead_days, 30);
        assert_eq!(config.sync.window_exit, WindowExitPolicy::Forget);
        assert_eq!(config.mirror.summary_prefix, "[School]");
        assert_eq!(config.mirror.default_title, "Busy");
        config.validate().unwrap();
    }

    #[test]
    fn environment_overrides_file() {
        let mut config = BridgeConfig::from_toml("[sync]\npoll_seconds = 300\n").unwrap();
        config
            .apply_env(env(&[
                ("ICS_URL", "https://school.example/feed.ics"),
                ("GOOGLE_CALENDAR_ID", "busy@group.calendar.google.com"),
                ("POLL_SECONDS", "60"),
                ("SYNC_LOOKBACK_DAYS", "0"),
                ("SYNC_LOOKAHEAD_DAYS", "14"),
                ("BUSY_BLOCKERS", "yes"),
                ("SUMMARY_PREFIX", "Kid:"),
                ("ICSBRIDGE_DATA_DIR", "/data"),
                ("ICSBRIDGE_TOKEN_PATH", "/secrets/token.json"),
                ("ICSBRIDGE_WINDOW_EXIT", "forget"),
            ]))
            .unwrap();

        assert_eq!(config.feed.url.as_deref(), Some("https://school.example/feed.ics"));
        assert_eq!(config.google.calendar_id, "busy@group.calendar.google.com");
        assert_eq!(config.sync.poll_seconds, 60);
        assert_eq!(config.sync.lookback_days, 0);
        assert_eq!(config.sync.lookahead_days, 14);
        assert!(config.mirror.blank_titles);
        assert_eq!(config.mirror.summary_prefix, "Kid:");
        assert_eq!(config.data_dir(), PathBuf::from("/data"));
        assert_eq!(config.token_path(), PathBuf::from("/secrets/token.json"));
        assert_eq!(config.sync.window_exit, WindowExitPolicy::Forget);
        config.validate().unwrap();
    }

    #[test]
    fn empty_variables_are_ignored() {
        let mut config = valid();
        config
            .apply_env(env(&[("ICS_URL", ""), ("POLL_SECONDS", " ")]))
            .unwrap();
        assert_eq!(config.feed.url.as_deref(), Some("https://school.example/feed.ics"));
        assert_eq!(config.sync.poll_seconds, 900);
    }

    #[test]
    fn bad_environment_values_are_rejected() {
        for (name, value) in [
            ("POLL_SECONDS", "soon"),
            ("SYNC_LOOKAHEAD_DAYS", "-3"),
            ("BUSY_BLOCKERS", "maybe"),
            ("ICSBRIDGE_WINDOW_EXIT", "archive"),
        ] {
            let mut config = valid();
            let err = config.apply_env(env(&[(name, value)])).unwrap_err();
            assert!(err.to_string().contains(name), "{}", err);
        }
    }

    #[test]
    fn validation_rejects_missing_url_and_zeroes() {
        let err = BridgeConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("feed URL is required"));

        let mut config = valid();
        config.feed.url = Some("ftp://school.example/feed.ics".to_string());
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sync.poll_seconds = 0;
        assert!(config.validate().unwrap_err().to_string().contains("poll_seconds"));

        let mut config = valid();
        config.sync.lookahead_days = 0;
        assert!(config.validate().unwrap_err().to_string().contains("lookahead_days"));

        let mut config = valid();
        config.sync.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sync.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_bounds_the_window() {
        let mut config = valid();
        config.sync.lookahead_days = MAX_WINDOW_DAYS;
        config.sync.lookback_days = MAX_WINDOW_DAYS;
        assert!(config.validate().is_ok());

        let mut config = valid();
        config
            .apply_env(env(&[("SYNC_LOOKAHEAD_DAYS", "4000000000")]))
            .unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("sync.lookahead_days must be at most 3650"), "{}", err);

        let mut config = valid();
        config.sync.lookback_days = MAX_WINDOW_DAYS + 1;
        assert!(config.validate().unwrap_err().to_string().contains("lookback_days"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BridgeConfig::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn sync_options_follow_settings() {
        let mut config = valid();
        config.sync.concurrency = 2;
        config.sync.max_attempts = 6;
        config.mirror.blank_titles = true;

        let options = config.sync_options();
        assert_eq!(options.concurrency, 2);
        assert_eq!(options.retry.max_attempts, 6);
        assert!(options.template.blank_titles);
        assert_eq!(
            config.scheduler_config().sync_interval,
            Duration::from_secs(900)
        );
    }
}

//! The credential artifact.
//!
//! `token.json` is produced by the authorization helper and consumed here
//! read-only. The format is Google's "authorized user" JSON:
//!
//! ```json
//! {
//!   "token": "ya29...",
//!   "refresh_token": "1//0g...",
//!   "token_uri": "https://oauth2.googleapis.com/token",
//!   "client_id": "123.apps.googleusercontent.com",
//!   "client_secret": "...",
//!   "expiry": "2025-03-01T10:00:00.123456Z"
//! }
//! ```
//!
//! Refreshed access tokens are kept in memory only.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};

use super::oauth::{GOOGLE_TOKEN_URL, OAuthCredentials};

/// Refresh this long before the recorded expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

/// Contents of the credential artifact.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenInfo {
    /// Current access token.
    #[serde(default, alias = "access_token")]
    pub token: Option<String>,

    /// Refresh token for obtaining new access tokens.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// OAuth client id used to mint the tokens.
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth client secret used to mint the tokens.
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Token endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,

    /// Access token expiry, RFC 3339 (or naive UTC, as older helpers wrote it).
    #[serde(default, alias = "expires_at")]
    pub expiry: Option<String>,

    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl TokenInfo {
    /// Parses the artifact.
    pub fn from_json(json: &str) -> ProviderResult<Self> {
        let info: TokenInfo = serde_json::from_str(json).map_err(|e| {
            ProviderError::authentication(format!("failed to parse credential file: {}", e))
        })?;
        if info.token.is_none() && info.refresh_token.is_none() {
            return Err(ProviderError::authentication(
                "credential file holds neither an access token nor a refresh token",
            ));
        }
        Ok(info)
    }

    /// Parsed expiry, if recorded.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.expiry.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    /// Returns true if the access token is missing, expired or about to expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.token.is_none() {
            return true;
        }
        match self.expires_at() {
            Some(expires_at) => now + Duration::seconds(EXPIRY_MARGIN_SECS) >= expires_at,
            // No expiry recorded: use the token until the API rejects it.
            None => false,
        }
    }

    /// Returns true if the access token is expired now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// OAuth client credentials for refreshing, if the artifact carries them.
    pub fn credentials(&self) -> Option<OAuthCredentials> {
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => Some(OAuthCredentials::new(id, secret)),
            _ => None,
        }
    }

    /// Records a refreshed access token.
    pub fn update_access_token(&mut self, access_token: impl Into<String>, expires_in_secs: Option<i64>) {
        self.token = Some(access_token.into());
        self.expiry = expires_in_secs.map(|secs| (Utc::now() + Duration::seconds(secs)).to_rfc3339());
    }
}

/// In-memory holder of the credential artifact.
#[derive(Debug)]
pub struct TokenStorage {
    path: PathBuf,
    tokens: RwLock<TokenInfo>,
}

impl TokenStorage {
    /// Reads the artifact at `path`.
    pub fn load(path: impl Into<PathBuf>) -> ProviderResult<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path).map_err(|e| {
            ProviderError::authentication(format!(
                "cannot read credential file {}: {}",
                path.display(),
                e
            ))
        })?;
        let tokens = TokenInfo::from_json(&content)?;
        info!(path = %path.display(), "loaded credentials");
        Ok(Self::from_info(path, tokens))
    }

    /// Wraps already-parsed tokens.
    pub fn from_info(path: impl Into<PathBuf>, tokens: TokenInfo) -> Self {
        Self {
            path: path.into(),
            tokens: RwLock::new(tokens),
        }
    }

    /// Returns a copy of the current tokens.
    pub async fn get(&self) -> TokenInfo {
        self.tokens.read().await.clone()
    }

    /// Records a refreshed access token (memory only).
    pub async fn update_access_token(&self, access_token: impl Into<String>, expires_in_secs: Option<i64>) {
        self.tokens
            .write()
            .await
            .update_access_token(access_token, expires_in_secs);
        debug!("access token refreshed in memory");
    }

    /// Returns the artifact path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

//! Feed fetcher: downloads the raw ICS document.

use std::time::Duration;

use tracing::debug;
use url::Url;

use crate::error::{ProviderError, ProviderResult};
use crate::target::BoxFuture;

/// Default request timeout for the feed.
pub const DEFAULT_FEED_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches the source calendar over HTTP(S).
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    http_client: reqwest::Client,
    url: Url,
}

impl FeedFetcher {
    /// Creates a fetcher for the given feed URL.
    ///
    /// `webcal://` and `webcals://` URLs are fetched over HTTPS.
    pub fn new(url: &str, timeout: Duration) -> ProviderResult<Self> {
        let url = normalize_feed_url(url)?;
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("icsbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self { http_client, url })
    }

    /// Returns the URL actually fetched.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Downloads the document.
    ///
    /// Fails with a feed error if the server is unreachable, answers with a
    /// non-success status, or returns something that is not a calendar.
    pub async fn fetch(&self) -> ProviderResult<String> {
        let response = self
            .http_client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| {
                let message = if e.is_timeout() {
                    "feed request timed out".to_string()
                } else {
                    format!("feed request failed: {}", e)
                };
                ProviderError::feed(message).with_provider("feed").with_source(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(
                ProviderError::feed(format!("feed returned HTTP {}", status)).with_provider("feed"),
            );
        }

        let bytes = response.bytes().await.map_err(|e| {
            ProviderError::feed(format!("failed to read feed body: {}", e)).with_provider("feed")
        })?;

        let body = decode_document(&bytes)?;
        debug!(url = %self.url, bytes = bytes.len(), "fetched feed");
        Ok(body)
    }
}

/// Where the source document comes from.
///
/// [`FeedFetcher`] is the production implementation; [`StaticFeed`] serves a
/// fixed document.
pub trait FeedSource: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Returns the current document.
    fn fetch(&self) -> BoxFuture<'_, ProviderResult<String>>;
}

impl FeedSource for FeedFetcher {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    fn fetch(&self) -> BoxFuture<'_, ProviderResult<String>> {
        Box::pin(FeedFetcher::fetch(self))
    }
}

/// A feed whose document is set in memory.
#[derive(Debug, Default)]
pub struct StaticFeed {
    document: std::sync::RwLock<Option<String>>,
}

impl StaticFeed {
    /// Creates a feed serving `document`.
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: std::sync::RwLock::new(Some(document.into())),
        }
    }

    /// Replaces the served document.
    pub fn set(&self, document: impl Into<String>) {
        if let Ok(mut guard) = self.document.write() {
            *guard = Some(document.into());
        }
    }

    /// Makes every fetch fail until a document is set again.
    pub fn set_unreachable(&self) {
        if let Ok(mut guard) = self.document.write() {
            *guard = None;
        }
    }
}

impl FeedSource for StaticFeed {
    fn describe(&self) -> String {
        "static".to_string()
    }

    fn fetch(&self) -> BoxFuture<'_, ProviderResult<String>> {
        let document = self.document.read().ok().and_then(|guard| guard.clone());
        Box::pin(async move {
            document.ok_or_else(|| ProviderError::feed("feed unreachable").with_provider("static"))
        })
    }
}

/// Parses the feed URL, mapping the webcal schemes to HTTPS.
pub fn normalize_feed_url(raw: &str) -> ProviderResult<Url> {
    let raw = raw.trim();
    let rewritten = if let Some(rest) = raw.strip_prefix("webcals://") {
        format!("https://{}", rest)
    } else if let Some(rest) = raw.strip_prefix("webcal://") {
        format!("https://{}", rest)
    } else {
        raw.to_string()
    };

    let url = Url::parse(&rewritten)
        .map_err(|e| ProviderError::configuration(format!("invalid feed URL {:?}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProviderError::configuration(format!(
            "unsupported feed URL scheme: {}",
            other
        ))),
    }
}

/// Validates that a body is a UTF-8 calendar document.
pub fn decode_document(bytes: &[u8]) -> ProviderResult<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ProviderError::feed("feed body is not valid UTF-8").with_provider("feed"))?;
    let text = text.trim_start_matches('\u{feff}');

    if !text.trim_start().starts_with("BEGIN:VCALENDAR") {
        return Err(
            ProviderError::feed("feed body is not an iCalendar document").with_provider("feed"),
        );
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;

    #[test]
    fn webcal_is_fetched_over_https() {
        let url = normalize_feed_url("webcal://school.example/cal.ics").unwrap();
        assert_eq!(url.as_str(), "https://school.example/cal.ics");

        let url = normalize_feed_url(" webcals://school.example/cal.ics ").unwrap();
        assert_eq!(url.scheme(), "https");
    }

    #[test]
    fn http_urls_are_kept() {
        let url = normalize_feed_url("http://localhost:8080/feed.ics").unwrap();
        assert_eq!(url.scheme(), "http");
    }

    #[test]
    fn rejects_other_schemes() {
        let err = normalize_feed_url("ftp://school.example/cal.ics").unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::ConfigurationError);
        assert!(normalize_feed_url("not a url").is_err());
    }

    #[test]
    fn decodes_calendar_with_bom() {
        let body = "\u{feff}BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n";
        let text = decode_document(body.as_bytes()).unwrap();
        assert!(text.starts_with("BEGIN:VCALENDAR"));
    }

    #[tokio::test]
    async fn static_feed_serves_and_fails() {
        let feed = StaticFeed::new("BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n");
        assert!(FeedSource::fetch(&feed).await.unwrap().starts_with("BEGIN:VCALENDAR"));

        feed.set_unreachable();
        let err = FeedSource::fetch(&feed).await.unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::FeedError);
    }

    #[test]
    fn rejects_non_calendar_bodies() {
        let err = decode_document(b"<html>login required</html>").unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::FeedError);

        let err = decode_document(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert_eq!(err.code(), ProviderErrorCode::FeedError);
    }
}

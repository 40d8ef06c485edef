//! Google Calendar API client.
//!
//! Low-level HTTP calls against the events collection of one calendar.
//! Callers supply the access token; refreshing is handled one level up.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use icsbridge_core::{StableKey, SyncWindow, Transparency, date_to_utc};
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::mirror::{KEY_PROPERTY, MANAGED_PROPERTY, MirrorEvent, UID_PROPERTY};
use crate::target::{ManagedEvent, RemoteOutcome};

use super::config::GoogleConfig;

/// Page size for list requests.
const PAGE_SIZE: &str = "250";

/// Google Calendar API client.
#[derive(Debug, Clone)]
pub struct GoogleCalendarClient {
    http_client: reqwest::Client,
    config: GoogleConfig,
}

/// What a successful round trip produced.
enum Reply {
    Body(String),
    Missing,
    /// 409: the client-supplied id is taken.
    Conflict,
}

/// Event id used when inserting the event for `key`.
///
/// Ids are drawn from base32hex (`0-9a-v`), 5 to 1024 characters; a hex
/// SHA-256 digest is a valid one. A retried insert reuses the id, so the
/// API answers 409 instead of storing a duplicate.
pub fn event_id_for(key: &StableKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"icsbridge:");
    hasher.update(key.as_str().as_bytes());
    format!("{:x}", hasher.finalize())
}

impl GoogleCalendarClient {
    /// Creates a client for the configured calendar.
    pub fn new(config: GoogleConfig) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ProviderError::configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client, config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    /// Inserts an event under `event_id` and returns the stored id.
    ///
    /// If the id already exists (an earlier insert whose reply was lost, or
    /// an event the user deleted), the existing event is patched instead.
    pub async fn insert_event(
        &self,
        access_token: &str,
        event_id: &str,
        body: &EventBody,
    ) -> ProviderResult<String> {
        let request = self
            .http_client
            .post(self.config.events_url())
            .bearer_auth(access_token)
            .json(&InsertBody { id: event_id, body });

        match self.execute(request).await? {
            Reply::Body(text) => {
                let created: ApiEvent = parse_json(&text)?;
                created.id.ok_or_else(|| {
                    ProviderError::invalid_response("insert response carried no event id")
                        .with_provider("google")
                })
            }
            Reply::Conflict => {
                debug!(event_id, "event id already taken, patching existing event");
                match self.patch_event(access_token, event_id, body).await? {
                    RemoteOutcome::Applied => Ok(event_id.to_string()),
                    RemoteOutcome::NotFound => Err(ProviderError::bad_request(format!(
                        "event id {} is taken but the event cannot be found",
                        event_id
                    ))
                    .with_provider("google")),
                }
            }
            Reply::Missing => Err(ProviderError::not_found(format!(
                "calendar {} not found",
                self.config.calendar_id
            ))
            .with_provider("google")),
        }
    }

    /// Patches an existing event with the full mirrored body.
    pub async fn patch_event(
        &self,
        access_token: &str,
        event_id: &str,
        body: &EventBody,
    ) -> ProviderResult<RemoteOutcome> {
        let request = self
            .http_client
            .patch(self.config.event_url(event_id))
            .bearer_auth(access_token)
            .json(body);

        match self.execute(request).await? {
            Reply::Body(_) => Ok(RemoteOutcome::Applied),
            Reply::Missing => Ok(RemoteOutcome::NotFound),
            Reply::Conflict => Err(unexpected_conflict()),
        }
    }

    /// Deletes an event.
    pub async fn delete_event(&self, access_token: &str, event_id: &str) -> ProviderResult<RemoteOutcome> {
        let request = self
            .http_client
            .delete(self.config.event_url(event_id))
            .bearer_auth(access_token);

        match self.execute(request).await? {
            Reply::Body(_) => Ok(RemoteOutcome::Applied),
            Reply::Missing => Ok(RemoteOutcome::NotFound),
            Reply::Conflict => Err(unexpected_conflict()),
        }
    }

    /// Lists events carrying the managed stamp that overlap `window`.
    pub async fn list_managed(
        &self,
        access_token: &str,
        window: SyncWindow,
    ) -> ProviderResult<Vec<ManagedEvent>> {
        let mut managed = Vec::new();
        let mut page_token: Option<String> = None;
        let stamp = format!("{}=true", MANAGED_PROPERTY);

        loop {
            let mut request = self
                .http_client
                .get(self.config.events_url())
                .bearer_auth(access_token)
                .query(&[
                    ("timeMin", window.start.to_rfc3339()),
                    ("timeMax", window.end.to_rfc3339()),
                    ("singleEvents", "true".to_string()),
                    ("privateExtendedProperty", stamp.clone()),
                    ("maxResults", PAGE_SIZE.to_string()),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: EventListResponse = match self.execute(request).await? {
                Reply::Body(text) => parse_json(&text)?,
                Reply::Conflict => return Err(unexpected_conflict()),
                Reply::Missing => {
                    return Err(ProviderError::not_found(format!(
                        "calendar {} not found",
                        self.config.calendar_id
                    ))
                    .with_provider("google"));
                }
            };

            managed.extend(page.items.into_iter().filter_map(ApiEvent::into_managed));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(
            count = managed.len(),
            calendar = %self.config.calendar_id,
            "listed managed events"
        );
        Ok(managed)
    }

    async fn execute(&self, request: RequestBuilder) -> ProviderResult<Reply> {
        let response = request.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                "request timeout".to_string()
            } else if e.is_connect() {
                format!("connection failed: {}", e)
            } else {
                format!("request failed: {}", e)
            };
            ProviderError::network(message)
                .with_provider("google")
                .with_source(e)
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(Reply::Missing);
        }
        if status == StatusCode::CONFLICT {
            return Ok(Reply::Conflict);
        }

        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .map(Duration::from_secs);

        let body = response.text().await.map_err(|e| {
            ProviderError::network(format!("failed to read response: {}", e)).with_provider("google")
        })?;

        if status.is_success() {
            Ok(Reply::Body(body))
        } else {
            Err(status_error(status, retry_after, &body))
        }
    }
}

/// Maps a non-success status to an error.
pub(crate) fn status_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ProviderError {
    let error = match status {
        StatusCode::UNAUTHORIZED => ProviderError::authentication("access token expired or invalid"),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::rate_limited("rate limit exceeded"),
        // Google reports quota exhaustion as 403 with a rate limit reason.
        StatusCode::FORBIDDEN if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") => {
            ProviderError::rate_limited("rate limit exceeded")
        }
        StatusCode::FORBIDDEN => ProviderError::authorization(format!("access denied: {}", body)),
        s if s.is_server_error() => ProviderError::server(format!("API error ({}): {}", s, body)),
        s => ProviderError::bad_request(format!("API error ({}): {}", s, body)),
    }
    .with_provider("google");

    match retry_after {
        Some(delay) => error.with_retry_after(delay),
        None => error,
    }
}

fn unexpected_conflict() -> ProviderError {
    ProviderError::bad_request("API error (409 Conflict)").with_provider("google")
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &str) -> ProviderResult<T> {
    serde_json::from_str(body).map_err(|e| {
        ProviderError::invalid_response(format!("failed to parse response: {}", e)).with_provider("google")
    })
}

/// Request body for insert and patch.
///
/// Every field is always sent so a patch also clears values that the
/// source dropped (an emptied location, a switch between dated and timed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    pub summary: String,
    pub location: String,
    pub description: String,
    pub start: EventTime,
    pub end: EventTime,
    pub transparency: &'static str,
    pub visibility: &'static str,
    pub status: &'static str,
    pub extended_properties: ExtendedProperties,
}

/// Insert payload: the body plus the client-chosen id.
#[derive(Debug, Serialize)]
struct InsertBody<'a> {
    id: &'a str,
    #[serde(flatten)]
    body: &'a EventBody,
}

/// Start or end of an event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTime {
    pub date: Option<String>,
    pub date_time: Option<String>,
    pub time_zone: Option<String>,
}

impl EventTime {
    fn date(date: NaiveDate) -> Self {
        Self {
            date: Some(date.format("%Y-%m-%d").to_string()),
            date_time: None,
            time_zone: None,
        }
    }

    fn instant(at: DateTime<Utc>) -> Self {
        Self {
            date: None,
            date_time: Some(at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            time_zone: Some("UTC".to_string()),
        }
    }
}

/// Extended properties of an event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ExtendedProperties {
    #[serde(default)]
    pub private: BTreeMap<String, String>,
}

impl EventBody {
    /// Builds the body for a mirrored event, stamped with its key.
    pub fn from_mirror(event: &MirrorEvent) -> Self {
        let (start, end) = event.written_span();
        let (start, end) = if event.all_day {
            (EventTime::date(start.date_naive()), EventTime::date(end.date_naive()))
        } else {
            (EventTime::instant(start), EventTime::instant(end))
        };

        let mut private = BTreeMap::new();
        private.insert(MANAGED_PROPERTY.to_string(), "true".to_string());
        private.insert(KEY_PROPERTY.to_string(), event.key.as_str().to_string());
        private.insert(UID_PROPERTY.to_string(), event.uid.clone());

        Self {
            summary: event.summary.clone(),
            location: event.location.clone().unwrap_or_default(),
            description: event.description.clone().unwrap_or_default(),
            start,
            end,
            transparency: event.transparency.as_str(),
            visibility: "private",
            status: "confirmed",
            extended_properties: ExtendedProperties { private },
        }
    }
}

/// Response from the events list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventListResponse {
    #[serde(default)]
    items: Vec<ApiEvent>,
    next_page_token: Option<String>,
}

/// An event as returned by the API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    id: Option<String>,
    summary: Option<String>,
    location: Option<String>,
    description: Option<String>,
    status: Option<String>,
    transparency: Option<String>,
    visibility: Option<String>,
    start: Option<ApiEventTime>,
    end: Option<ApiEventTime>,
    extended_properties: Option<ExtendedProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEventTime {
    date: Option<String>,
    date_time: Option<String>,
}

impl ApiEventTime {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        if let Some(dt) = &self.date_time {
            return DateTime::parse_from_rfc3339(dt)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|e| warn!("failed to parse event time {}: {}", dt, e))
                .ok();
        }
        let date = self.date.as_deref()?;
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map(date_to_utc)
            .map_err(|e| warn!("failed to parse event date {}: {}", date, e))
            .ok()
    }
}

impl ApiEvent {
    fn into_managed(self) -> Option<ManagedEvent> {
        if self.status.as_deref() == Some("cancelled") {
            return None;
        }
        let remote_id = self.id?;
        let key = self
            .extended_properties
            .and_then(|props| props.private.get(KEY_PROPERTY).cloned())
            .map(StableKey::from_raw);

        // The API omits transparency for busy events.
        let transparency = match self.transparency.as_deref() {
            Some("transparent") => Transparency::Transparent,
            _ => Transparency::Opaque,
        };

        Some(ManagedEvent {
            remote_id,
            key,
            summary: self.summary.unwrap_or_default(),
            start: self.start.as_ref().and_then(ApiEventTime::to_utc),
            end: self.end.as_ref().and_then(ApiEventTime::to_utc),
            all_day: self.start.as_ref().is_some_and(|t| t.date.is_some()),
            location: self.location.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            transparency,
            private: self.visibility.as_deref() == Some("private"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;
    use chrono::TimeZone;
    use icsbridge_core::SourceOccurrence;
    use insta::assert_json_snapshot;

    use crate::mirror::EventTemplate;

    fn lesson() -> SourceOccurrence {
        SourceOccurrence::new(
            "lesson@school",
            Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap(),
            "Maths",
        )
        .with_location("Room 4")
    }

    #[test]
    fn timed_body() {
        let event = EventTemplate::default().render(&lesson());
        let body = EventBody::from_mirror(&event);
        assert_json_snapshot!(body, @r#"
        {
          "summary": "Maths",
          "location": "Room 4",
          "description": "",
          "start": {
            "date": null,
            "dateTime": "2025-03-03T09:00:00Z",
            "timeZone": "UTC"
          },
          "end": {
            "date": null,
            "dateTime": "2025-03-03T10:00:00Z",
            "timeZone": "UTC"
          },
          "transparency": "opaque",
          "visibility": "private",
          "status": "confirmed",
          "extendedProperties": {
            "private": {
              "key": "lesson@school|2025-03-03T09:00:00Z",
              "managed": "true",
              "uid": "lesson@school"
            }
          }
        }
        "#);
    }

    #[test]
    fn all_day_body_uses_dates() {
        let day = Utc.with_ymd_and_hms(2025, 3, 7, 0, 0, 0).unwrap();
        let occurrence = SourceOccurrence::new("trip@school", day, day, "Trip")
            .with_all_day(true)
            .with_transparency(Transparency::Transparent);
        let body = EventBody::from_mirror(&EventTemplate::default().render(&occurrence));

        assert_eq!(body.start.date.as_deref(), Some("2025-03-07"));
        assert_eq!(body.end.date.as_deref(), Some("2025-03-08"));
        assert!(body.start.date_time.is_none());
        assert!(body.start.time_zone.is_none());
        assert_eq!(body.transparency, "transparent");
        assert_eq!(
            body.extended_properties.private.get("key").map(String::as_str),
            Some("trip@school|2025-03-07")
        );
    }

    #[test]
    fn insert_carries_a_stable_id() {
        let event = EventTemplate::default().render(&lesson());
        let id = event_id_for(&event.key);
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='v')));
        assert_eq!(id, event_id_for(&EventTemplate::default().render(&lesson()).key));

        let moved = lesson().with_location("Room 9");
        assert_eq!(id, event_id_for(&EventTemplate::default().render(&moved).key));

        let other = SourceOccurrence::new(
            "lesson@school",
            Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 4, 10, 0, 0).unwrap(),
            "Maths",
        );
        assert_ne!(id, event_id_for(&EventTemplate::default().render(&other).key));

        let body = EventBody::from_mirror(&event);
        let json = serde_json::to_value(InsertBody { id: &id, body: &body }).unwrap();
        assert_eq!(json["id"], id.as_str());
        assert_eq!(json["summary"], "Maths");
        assert_eq!(json["visibility"], "private");
    }

    #[test]
    fn status_mapping() {
        let auth = status_error(StatusCode::UNAUTHORIZED, None, "");
        assert!(auth.is_auth());

        let throttled = status_error(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(7)), "");
        assert_eq!(throttled.code(), ProviderErrorCode::RateLimited);
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(7)));

        let quota = status_error(
            StatusCode::FORBIDDEN,
            None,
            r#"{"error": {"errors": [{"reason": "userRateLimitExceeded"}]}}"#,
        );
        assert!(quota.is_retryable());

        let denied = status_error(StatusCode::FORBIDDEN, None, r#"{"error": {"code": 403}}"#);
        assert_eq!(denied.code(), ProviderErrorCode::AuthorizationFailed);

        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, None, "").is_retryable());
        assert!(!status_error(StatusCode::BAD_REQUEST, None, "bad").is_retryable());
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, None, "bad").provider(),
            Some("google")
        );
    }

    #[test]
    fn parse_managed_listing() {
        let json = r#"{
            "items": [
                {
                    "id": "ev1",
                    "summary": "Maths",
                    "location": "Room 4",
                    "status": "confirmed",
                    "visibility": "private",
                    "start": {"dateTime": "2025-03-03T10:00:00+01:00"},
                    "end": {"dateTime": "2025-03-03T11:00:00+01:00"},
                    "extendedProperties": {
                        "private": {"managed": "true", "key": "lesson@school|2025-03-03T09:00:00Z"}
                    }
                },
                {
                    "id": "ev2",
                    "status": "confirmed",
                    "transparency": "transparent",
                    "start": {"date": "2025-03-07"},
                    "end": {"date": "2025-03-08"},
                    "extendedProperties": {"private": {"managed": "true"}}
                },
                {"id": "ev3", "status": "cancelled"}
            ],
            "nextPageToken": "abc"
        }"#;

        let page: EventListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));

        let managed: Vec<ManagedEvent> = page.items.into_iter().filter_map(ApiEvent::into_managed).collect();
        assert_eq!(managed.len(), 2);
        assert_eq!(
            managed[0].key.as_ref().map(StableKey::as_str),
            Some("lesson@school|2025-03-03T09:00:00Z")
        );
        assert_eq!(managed[0].start, Some(Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()));
        assert!(managed[1].key.is_none());
        assert_eq!(managed[1].start, Some(Utc.with_ymd_and_hms(2025, 3, 7, 0, 0, 0).unwrap()));
        assert_eq!(managed[1].summary, "");

        let event = EventTemplate::default().render(&lesson());
        assert!(managed[0].matches(&event));
        assert!(managed[1].all_day);
        assert!(!managed[1].private);
        assert_eq!(managed[1].transparency, Transparency::Transparent);
        assert_eq!(managed[1].end, Some(Utc.with_ymd_and_hms(2025, 3, 8, 0, 0, 0).unwrap()));
    }
}

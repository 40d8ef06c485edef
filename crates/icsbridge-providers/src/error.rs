//! Error types for feed and calendar operations.
//!
//! Every remote failure is a [`ProviderError`]. The reconciler never matches
//! on codes directly; it asks for the [`FailureKind`] and decides whether to
//! retry, self-heal, record the failure or abort the run.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The category of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// Credentials are missing, invalid, or could not be refreshed.
    AuthenticationFailed,
    /// The credentials lack access to the calendar.
    AuthorizationFailed,
    /// Connection failed, timed out, DNS resolution, etc.
    NetworkError,
    /// Too many requests (429, or 403 with a rate-limit reason).
    RateLimited,
    /// Server returned a 5xx status.
    ServerError,
    /// Response could not be decoded.
    InvalidResponse,
    /// The remote resource does not exist (404 / 410).
    NotFound,
    /// Request was rejected (other 4xx).
    BadRequest,
    /// Missing or invalid configuration.
    ConfigurationError,
    /// The ICS feed could not be fetched or is not a calendar.
    FeedError,
}

/// How the sync engine should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Retry with backoff.
    Transient,
    /// The remote object is gone.
    NotFound,
    /// Credentials are unusable; stop the run.
    Auth,
    /// Retrying will not help.
    Permanent,
}

impl ProviderErrorCode {
    /// Returns true if this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Classifies the code.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NetworkError | Self::RateLimited | Self::ServerError => FailureKind::Transient,
            Self::NotFound => FailureKind::NotFound,
            Self::AuthenticationFailed | Self::AuthorizationFailed => FailureKind::Auth,
            Self::InvalidResponse
            | Self::BadRequest
            | Self::ConfigurationError
            | Self::FeedError => FailureKind::Permanent,
        }
    }

    /// Returns a machine-readable name for this error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthorizationFailed => "authorization_failed",
            Self::NetworkError => "network_error",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InvalidResponse => "invalid_response",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::ConfigurationError => "configuration_error",
            Self::FeedError => "feed_error",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An error that occurred while talking to the feed or the target calendar.
#[derive(Debug, Error)]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    /// The component that generated this error (e.g. "google", "feed").
    provider: Option<String>,
    /// Server-requested delay before the next attempt (`Retry-After`).
    retry_after: Option<Duration>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    /// Creates a new provider error with the given code and message.
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            retry_after: None,
            source: None,
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthenticationFailed, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::AuthorizationFailed, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NetworkError, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::RateLimited, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ServerError, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::InvalidResponse, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::BadRequest, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::ConfigurationError, message)
    }

    pub fn feed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorCode::FeedError, message)
    }

    /// Sets the provider name for this error.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the server-requested retry delay.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Sets the source error for this error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the error code.
    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the provider name, if set.
    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    /// Returns the server-requested retry delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Classifies the error.
    pub fn kind(&self) -> FailureKind {
        self.code.kind()
    }

    /// Returns true if this error is transient and may be retried.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Returns true if the credentials are unusable.
    pub fn is_auth(&self) -> bool {
        self.kind() == FailureKind::Auth
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref provider) = self.provider {
            write!(f, "[{}] ", provider)?;
        }
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A specialized Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_classify() {
        assert_eq!(ProviderErrorCode::NetworkError.kind(), FailureKind::Transient);
        assert_eq!(ProviderErrorCode::RateLimited.kind(), FailureKind::Transient);
        assert_eq!(ProviderErrorCode::ServerError.kind(), FailureKind::Transient);
        assert_eq!(ProviderErrorCode::NotFound.kind(), FailureKind::NotFound);
        assert_eq!(ProviderErrorCode::AuthorizationFailed.kind(), FailureKind::Auth);
        assert_eq!(ProviderErrorCode::BadRequest.kind(), FailureKind::Permanent);
        assert!(!ProviderErrorCode::FeedError.is_retryable());
    }

    #[test]
    fn retry_after_is_carried() {
        let err = ProviderError::rate_limited("slow down").with_retry_after(Duration::from_secs(7));
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn display_includes_provider() {
        let err = ProviderError::not_found("event abc").with_provider("google");
        assert_eq!(err.to_string(), "[google] not_found: event abc");
        assert!(!err.is_auth());
    }

    #[test]
    fn source_is_exposed() {
        use std::error::Error;
        let io_err = std::io::Error::other("disk full");
        let err = ProviderError::authentication("token file unreadable").with_source(io_err);
        assert!(err.source().is_some());
    }
}

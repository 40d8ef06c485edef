//! Access token refresh for Google APIs.
//!
//! The consent flow itself belongs to the external authorization helper.
//! This module only exchanges the stored refresh token for a fresh access
//! token when the current one expires or is rejected.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ProviderError, ProviderResult};

/// Google's token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// OAuth client credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthCredentials {
    /// Creates credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

/// Response from the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Refreshes access tokens.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Creates a client with the given request timeout.
    pub fn new(timeout: Duration) -> ProviderResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::configuration(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { http_client })
    }

    /// Exchanges `refresh_token` for a new access token.
    ///
    /// Returns the access token and its lifetime in seconds.
    pub async fn refresh_token(
        &self,
        token_uri: &str,
        credentials: &OAuthCredentials,
        refresh_token: &str,
    ) -> ProviderResult<(String, Option<i64>)> {
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        debug!(token_uri, "refreshing access token");
        let response = self
            .http_client
            .post(token_uri)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                ProviderError::network(format!("token refresh request failed: {}", e)).with_source(e)
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::network(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(refresh_error(status, &body));
        }

        let (token, expires_in) = parse_token_response(&body)?;
        info!("refreshed access token");
        Ok((token, expires_in))
    }
}

fn parse_token_response(body: &str) -> ProviderResult<(String, Option<i64>)> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::invalid_response(format!("invalid token response: {}", e)))?;
    Ok((response.access_token, response.expires_in))
}

/// A revoked or expired grant is an auth failure; an unavailable endpoint is not.
fn refresh_error(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("token refresh failed ({}): {}", status, body);
    if status.is_server_error() {
        ProviderError::server(message)
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::rate_limited(message)
    } else {
        ProviderError::authentication(message)
    }
    .with_provider("google")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderErrorCode;

    #[test]
    fn parses_token_response() {
        let (token, expires_in) = parse_token_response(
            r#"{"access_token": "ya29.new", "expires_in": 3599, "scope": "x", "token_type": "Bearer"}"#,
        )
        .unwrap();
        assert_eq!(token, "ya29.new");
        assert_eq!(expires_in, Some(3599));

        assert!(parse_token_response(r#"{"error": "invalid_grant"}"#).is_err());
    }

    #[test]
    fn classifies_refresh_failures() {
        let revoked = refresh_error(StatusCode::BAD_REQUEST, r#"{"error": "invalid_grant"}"#);
        assert!(revoked.is_auth());
        assert!(!revoked.is_retryable());

        let down = refresh_error(StatusCode::BAD_GATEWAY, "");
        assert_eq!(down.code(), ProviderErrorCode::ServerError);
        assert!(down.is_retryable());
    }
}

//! Google Calendar as a mirror target.
//!
//! This module implements the [`TargetCalendar`] trait for Google Calendar.

use std::future::Future;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use icsbridge_core::SyncWindow;

use crate::error::{ProviderError, ProviderErrorCode, ProviderResult};
use crate::mirror::MirrorEvent;
use crate::target::{BoxFuture, ManagedEvent, RemoteOutcome, TargetCalendar};

use super::client::{EventBody, GoogleCalendarClient, event_id_for};
use super::config::GoogleConfig;
use super::oauth::OAuthClient;
use super::tokens::TokenStorage;

/// Google Calendar target.
///
/// Holds the credential artifact in memory and refreshes the access token
/// when it expires or the API rejects it.
pub struct GoogleCalendar {
    client: GoogleCalendarClient,
    token_storage: TokenStorage,
    oauth_client: OAuthClient,
    /// Serializes refreshes so concurrent writes share one new token.
    refresh_lock: Mutex<()>,
}

impl GoogleCalendar {
    /// Creates the target, reading the credential artifact from
    /// `config.token_path`.
    pub fn new(config: GoogleConfig) -> ProviderResult<Self> {
        config.validate().map_err(ProviderError::configuration)?;
        let token_storage = TokenStorage::load(&config.token_path)?;
        Self::with_tokens(config, token_storage)
    }

    /// Creates the target with already-loaded credentials.
    pub fn with_tokens(config: GoogleConfig, token_storage: TokenStorage) -> ProviderResult<Self> {
        let oauth_client = OAuthClient::new(config.timeout)?;
        let client = GoogleCalendarClient::new(config)?;
        info!(
            calendar = %client.config().calendar_id,
            "google target ready"
        );
        Ok(Self {
            client,
            token_storage,
            oauth_client,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Returns a usable access token, refreshing first if it has expired.
    async fn access_token(&self) -> ProviderResult<String> {
        let tokens = self.token_storage.get().await;
        match tokens.token {
            Some(token) if !tokens.is_expired() => Ok(token),
            stale => self.refresh(stale.as_deref()).await,
        }
    }

    /// Refreshes the access token unless another task already replaced `stale`.
    async fn refresh(&self, stale: Option<&str>) -> ProviderResult<String> {
        let _guard = self.refresh_lock.lock().await;

        let tokens = self.token_storage.get().await;
        if let Some(current) = tokens.token.as_deref()
            && Some(current) != stale
            && !tokens.is_expired()
        {
            debug!("access token already refreshed by a concurrent request");
            return Ok(current.to_string());
        }

        let refresh_token = tokens.refresh_token.as_deref().ok_or_else(|| {
            ProviderError::authentication(
                "access token expired and no refresh token available; re-run the authorization helper",
            )
            .with_provider("google")
        })?;
        let credentials = tokens.credentials().ok_or_else(|| {
            ProviderError::authentication("credential file lacks client_id/client_secret for refresh")
                .with_provider("google")
        })?;

        let (access_token, expires_in) = self
            .oauth_client
            .refresh_token(&tokens.token_uri, &credentials, refresh_token)
            .await?;
        self.token_storage
            .update_access_token(access_token.clone(), expires_in)
            .await;
        Ok(access_token)
    }

    /// Runs `call` with an access token, refreshing once if it is rejected.
    async fn authorized<T, F, Fut>(&self, call: F) -> ProviderResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let token = self.access_token().await?;
        match call(token.clone()).await {
            Err(e) if e.code() == ProviderErrorCode::AuthenticationFailed => {
                warn!("access token rejected, refreshing");
                let fresh = self.refresh(Some(&token)).await?;
                call(fresh).await
            }
            other => other,
        }
    }
}

impl TargetCalendar for GoogleCalendar {
    fn name(&self) -> &str {
        "google"
    }

    fn create<'a>(&'a self, event: &'a MirrorEvent) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move {
            let body = EventBody::from_mirror(event);
            let body = &body;
            let event_id = event_id_for(&event.key);
            let event_id = event_id.as_str();
            self.authorized(|token| async move {
                self.client.insert_event(&token, event_id, body).await
            })
            .await
        })
    }

    fn update<'a>(
        &'a self,
        remote_id: &'a str,
        event: &'a MirrorEvent,
    ) -> BoxFuture<'a, ProviderResult<RemoteOutcome>> {
        Box::pin(async move {
            let body = EventBody::from_mirror(event);
            let body = &body;
            self.authorized(|token| async move {
                self.client.patch_event(&token, remote_id, body).await
            })
            .await
        })
    }

    fn delete<'a>(&'a self, remote_id: &'a str) -> BoxFuture<'a, ProviderResult<RemoteOutcome>> {
        Box::pin(async move {
            self.authorized(|token| async move { self.client.delete_event(&token, remote_id).await })
                .await
        })
    }

    fn list_managed(&self, window: SyncWindow) -> BoxFuture<'_, ProviderResult<Vec<ManagedEvent>>> {
        Box::pin(async move {
            self.authorized(|token| async move { self.client.list_managed(&token, window).await })
                .await
        })
    }
}

//! Google Calendar target implementation.
//!
//! This module provides a [`GoogleCalendar`] that writes mirrored busy
//! blocks through the Google Calendar API v3.
//!
//! # Credentials
//!
//! The target never runs a consent flow. It reads a credential artifact
//! (`token.json`, Google's authorized-user format) produced by an external
//! authorization helper, and refreshes the access token in memory when it
//! expires or the API answers 401.
//!
//! # Example
//!
//! ```ignore
//! use icsbridge_providers::google::{GoogleCalendar, GoogleConfig};
//!
//! let config = GoogleConfig::new("primary").with_token_path("/var/lib/icsbridge/token.json");
//! let target = GoogleCalendar::new(config)?;
//! ```

mod calendar;
mod client;
mod config;
mod oauth;
mod tokens;

pub use calendar::GoogleCalendar;
pub use client::{EventBody, EventTime, ExtendedProperties, GoogleCalendarClient};
pub use config::{CALENDAR_API_BASE, GoogleConfig};
pub use oauth::{GOOGLE_TOKEN_URL, OAuthClient, OAuthCredentials};
pub use tokens::{TokenInfo, TokenStorage};

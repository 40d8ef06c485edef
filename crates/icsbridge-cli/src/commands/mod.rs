//! Subcommand implementations.

pub mod config;
pub mod daemon;
pub mod sync;

use std::sync::Arc;
use std::time::Duration;

use icsbridge_providers::{FeedFetcher, TargetCalendar};
use icsbridge_server::{ShutdownHandle, StateStore, SyncService};
use tracing::info;

use crate::config::BridgeConfig;
use crate::error::CliResult;

/// Wires the feed, the target and the store described by `config`.
pub fn build_service(config: &BridgeConfig, shutdown: ShutdownHandle) -> CliResult<SyncService> {
    config.validate()?;

    let feed = FeedFetcher::new(
        config.feed_url()?,
        Duration::from_secs(config.feed.timeout_secs),
    )?;
    let target = build_target(config)?;
    let store = open_store(config);

    info!(
        feed = %feed.url(),
        calendar = target.name(),
        data_dir = %store.dir().display(),
        "service configured"
    );
    Ok(SyncService::new(Arc::new(feed), target, store, config.sync_options()).with_shutdown(shutdown))
}

#[cfg(feature = "google")]
fn build_target(config: &BridgeConfig) -> CliResult<Arc<dyn TargetCalendar>> {
    let calendar = icsbridge_providers::google::GoogleCalendar::new(config.google_config())?;
    Ok(Arc::new(calendar))
}

#[cfg(not(feature = "google"))]
fn build_target(_config: &BridgeConfig) -> CliResult<Arc<dyn TargetCalendar>> {
    Err(crate::error::CliError::config(
        "this build has no target calendar; rebuild with the `google` feature",
    ))
}

/// A store for commands that only read local files.
pub fn open_store(config: &BridgeConfig) -> StateStore {
    StateStore::new(config.data_dir()).with_history_cap(config.sync.history_cap)
}

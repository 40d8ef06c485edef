//! Reconciliation engine and daemon plumbing.
//!
//! This crate turns a feed and a target calendar into a running mirror:
//! - [`reconcile`]: plan, apply and settle one run
//! - [`SyncService`]: run lock, fetch, persistence, audit
//! - [`StateStore`]: atomic `state.json` and capped `history.json`
//! - [`Scheduler`]: periodic runs with jitter and failure backoff
//! - [`SignalHandler`] and [`PidFile`] for the daemon process
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use icsbridge_core::RunTrigger;
//! use icsbridge_providers::{InMemoryCalendar, StaticFeed};
//! use icsbridge_server::{StateStore, SyncOptions, SyncService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = SyncService::new(
//!         Arc::new(StaticFeed::new("BEGIN:VCALENDAR\nEND:VCALENDAR\n")),
//!         Arc::new(InMemoryCalendar::new()),
//!         StateStore::new("/tmp/icsbridge"),
//!         SyncOptions::default(),
//!     );
//!     let summary = service.run_once(RunTrigger::Manual).await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

mod error;
mod pidfile;
pub mod reconcile;
mod retry;
mod scheduler;
mod service;
mod signals;
mod store;

pub use error::{SyncError, SyncResult};
pub use pidfile::{PID_FILE, PidFile, default_pid_path};
pub use reconcile::{Action, Plan, RemoteView, Settlement, WindowExitPolicy};
pub use retry::RetryPolicy;
pub use scheduler::{
    Scheduler, SchedulerCommand, SchedulerConfig, SchedulerHandle, SchedulerState,
    SharedSchedulerState,
};
pub use service::{AuditReport, DryRun, SyncOptions, SyncService};
pub use signals::{RunNowRequests, ShutdownHandle, ShutdownSignal, Signal, SignalHandler};
pub use store::{DEFAULT_HISTORY_CAP, HISTORY_FILE, STATE_FILE, StateStore};

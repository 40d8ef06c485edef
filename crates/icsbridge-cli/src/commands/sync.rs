//! One-shot commands: `sync`, `plan`, `history`, `audit`.

use std::io::{self, Write};

use icsbridge_core::{ActionKind, RunSummary, RunTrigger};
use icsbridge_server::{
    AuditReport, DryRun, PidFile, ShutdownHandle, SignalHandler, default_pid_path,
};

use crate::commands::{build_service, open_store};
use crate::config::BridgeConfig;
use crate::error::CliResult;

/// Runs one sync and prints its summary.
///
/// Holds the PID file for the duration, so it refuses to run next to a
/// daemon using the same data directory.
pub async fn sync(config: &BridgeConfig) -> CliResult<()> {
    config.validate()?;
    let _pid_file = PidFile::create(default_pid_path(&config.data_dir()))?;

    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener()?;
    let service = build_service(config, signal_handler.shutdown_handle())?;

    let summary = service.run_once(RunTrigger::Manual).await?;
    write_summary(&mut io::stdout().lock(), &summary)?;
    Ok(())
}

/// Prints what a sync would do.
pub async fn plan(config: &BridgeConfig) -> CliResult<()> {
    let service = build_service(config, ShutdownHandle::detached())?;
    let dry = service.plan_only().await?;
    write_plan(&mut io::stdout().lock(), &dry)?;
    Ok(())
}

/// Prints past runs.
pub fn history(config: &BridgeConfig, limit: usize, json: bool) -> CliResult<()> {
    let runs = open_store(config).history(limit);
    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &runs)?;
        writeln!(out)?;
    } else if runs.is_empty() {
        writeln!(out, "No runs recorded yet.")?;
    } else {
        for run in &runs {
            write_history_line(&mut out, run)?;
        }
    }
    Ok(())
}

/// Prints the drift between the target and the state.
pub async fn audit(config: &BridgeConfig, json: bool) -> CliResult<()> {
    let service = build_service(config, ShutdownHandle::detached())?;
    let report = service.audit().await?;
    let mut out = io::stdout().lock();
    if json {
        serde_json::to_writer_pretty(&mut out, &report)?;
        writeln!(out)?;
    } else {
        write_audit(&mut out, &report)?;
    }
    Ok(())
}

fn write_summary(out: &mut impl Write, summary: &RunSummary) -> io::Result<()> {
    writeln!(out, "{}", summary)?;
    for error in &summary.errors {
        writeln!(out, "  {} {}: {}", error.action, error.key, error.message)?;
    }
    Ok(())
}

fn write_plan(out: &mut impl Write, dry: &DryRun) -> io::Result<()> {
    let plan = &dry.plan;
    writeln!(
        out,
        "window {} .. {}: {} occurrences, {} skipped",
        dry.window.start.format("%Y-%m-%d %H:%M"),
        dry.window.end.format("%Y-%m-%d %H:%M"),
        plan.in_window,
        dry.skipped
    )?;
    if plan.profile_changed {
        writeln!(out, "rendering changed: every mirrored event will be rewritten")?;
    }
    if plan.drifted > 0 {
        writeln!(out, "{} mirrored events were edited or deleted remotely and will be restored", plan.drifted)?;
    }
    for action in &plan.actions {
        writeln!(out, "  {}", action)?;
    }
    for key in &plan.forget {
        writeln!(out, "  forget {}", key)?;
    }
    writeln!(
        out,
        "{} to create, {} to update, {} to delete, {} to forget, {} unchanged",
        plan.count(ActionKind::Create),
        plan.count(ActionKind::Update),
        plan.count(ActionKind::Delete),
        plan.forget.len(),
        plan.unchanged
    )
}

fn write_history_line(out: &mut impl Write, run: &RunSummary) -> io::Result<()> {
    let trigger = match run.trigger {
        RunTrigger::Scheduled => "scheduled",
        RunTrigger::Manual => "manual",
        RunTrigger::Signal => "signal",
    };
    writeln!(
        out,
        "{}  {:<9}  {}",
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        trigger,
        run
    )
}

fn write_audit(out: &mut impl Write, report: &AuditReport) -> io::Result<()> {
    writeln!(
        out,
        "{} managed events on the calendar, {} tracked in state",
        report.remote_managed, report.tracked
    )?;
    if report.is_clean() {
        return writeln!(out, "No drift found.");
    }
    if !report.untracked.is_empty() {
        writeln!(out, "Managed events not tracked in state:")?;
        for event in &report.untracked {
            let key = event.key.as_ref().map_or("(no key)", |k| k.as_str());
            writeln!(out, "  {}  {}  \"{}\"", event.remote_id, key, event.summary)?;
        }
    }
    if !report.missing.is_empty() {
        writeln!(out, "Tracked events missing from the calendar:")?;
        for record in &report.missing {
            writeln!(out, "  {}  {}", record.remote_id, record.key)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use icsbridge_core::StableKey;

    #[test]
    fn summary_lists_errors() {
        let at = Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap();
        let mut summary = RunSummary::start(RunTrigger::Manual, at);
        summary.created = 2;
        summary.record_error(
            StableKey::from_raw("lesson@school|2025-03-04T09:00:00Z"),
            ActionKind::Update,
            "server error",
        );
        summary.complete(at);

        let mut out = Vec::new();
        write_summary(&mut out, &summary).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("update lesson@school|2025-03-04T09:00:00Z: server error"));
    }

    #[test]
    fn history_line_shows_status() {
        let at = Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap();
        let mut run = RunSummary::start(RunTrigger::Signal, at);
        run.abort(at, "feed unreachable");

        let mut out = Vec::new();
        write_history_line(&mut out, &run).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("2025-03-03 08:00:00  signal"));
        assert!(text.contains("aborted"));
    }
}

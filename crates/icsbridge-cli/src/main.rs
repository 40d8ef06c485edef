//! icsbridge CLI entry point.

use std::process::ExitCode;

use clap::Parser;
use icsbridge_core::{TracingConfig, init_tracing};

use icsbridge_cli::cli::{Cli, Command, ConfigAction};
use icsbridge_cli::commands;
use icsbridge_cli::config::BridgeConfig;
use icsbridge_cli::error::CliResult;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = if cli.debug {
        TracingConfig::cli_debug()
    } else if cli.command.is_daemon() {
        TracingConfig::daemon()
    } else {
        TracingConfig::default().with_level(tracing::Level::WARN)
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("warning: logging disabled: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let source = cli.config.as_deref();
    let config = BridgeConfig::load(source)?;

    match cli.command {
        Command::Daemon => commands::daemon::run(&config).await,
        Command::Sync => commands::sync::sync(&config).await,
        Command::Plan => commands::sync::plan(&config).await,
        Command::History { limit, json } => commands::sync::history(&config, limit, json),
        Command::Audit { json } => commands::sync::audit(&config, json).await,
        Command::Config { action } => match action {
            ConfigAction::Dump => commands::config::dump(&config, source),
            ConfigAction::Validate => commands::config::validate(&config),
            ConfigAction::Path => commands::config::path(&config, source),
        },
    }
}

//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// icsbridge - mirror an ICS feed into Google Calendar as busy blocks
#[derive(Debug, Parser)]
#[command(name = "icsbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, global = true, env = "ICSBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run in the foreground, syncing on a schedule
    ///
    /// SIGHUP requests an immediate sync; SIGTERM and SIGINT stop the daemon
    /// without saving a half-applied run.
    Daemon,

    /// Run one sync now
    Sync,

    /// Show what a sync would change, without changing anything
    Plan,

    /// Show past runs, newest first
    History {
        /// Number of runs to show
        #[arg(long, short = 'n', default_value_t = 10)]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare managed remote events with the sync state
    Audit {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

impl Command {
    /// Long-running commands log as JSON.
    pub fn is_daemon(&self) -> bool {
        matches!(self, Self::Daemon)
    }
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file and environment merged)
    Dump,

    /// Validate the effective configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_history_flags() {
        let cli = Cli::try_parse_from(["icsbridge", "history", "-n", "3", "--json"]).unwrap();
        match cli.command {
            Command::History { limit, json } => {
                assert_eq!(limit, 3);
                assert!(json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["icsbridge", "sync", "--config", "/etc/icsbridge.toml", "-v"])
                .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/icsbridge.toml")));
        assert!(matches!(cli.command, Command::Sync));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["icsbridge"]).is_err());
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

//! icsbridge command-line interface
//!
//! This crate provides the `icsbridge` binary: configuration loading and the
//! `daemon`, `sync`, `plan`, `history`, `audit` and `config` subcommands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use cli::Cli;
pub use error::{CliError, CliResult};

//! Configuration commands.

use std::path::Path;

use crate::config::BridgeConfig;
use crate::error::{CliError, CliResult};

/// Prints the effective configuration as TOML.
pub fn dump(config: &BridgeConfig, source: Option<&Path>) -> CliResult<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| CliError::config(format!("failed to serialize config: {}", e)))?;
    let path = source.map_or_else(BridgeConfig::default_path, Path::to_path_buf);
    println!("# {} (with environment overrides)", path.display());
    println!("{}", toml_str);
    Ok(())
}

/// Validates the effective configuration.
pub fn validate(config: &BridgeConfig) -> CliResult<()> {
    config.validate()?;

    let token_path = config.token_path();
    if !token_path.exists() {
        return Err(CliError::config(format!(
            "credential file {} does not exist",
            token_path.display()
        )));
    }

    println!("Configuration is valid.");
    Ok(())
}

/// Shows the configuration and data paths.
pub fn path(config: &BridgeConfig, source: Option<&Path>) -> CliResult<()> {
    let config_path = source.map_or_else(BridgeConfig::default_path, Path::to_path_buf);
    println!("config: {}", config_path.display());
    println!("data:   {}", config.data_dir().display());
    println!("token:  {}", config.token_path().display());
    Ok(())
}

use agentrelay_core::config::AppConfig;
use dotenvy::dotenv;
use eyre::{Result, eyre};
use tracing::debug;

use super::Cli;

pub fn load_env() -> Result<()> {
    dotenv().ok();
    Ok(())
}

/// Configuration file (or defaults) with the command-line flags applied on top.
pub fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .map_err(|e| eyre!("Failed to load configuration: {}", e))?;

    cli.apply_overrides(&mut config);
    debug!(?config, "Resolved configuration");
    Ok(config)
}

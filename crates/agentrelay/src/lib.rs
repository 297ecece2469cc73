pub mod cli;
pub mod commands;
pub mod error;

pub use agentrelay_core::{api, config, run, runtime, session, utils};

use agentrelay_core::AppContext;
use eyre::{Result, eyre};

use crate::cli::Cli;

/// Build the application context the way every subcommand needs it.
pub async fn build_context(cli: &Cli) -> Result<AppContext> {
    let config = cli::config::load_config(cli)?;
    AppContext::new(config)
        .await
        .map_err(|e| eyre!("Failed to open session store: {}", e))
}

use agentrelay_core::api::BackendClient;
use eyre::{Result, eyre};

use super::write_settings;

pub async fn show_settings(backend: &BackendClient) -> Result<()> {
    let settings = backend
        .deepseek_settings()
        .await
        .map_err(|e| eyre!("Failed to read settings: {}", e))?;

    write_settings(&mut std::io::stdout(), &settings)?;
    Ok(())
}

use std::io::Write;

use agentrelay_core::api::BackendClient;
use eyre::{Result, eyre};

use super::write_settings;

pub async fn reset_settings(backend: &BackendClient) -> Result<()> {
    let settings = backend
        .reset_deepseek_settings()
        .await
        .map_err(|e| eyre!("Failed to reset settings: {}", e))?;

    let mut stdout = std::io::stdout();
    writeln!(stdout, "Settings reset.")?;
    write_settings(&mut stdout, &settings)?;
    Ok(())
}

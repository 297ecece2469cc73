use std::io::Write;

use agentrelay_core::api::{BackendClient, DeepSeekSettings, DeepSeekSettingsPayload};
use eyre::{Result, bail, eyre};

use super::write_settings;

/// The worker replaces both fields on every save, so anything not being
/// changed is carried over from its current settings.
pub fn merged_payload(
    current: &DeepSeekSettings,
    api_key: Option<String>,
    base_url: Option<String>,
) -> DeepSeekSettingsPayload {
    DeepSeekSettingsPayload {
        api_key: api_key.or_else(|| current.api_key.clone()),
        base_url: Some(base_url.unwrap_or_else(|| current.base_url.clone())),
    }
}

pub async fn set_settings(
    backend: &BackendClient,
    api_key: Option<String>,
    base_url: Option<String>,
) -> Result<()> {
    if api_key.is_none() && base_url.is_none() {
        bail!("Nothing to update; pass --api-key and/or --base-url");
    }

    let current = backend
        .deepseek_settings()
        .await
        .map_err(|e| eyre!("Failed to read settings: {}", e))?;
    let payload = merged_payload(&current, api_key, base_url);

    let saved = backend
        .save_deepseek_settings(&payload)
        .await
        .map_err(|e| eyre!("Failed to save settings: {}", e))?;

    let mut stdout = std::io::stdout();
    writeln!(stdout, "Settings saved.")?;
    write_settings(&mut stdout, &saved)?;
    Ok(())
}

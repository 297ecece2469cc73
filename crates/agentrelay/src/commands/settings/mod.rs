use std::io::Write;
use std::time::Duration;

use agentrelay_core::AppContext;
use agentrelay_core::api::DeepSeekSettings;
use async_trait::async_trait;
use eyre::Result;

use super::{Command, with_worker};
use crate::cli::SettingsCommands;

mod reset;
mod set;
mod show;

pub use reset::reset_settings;
pub use set::{merged_payload, set_settings};
pub use show::show_settings;

pub struct SettingsCommand {
    pub action: SettingsCommands,
    pub ctx: AppContext,
    pub ready_timeout: Duration,
}

#[async_trait]
impl Command for SettingsCommand {
    async fn execute(&self) -> Result<()> {
        let action = self.action.clone();
        with_worker(&self.ctx, self.ready_timeout, |backend| async move {
            match action {
                SettingsCommands::Show => show_settings(&backend).await,
                SettingsCommands::Set { api_key, base_url } => {
                    set_settings(&backend, api_key, base_url).await
                }
                SettingsCommands::Reset => reset_settings(&backend).await,
            }
        })
        .await
    }
}

/// Keep only the tail of a key so it can be recognised without being leaked.
fn mask_key(key: &str) -> String {
    let count = key.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = key.chars().skip(count - 4).collect();
    format!("****{tail}")
}

fn write_settings(out: &mut impl Write, settings: &DeepSeekSettings) -> std::io::Result<()> {
    writeln!(out, "Base URL: {}", settings.base_url)?;
    match (&settings.api_key, settings.api_key_set) {
        (Some(key), true) => writeln!(out, "API key: {}", mask_key(key)),
        (None, true) => writeln!(out, "API key: set"),
        (_, false) => writeln!(out, "API key: not set"),
    }
}

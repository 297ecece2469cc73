use std::io::Write;
use std::time::Duration;

use agentrelay_core::AppContext;
use agentrelay_core::api::ServiceStatus;
use async_trait::async_trait;
use eyre::{Result, eyre};

use super::{Command, with_worker};

pub struct StatusCommand {
    pub ctx: AppContext,
    pub ready_timeout: Duration,
    pub json: bool,
}

#[async_trait]
impl Command for StatusCommand {
    async fn execute(&self) -> Result<()> {
        let status = with_worker(&self.ctx, self.ready_timeout, |backend| async move {
            backend
                .status()
                .await
                .map_err(|e| eyre!("Failed to query worker status: {}", e))
        })
        .await?;

        let mut stdout = std::io::stdout();
        if self.json {
            writeln!(stdout, "{}", serde_json::to_string_pretty(&status)?)?;
        } else {
            write_status(&mut stdout, &status)?;
        }
        Ok(())
    }
}

fn write_status(out: &mut impl Write, status: &ServiceStatus) -> std::io::Result<()> {
    writeln!(out, "Service: {} {}", status.service, status.version)?;
    if let Some(protocol) = &status.protocol_version {
        writeln!(out, "Protocol: {protocol}")?;
    }
    if let Some(started_at) = &status.started_at {
        writeln!(out, "Started: {started_at}")?;
    }
    if let Some(max) = status.max_concurrent_runs {
        writeln!(out, "Max concurrent runs: {max}")?;
    }
    writeln!(
        out,
        "Offline mode: {}",
        if status.metadata.offline_mode { "yes" } else { "no" }
    )?;
    match &status.metadata.deepseek {
        Some(deepseek) => {
            writeln!(out, "DeepSeek base URL: {}", deepseek.base_url)?;
            writeln!(
                out,
                "DeepSeek API key: {}",
                if deepseek.api_key_set { "set" } else { "not set" }
            )?;
            if let Some(model) = &deepseek.model {
                writeln!(out, "DeepSeek model: {model}")?;
            }
        }
        None => writeln!(out, "DeepSeek: not reported")?,
    }
    Ok(())
}

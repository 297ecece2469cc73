use std::io::Write;

use agentrelay_core::AppContext;
use async_trait::async_trait;
use eyre::{Result, eyre};

use super::super::Command;
use super::resolve_session;

pub struct RenameSessionCommand {
    pub session_id: String,
    pub title: String,
    pub ctx: AppContext,
}

#[async_trait]
impl Command for RenameSessionCommand {
    async fn execute(&self) -> Result<()> {
        let session = resolve_session(self.ctx.store(), &self.session_id).await?;

        let renamed = self
            .ctx
            .store()
            .rename_session(&session.id, self.title.clone())
            .await
            .map_err(|e| eyre!("Failed to rename session: {}", e))?;
        if !renamed {
            return Err(eyre!("Session {} disappeared before it could be renamed", session.id));
        }

        let mut stdout = std::io::stdout();
        writeln!(stdout, "Renamed session {} to '{}'", session.id, self.title)?;
        Ok(())
    }
}

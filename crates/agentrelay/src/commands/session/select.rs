use std::io::Write;

use agentrelay_core::AppContext;
use async_trait::async_trait;
use eyre::{Result, eyre};

use super::super::Command;
use super::resolve_session;

pub struct SelectSessionCommand {
    pub session_id: String,
    pub ctx: AppContext,
}

#[async_trait]
impl Command for SelectSessionCommand {
    async fn execute(&self) -> Result<()> {
        let session = resolve_session(self.ctx.store(), &self.session_id).await?;

        self.ctx
            .store()
            .set_active_session(Some(session.id.clone()))
            .await
            .map_err(|e| eyre!("Failed to update active session: {}", e))?;

        let mut stdout = std::io::stdout();
        writeln!(stdout, "Active session: {} ({})", session.id, session.title)?;
        Ok(())
    }
}

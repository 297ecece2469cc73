use std::io::{self, Write};

use agentrelay_core::AppContext;
use async_trait::async_trait;
use eyre::{Result, eyre};

use super::super::Command;
use super::resolve_session;

fn confirm_prompt(prompt: &str) -> Result<bool> {
    let mut stdout = io::stdout();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(input.trim().to_lowercase().starts_with('y'))
}

pub struct DeleteSessionCommand {
    pub session_id: String,
    pub force: bool,
    pub ctx: AppContext,
}

#[async_trait]
impl Command for DeleteSessionCommand {
    async fn execute(&self) -> Result<()> {
        let session = resolve_session(self.ctx.store(), &self.session_id).await?;

        if !self.force
            && !confirm_prompt(&format!(
                "Are you sure you want to delete session {} ({})? (y/N): ",
                session.id, session.title
            ))?
        {
            let mut stdout = io::stdout();
            writeln!(stdout, "Deletion cancelled.")?;
            return Ok(());
        }

        self.ctx
            .store()
            .delete_session(&session.id)
            .await
            .map_err(|e| eyre!("Failed to delete session: {}", e))?;

        let mut stdout = io::stdout();
        writeln!(stdout, "Session {} deleted.", session.id)?;
        Ok(())
    }
}

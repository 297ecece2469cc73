use std::io::Write;

use agentrelay_core::AppContext;
use agentrelay_core::session::Session;
use async_trait::async_trait;
use eyre::{Result, eyre};

use super::super::Command;

pub struct CreateSessionCommand {
    pub title: String,
    pub ctx: AppContext,
}

#[async_trait]
impl Command for CreateSessionCommand {
    async fn execute(&self) -> Result<()> {
        let session = Session::new(self.title.clone());
        let id = session.id.clone();

        self.ctx
            .store()
            .create_session(session)
            .await
            .map_err(|e| eyre!("Failed to create session: {}", e))?;

        let mut stdout = std::io::stdout();
        writeln!(stdout, "Created session: {id}")?;
        Ok(())
    }
}

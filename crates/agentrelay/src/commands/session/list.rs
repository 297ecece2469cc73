use std::io::Write;

use agentrelay_core::AppContext;
use async_trait::async_trait;
use eyre::Result;

use super::super::{Command, format_timestamp};

pub struct ListSessionCommand {
    pub ctx: AppContext,
}

#[async_trait]
impl Command for ListSessionCommand {
    async fn execute(&self) -> Result<()> {
        let document = self.ctx.store().get_all().await;

        let mut stdout = std::io::stdout();
        if document.sessions.is_empty() {
            writeln!(stdout, "No sessions found.")?;
            return Ok(());
        }

        writeln!(stdout, "Sessions:")?;
        writeln!(
            stdout,
            "  {:<36} {:<20} {:<20} {:<10} {:<30}",
            "ID", "Created", "Updated", "Messages", "Title"
        )?;
        writeln!(stdout, "{}", "-".repeat(122))?;

        for session in &document.sessions {
            let marker = if document.active_session_id.as_ref() == Some(&session.id) {
                '*'
            } else {
                ' '
            };
            writeln!(
                stdout,
                "{} {:<36} {:<20} {:<20} {:<10} {:<30}",
                marker,
                session.id.as_str(),
                format_timestamp(session.created_at),
                format_timestamp(session.updated_at),
                session.messages.len(),
                session.title,
            )?;
        }

        Ok(())
    }
}

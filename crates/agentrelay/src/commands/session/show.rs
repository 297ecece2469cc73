use std::io::Write;

use agentrelay_core::AppContext;
use async_trait::async_trait;
use eyre::Result;

use super::super::{Command, format_timestamp};
use super::resolve_session;

pub struct ShowSessionCommand {
    pub session_id: String,
    pub ctx: AppContext,
}

#[async_trait]
impl Command for ShowSessionCommand {
    async fn execute(&self) -> Result<()> {
        let session = resolve_session(self.ctx.store(), &self.session_id).await?;
        let active = self.ctx.store().active_session_id().await.as_ref() == Some(&session.id);

        let mut stdout = std::io::stdout();
        writeln!(stdout, "Session: {}", session.id)?;
        writeln!(stdout, "Title: {}", session.title)?;
        writeln!(stdout, "Active: {}", if active { "yes" } else { "no" })?;
        writeln!(stdout, "Created: {}", format_timestamp(session.created_at))?;
        writeln!(stdout, "Updated: {}", format_timestamp(session.updated_at))?;
        writeln!(stdout, "Messages: {}", session.messages.len())?;

        for message in &session.messages {
            writeln!(stdout)?;
            let mut header = format!("[{}] {}", message.role, format_timestamp(message.created_at));
            if message.is_streaming {
                header.push_str(" (streaming)");
            }
            writeln!(stdout, "{header}")?;
            if !message.content.is_empty() {
                writeln!(stdout, "{}", message.content)?;
            }
            if let Some(error) = &message.error {
                writeln!(stdout, "error: {error}")?;
            }
        }

        Ok(())
    }
}

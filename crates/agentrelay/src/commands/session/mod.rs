use agentrelay_core::AppContext;
use agentrelay_core::session::{Session, SessionStore};
use async_trait::async_trait;
use eyre::Result;

use super::Command;
use crate::cli::SessionCommands;
use crate::error::Error;

mod create;
mod delete;
mod list;
mod rename;
mod select;
mod show;

pub use create::CreateSessionCommand;
pub use delete::DeleteSessionCommand;
pub use list::ListSessionCommand;
pub use rename::RenameSessionCommand;
pub use select::SelectSessionCommand;
pub use show::ShowSessionCommand;

pub struct SessionCommand {
    pub command: SessionCommands,
    pub ctx: AppContext,
}

#[async_trait]
impl Command for SessionCommand {
    async fn execute(&self) -> Result<()> {
        let ctx = self.ctx.clone();
        let result = match &self.command {
            SessionCommands::List => ListSessionCommand { ctx }.execute().await,
            SessionCommands::Create { title } => {
                CreateSessionCommand {
                    title: title.clone(),
                    ctx,
                }
                .execute()
                .await
            }
            SessionCommands::Show { session_id } => {
                ShowSessionCommand {
                    session_id: session_id.clone(),
                    ctx,
                }
                .execute()
                .await
            }
            SessionCommands::Rename { session_id, title } => {
                RenameSessionCommand {
                    session_id: session_id.clone(),
                    title: title.clone(),
                    ctx,
                }
                .execute()
                .await
            }
            SessionCommands::Select { session_id } => {
                SelectSessionCommand {
                    session_id: session_id.clone(),
                    ctx,
                }
                .execute()
                .await
            }
            SessionCommands::Delete { session_id, force } => {
                DeleteSessionCommand {
                    session_id: session_id.clone(),
                    force: *force,
                    ctx,
                }
                .execute()
                .await
            }
        };

        self.ctx.store().flush().await?;
        result
    }
}

/// Find a session by full id or by a prefix that matches exactly one session.
pub async fn resolve_session(store: &SessionStore, id: &str) -> Result<Session, Error> {
    let document = store.get_all().await;
    if let Some(session) = document.sessions.iter().find(|s| s.id.as_str() == id) {
        return Ok(session.clone());
    }

    let mut matches = document
        .sessions
        .into_iter()
        .filter(|s| !id.is_empty() && s.id.as_str().starts_with(id));
    match (matches.next(), matches.next()) {
        (Some(session), None) => Ok(session),
        (None, _) => Err(Error::UnknownSession(id.to_string())),
        (Some(_), Some(_)) => Err(Error::AmbiguousSession {
            prefix: id.to_string(),
            count: 2 + matches.count(),
        }),
    }
}

use std::io::{self, Write};
use std::time::Duration;

use agentrelay_core::AppContext;
use agentrelay_core::run::{RunId, RunStatus, RunUpdate};
use agentrelay_core::session::{Session, SessionId};
use async_trait::async_trait;
use eyre::{Result, eyre};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::session::resolve_session;
use super::{Command, with_worker};
use crate::error::Error;

const TITLE_CHARS: usize = 40;

pub struct SendCommand {
    pub ctx: AppContext,
    pub prompt: String,
    pub session: Option<String>,
    pub new_session: bool,
    pub json: bool,
    pub ready_timeout: Duration,
}

/// Title for a session started from a prompt: its first line, shortened.
pub fn title_from_prompt(prompt: &str) -> String {
    let line = prompt.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.is_empty() {
        return "New chat".to_string();
    }
    if line.chars().count() <= TITLE_CHARS {
        return line.to_string();
    }
    let mut title: String = line.chars().take(TITLE_CHARS).collect();
    title.push('…');
    title
}

impl SendCommand {
    async fn target_session(&self) -> Result<SessionId> {
        let store = self.ctx.store();
        if let Some(id) = &self.session {
            let session = resolve_session(store, id).await?;
            store.set_active_session(Some(session.id.clone())).await?;
            return Ok(session.id);
        }

        if !self.new_session
            && let Some(active) = store.active_session_id().await
            && store.session(&active).await.is_some()
        {
            return Ok(active);
        }

        let session = Session::new(title_from_prompt(&self.prompt));
        let id = session.id.clone();
        store.create_session(session).await?;
        info!(session_id = %id, "Started a new session");
        Ok(id)
    }

    fn render(&self, update: &RunUpdate) -> Result<()> {
        let mut stdout = io::stdout();
        if self.json {
            writeln!(stdout, "{}", serde_json::to_string(update)?)?;
            return Ok(());
        }

        match update {
            RunUpdate::Delta { text, .. } => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            RunUpdate::Status {
                status,
                persist_error,
                ..
            } if status.is_terminal() => {
                writeln!(stdout)?;
                let mut stderr = io::stderr();
                if *status == RunStatus::Cancelled {
                    writeln!(stderr, "(cancelled)")?;
                }
                if let Some(err) = persist_error {
                    writeln!(stderr, "(not saved: {err})")?;
                }
            }
            RunUpdate::Status { .. } => {}
        }
        Ok(())
    }

    /// Print this run's updates until it finishes, returning its terminal
    /// update. The first Ctrl+C asks for cancellation; the run still ends
    /// through its usual terminal update.
    async fn follow(
        &self,
        run_id: &RunId,
        updates: &mut broadcast::Receiver<RunUpdate>,
    ) -> Result<RunUpdate> {
        let mut cancel_requested = false;

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c(), if !cancel_requested => {
                    result?;
                    cancel_requested = true;
                    info!(%run_id, "Interrupted, cancelling run");
                    self.ctx.runs().cancel_run(run_id).await?;
                }
                update = updates.recv() => match update {
                    Ok(update) if update.run_id() == run_id => {
                        self.render(&update)?;
                        if let RunUpdate::Status { status, .. } = &update
                            && status.is_terminal()
                        {
                            return Ok(update);
                        }
                    }
                    Ok(other) => {
                        debug!(run_id = %other.run_id(), "Ignoring update for another run");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Output fell behind the run; some text was not printed");
                    }
                    Err(RecvError::Closed) => {
                        return Err(eyre!("Run updates closed before run {} finished", run_id));
                    }
                },
            }
        }
    }
}

#[async_trait]
impl Command for SendCommand {
    async fn execute(&self) -> Result<()> {
        let session_id = self.target_session().await?;

        let finished = with_worker(&self.ctx, self.ready_timeout, |_backend| async move {
            let mut updates = self.ctx.runs().subscribe();
            let run = self
                .ctx
                .runs()
                .send_message(&session_id, &self.prompt)
                .await?;
            debug!(run_id = %run.run_id, %session_id, "Run submitted");
            self.follow(&run.run_id, &mut updates).await
        })
        .await?;

        outcome(finished)
    }
}

/// Exit status for a finished run: failures and unsaved replies are errors.
fn outcome(finished: RunUpdate) -> Result<()> {
    let RunUpdate::Status {
        status,
        error,
        persist_error,
        ..
    } = finished
    else {
        return Ok(());
    };
    if status == RunStatus::Failed {
        return Err(Error::RunFailed(error.unwrap_or_default()).into());
    }
    match persist_error {
        Some(err) => Err(Error::NotSaved(err).into()),
        None => Ok(()),
    }
}

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::RunError;
use super::state::{RunId, RunState, RunStatus};
use crate::api::{
    ApiError, BackendClient, Constraints, ConversationMessage, CreateRunRequest, RunEvent,
    RunEventKind, RunEventStream,
};
use crate::config::RunsConfig;
use crate::runtime::RuntimeStatus;
use crate::session::{Message, MessageId, MessagePatch, SessionId, SessionStore};

const UPDATE_CHANNEL_CAPACITY: usize = 1024;
pub const STREAM_CLOSED_MESSAGE: &str = "Event stream closed before the run finished";

/// Progress notifications for shells rendering runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunUpdate {
    Delta {
        session_id: SessionId,
        run_id: RunId,
        text: String,
    },
    Status {
        session_id: SessionId,
        run_id: RunId,
        message_id: MessageId,
        status: RunStatus,
        error: Option<String>,
        /// Set on a terminal update when the final state could not be saved.
        #[serde(skip_serializing_if = "Option::is_none")]
        persist_error: Option<String>,
    },
}

impl RunUpdate {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Delta { run_id, .. } | Self::Status { run_id, .. } => run_id,
        }
    }
}

struct ActiveRun {
    state: RunState,
    cancel: CancellationToken,
}

struct Inner {
    store: SessionStore,
    runtime: watch::Receiver<RuntimeStatus>,
    defaults: RunsConfig,
    runs: Mutex<HashMap<SessionId, ActiveRun>>,
    backend: std::sync::Mutex<Option<BackendClient>>,
    updates: broadcast::Sender<RunUpdate>,
}

/// Drives streamed runs against the worker, at most one per session.
///
/// Message content only ever changes through [`SessionStore::update_message`].
#[derive(Clone)]
pub struct RunClient {
    inner: Arc<Inner>,
}

impl RunClient {
    pub fn new(
        store: SessionStore,
        runtime: watch::Receiver<RuntimeStatus>,
        defaults: RunsConfig,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                runtime,
                defaults,
                runs: Mutex::new(HashMap::new()),
                backend: std::sync::Mutex::new(None),
                updates,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunUpdate> {
        self.inner.updates.subscribe()
    }

    pub async fn active_run(&self, session_id: &SessionId) -> Option<RunState> {
        self.inner
            .runs
            .lock()
            .await
            .get(session_id)
            .map(|run| run.state.clone())
    }

    /// Constraints used when a caller does not supply any.
    pub fn default_constraints(&self) -> Constraints {
        Constraints {
            temperature: self.inner.defaults.temperature,
            ..Constraints::default()
        }
    }

    /// Client for the worker's current address, or `None` before readiness.
    fn backend(&self) -> Result<Option<BackendClient>, ApiError> {
        let status = self.inner.runtime.borrow().clone();
        let Some((host, port)) = status.address() else {
            return Ok(None);
        };

        let mut cached = self
            .inner
            .backend
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let expected = format!("http://{host}:{port}");
        if let Some(client) = cached.as_ref().filter(|c| c.base_url() == expected) {
            return Ok(Some(client.clone()));
        }
        let client = BackendClient::new(host, port)?;
        *cached = Some(client.clone());
        Ok(Some(client))
    }

    /// Append the user's text and an assistant placeholder, then stream the reply into it.
    ///
    /// A run still open for the session is cancelled first. The history sent
    /// along holds every finalized message with text and no error, so a
    /// cancelled partial reply counts the same whether it was cancelled
    /// explicitly or by this call.
    pub async fn send_message(
        &self,
        session_id: &SessionId,
        text: &str,
    ) -> Result<RunState, RunError> {
        self.cancel_session(session_id).await?;

        let session = self
            .inner
            .store
            .session(session_id)
            .await
            .ok_or_else(|| RunError::UnknownSession(session_id.clone()))?;

        let mut conversation: Vec<ConversationMessage> = session
            .messages
            .iter()
            .filter(|m| !m.is_streaming && m.error.is_none() && !m.content.is_empty())
            .map(|m| ConversationMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();

        let user = Message::user(text);
        conversation.push(ConversationMessage {
            role: user.role,
            content: user.content.clone(),
        });
        self.inner.store.append_message(session_id, user).await?;

        let placeholder = Message::streaming_placeholder();
        let message_id = placeholder.id.clone();
        self.inner
            .store
            .append_message(session_id, placeholder)
            .await?;

        self.submit_run(session_id, &message_id, conversation, None)
            .await
    }

    /// Start a run that streams into an existing placeholder message.
    ///
    /// Any run already open for the session is closed first and its message
    /// finalized as cancelled. On failure the placeholder is marked failed.
    pub async fn submit_run(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
        conversation: Vec<ConversationMessage>,
        constraints: Option<Constraints>,
    ) -> Result<RunState, RunError> {
        let backend = match self.backend() {
            Ok(Some(backend)) => backend,
            Ok(None) => {
                self.mark_failed(session_id, message_id, &RunError::NotReady)
                    .await?;
                return Err(RunError::NotReady);
            }
            Err(e) => {
                let err = RunError::from_api(e);
                self.mark_failed(session_id, message_id, &err).await?;
                return Err(err);
            }
        };

        let run_id = RunId::new();
        let mut state = RunState::new(run_id.clone(), session_id.clone(), message_id.clone());
        let cancel = CancellationToken::new();

        {
            let mut runs = self.inner.runs.lock().await;
            if let Some(previous) = runs.remove(session_id) {
                self.supersede(previous, &backend).await;
            }
            self.inner
                .store
                .update_message(session_id, message_id, MessagePatch::streaming(""))
                .await?;
            runs.insert(
                session_id.clone(),
                ActiveRun {
                    state: state.clone(),
                    cancel: cancel.clone(),
                },
            );
        }
        self.publish_status(&state, None);

        let request = CreateRunRequest {
            run_id: run_id.to_string(),
            agent_id: self.inner.defaults.agent_id.clone(),
            prompt: self.inner.defaults.system_prompt.clone(),
            conversation,
            constraints: constraints.unwrap_or_else(|| self.default_constraints()),
        };

        let stream = match open_run(&backend, &request).await {
            Ok(stream) => stream,
            Err(e) => {
                let err = RunError::from_api(e);
                warn!(target: "agentrelay::run", %run_id, error = %err, "Run could not be started");
                self.finish(session_id, &run_id, |s| s.fail(err.to_string()))
                    .await;
                return Err(err);
            }
        };

        {
            let mut runs = self.inner.runs.lock().await;
            match runs.get_mut(session_id) {
                Some(active) if active.state.run_id == run_id => {
                    active.state.begin_streaming();
                    state = active.state.clone();
                }
                // Cancelled or superseded while the stream was opening.
                _ => {
                    debug!(target: "agentrelay::run", %run_id, "Run finished before its stream opened");
                    return Ok(state);
                }
            }
        }
        self.publish_status(&state, None);

        info!(target: "agentrelay::run", %run_id, session_id = %session_id, "Run streaming");

        let client = self.clone();
        let pump_session = session_id.clone();
        let pump_run = run_id.clone();
        tokio::spawn(async move {
            client.pump(pump_session, pump_run, stream, cancel).await;
        });

        Ok(state)
    }

    /// Ask the worker to stop a run, then finalize it locally whatever the answer.
    ///
    /// Returns `false` if the run was no longer active.
    pub async fn cancel_run(&self, run_id: &RunId) -> Result<bool, RunError> {
        let session_id = {
            let runs = self.inner.runs.lock().await;
            runs.iter()
                .find(|(_, run)| &run.state.run_id == run_id)
                .map(|(session_id, _)| session_id.clone())
        };
        let Some(session_id) = session_id else {
            debug!(target: "agentrelay::run", %run_id, "Cancel requested for a finished run");
            return Ok(false);
        };

        match self.backend() {
            Ok(Some(backend)) => {
                if let Err(e) = backend.cancel_run(run_id.as_str()).await {
                    warn!(target: "agentrelay::run", %run_id, error = %e, "Worker did not accept cancellation");
                }
            }
            Ok(None) => debug!(target: "agentrelay::run", %run_id, "Worker not ready; cancelling locally"),
            Err(e) => warn!(target: "agentrelay::run", %run_id, error = %e, "No client for cancellation"),
        }

        Ok(self
            .finish(&session_id, run_id, RunState::cancel)
            .await
            .is_some())
    }

    /// Cancel whatever run is open for a session.
    pub async fn cancel_session(&self, session_id: &SessionId) -> Result<bool, RunError> {
        let run_id = self
            .inner
            .runs
            .lock()
            .await
            .get(session_id)
            .map(|run| run.state.run_id.clone());
        match run_id {
            Some(run_id) => self.cancel_run(&run_id).await,
            None => Ok(false),
        }
    }

    /// Cancel every open run.
    pub async fn cancel_all(&self) -> Result<(), RunError> {
        let run_ids: Vec<RunId> = self
            .inner
            .runs
            .lock()
            .await
            .values()
            .map(|run| run.state.run_id.clone())
            .collect();
        for run_id in run_ids {
            self.cancel_run(&run_id).await?;
        }
        Ok(())
    }

    async fn pump(
        &self,
        session_id: SessionId,
        run_id: RunId,
        mut stream: RunEventStream,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(target: "agentrelay::run", %run_id, "Run stream closed");
                    break;
                }
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        if self.handle_event(&session_id, &run_id, event).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(target: "agentrelay::run", %run_id, error = %e, "Run stream failed");
                        let err = RunError::Transport(e);
                        self.finish(&session_id, &run_id, |s| s.fail(err.to_string())).await;
                        break;
                    }
                    None => {
                        self.finish(&session_id, &run_id, |s| s.fail(STREAM_CLOSED_MESSAGE)).await;
                        break;
                    }
                }
            }
        }
    }

    /// Apply one event. Returns `true` once the stream should close.
    async fn handle_event(&self, session_id: &SessionId, run_id: &RunId, event: RunEvent) -> bool {
        if let Some(claimed) = event.run_id.as_deref()
            && claimed != run_id.as_str()
        {
            warn!(target: "agentrelay::run", %run_id, claimed, "Dropping event addressed to another run");
            return false;
        }

        if event.kind.is_terminal() {
            self.finish(session_id, run_id, |s| s.apply(&event.kind))
                .await;
            return true;
        }

        let mut runs = self.inner.runs.lock().await;
        let Some(active) = runs
            .get_mut(session_id)
            .filter(|run| &run.state.run_id == run_id)
        else {
            debug!(target: "agentrelay::run", %run_id, "Dropping event for a superseded run");
            return true;
        };

        let Some(patch) = active.state.apply(&event.kind) else {
            return false;
        };
        let message_id = active.state.message_id.clone();

        if let Err(e) = self
            .inner
            .store
            .update_message(session_id, &message_id, patch)
            .await
        {
            error!(target: "agentrelay::run", %run_id, error = %e, "Failed to record run output");
        }
        drop(runs);

        if let RunEventKind::Delta { text } = event.kind {
            let _ = self.inner.updates.send(RunUpdate::Delta {
                session_id: session_id.clone(),
                run_id: run_id.clone(),
                text,
            });
        }
        false
    }

    /// Drive a run to a terminal state, if it is still the session's run.
    ///
    /// Removes it, writes the final patch, closes its stream and forces the
    /// store to disk. The terminal update carries any error from that last
    /// write. Returns the final state when this call finalized it.
    async fn finish<F>(
        &self,
        session_id: &SessionId,
        run_id: &RunId,
        transition: F,
    ) -> Option<RunState>
    where
        F: FnOnce(&mut RunState) -> Option<MessagePatch>,
    {
        let state = {
            let mut runs = self.inner.runs.lock().await;
            if runs
                .get(session_id)
                .is_none_or(|run| &run.state.run_id != run_id)
            {
                debug!(target: "agentrelay::run", %run_id, "Run already finalized");
                return None;
            }
            let mut active = runs.remove(session_id)?;
            active.cancel.cancel();

            let mut patch = transition(&mut active.state);
            // A run is never left open; anything non-terminal here was interrupted.
            if !active.state.is_terminal() {
                patch = active.state.cancel();
            }

            if let Some(patch) = patch
                && let Err(e) = self
                    .inner
                    .store
                    .update_message(session_id, &active.state.message_id, patch)
                    .await
            {
                error!(target: "agentrelay::run", %run_id, error = %e, "Failed to record run result");
            }
            active.state
        };

        info!(
            target: "agentrelay::run",
            %run_id,
            status = %state.status,
            "Run finished"
        );
        let persist_error = self.flush_store().await;
        self.publish_status(&state, persist_error);
        Some(state)
    }

    /// Close a run that is being replaced. Called with the run map locked.
    async fn supersede(&self, mut previous: ActiveRun, backend: &BackendClient) {
        previous.cancel.cancel();
        let run_id = previous.state.run_id.clone();

        if let Some(patch) = previous.state.cancel()
            && let Err(e) = self
                .inner
                .store
                .update_message(&previous.state.session_id, &previous.state.message_id, patch)
                .await
        {
            error!(target: "agentrelay::run", %run_id, error = %e, "Failed to finalize superseded run");
        }
        info!(target: "agentrelay::run", %run_id, "Run superseded");
        self.publish_status(&previous.state, None);

        // The worker is told too, but nothing waits on it.
        let backend = backend.clone();
        tokio::spawn(async move {
            if let Err(e) = backend.cancel_run(run_id.as_str()).await {
                debug!(target: "agentrelay::run", %run_id, error = %e, "Superseded run cancel not accepted");
            }
        });
    }

    async fn mark_failed(
        &self,
        session_id: &SessionId,
        message_id: &MessageId,
        err: &RunError,
    ) -> Result<(), RunError> {
        self.inner
            .store
            .update_message(session_id, message_id, MessagePatch::failed(err.to_string()))
            .await?;
        self.inner.store.flush().await?;
        Ok(())
    }

    async fn flush_store(&self) -> Option<String> {
        let err = self.inner.store.flush().await.err()?;
        error!(target: "agentrelay::run", error = %err, "Failed to persist sessions after run");
        Some(err.to_string())
    }

    fn publish_status(&self, state: &RunState, persist_error: Option<String>) {
        let _ = self.inner.updates.send(RunUpdate::Status {
            session_id: state.session_id.clone(),
            run_id: state.run_id.clone(),
            message_id: state.message_id.clone(),
            status: state.status,
            error: state.error.clone(),
            persist_error,
        });
    }
}

async fn open_run(
    backend: &BackendClient,
    request: &CreateRunRequest,
) -> Result<RunEventStream, ApiError> {
    backend.create_run(request).await?;
    backend.run_events(&request.run_id).await
}

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::api::RunEventKind;
use crate::session::{MessageId, MessagePatch, SessionId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Transient journal of one message being streamed into.
///
/// Every transition returns the patch to apply to the message, or `None` when
/// the run is already terminal. Once terminal, nothing changes again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub run_id: RunId,
    pub session_id: SessionId,
    pub message_id: MessageId,
    pub buffer: String,
    pub status: RunStatus,
    pub error: Option<String>,
}

impl RunState {
    pub fn new(run_id: RunId, session_id: SessionId, message_id: MessageId) -> Self {
        Self {
            run_id,
            session_id,
            message_id,
            buffer: String::new(),
            status: RunStatus::Pending,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn begin_streaming(&mut self) {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::Streaming;
        }
    }

    /// Apply one event from the worker.
    pub fn apply(&mut self, event: &RunEventKind) -> Option<MessagePatch> {
        if self.is_terminal() {
            return None;
        }

        match event {
            RunEventKind::Started => {
                self.begin_streaming();
                None
            }
            RunEventKind::Delta { text } => {
                self.status = RunStatus::Streaming;
                self.buffer.push_str(text);
                Some(MessagePatch::streaming(self.buffer.clone()))
            }
            RunEventKind::Completed { response } => {
                self.status = RunStatus::Completed;
                let content = if response.is_empty() {
                    self.buffer.clone()
                } else {
                    response.clone()
                };
                Some(MessagePatch::finished(content))
            }
            RunEventKind::Failed { message, .. } => self.fail(message.clone()),
            RunEventKind::Cancelled { .. } => self.cancel(),
        }
    }

    /// Finalize from whatever has been buffered so far.
    pub fn cancel(&mut self) -> Option<MessagePatch> {
        if self.is_terminal() {
            return None;
        }
        self.status = RunStatus::Cancelled;
        Some(MessagePatch::finished(self.buffer.clone()))
    }

    /// Finalize with an error. Content streamed so far is kept.
    pub fn fail(&mut self, message: impl Into<String>) -> Option<MessagePatch> {
        if self.is_terminal() {
            return None;
        }
        let message = message.into();
        self.status = RunStatus::Failed;
        self.error = Some(message.clone());
        Some(MessagePatch::failed(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> RunState {
        RunState::new(RunId::from("r1"), SessionId::new(), MessageId::new())
    }

    fn delta(text: &str) -> RunEventKind {
        RunEventKind::Delta {
            text: text.to_string(),
        }
    }

    #[test]
    fn deltas_then_completion() {
        let mut state = run();
        state.begin_streaming();
        assert_eq!(
            state.apply(&delta("Hel")),
            Some(MessagePatch::streaming("Hel"))
        );
        assert_eq!(
            state.apply(&delta("lo")),
            Some(MessagePatch::streaming("Hello"))
        );
        assert_eq!(
            state.apply(&RunEventKind::Completed {
                response: "Hello".to_string()
            }),
            Some(MessagePatch::finished("Hello"))
        );
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[test]
    fn empty_completion_falls_back_to_buffer() {
        let mut state = run();
        state.apply(&delta("partial"));
        assert_eq!(
            state.apply(&RunEventKind::Completed {
                response: String::new()
            }),
            Some(MessagePatch::finished("partial"))
        );
    }

    #[test]
    fn cancel_keeps_buffer() {
        let mut state = run();
        state.apply(&delta("Hel"));
        assert_eq!(state.cancel(), Some(MessagePatch::finished("Hel")));
        assert_eq!(state.status, RunStatus::Cancelled);
    }

    #[test]
    fn failure_sets_error_without_touching_content() {
        let mut state = run();
        state.apply(&delta("Hel"));
        let patch = state
            .apply(&RunEventKind::Failed {
                message: "model error".to_string(),
                error_code: Some("MODEL_ERROR".to_string()),
            })
            .unwrap();
        assert_eq!(patch.content, None);
        assert_eq!(patch.error.as_deref(), Some("model error"));
        assert_eq!(patch.is_streaming, Some(false));
        assert_eq!(state.error.as_deref(), Some("model error"));
    }

    #[test]
    fn nothing_changes_after_a_terminal_state() {
        let mut state = run();
        state.apply(&RunEventKind::Completed {
            response: "done".to_string(),
        });

        assert_eq!(state.apply(&delta("late")), None);
        assert_eq!(state.cancel(), None);
        assert_eq!(state.fail("late failure"), None);
        assert_eq!(
            state.apply(&RunEventKind::Cancelled { reason: None }),
            None
        );
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.buffer, "");
    }

    #[test]
    fn started_only_moves_pending_to_streaming() {
        let mut state = run();
        assert_eq!(state.apply(&RunEventKind::Started), None);
        assert_eq!(state.status, RunStatus::Streaming);
    }
}

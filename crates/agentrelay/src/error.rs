use agentrelay_core::runtime::ExitPhase;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No session matches '{0}'")]
    UnknownSession(String),

    #[error("'{prefix}' matches {count} sessions; use more characters")]
    AmbiguousSession { prefix: String, count: usize },

    #[error("Worker exited unexpectedly ({phase}, code: {code:?}, signal: {signal:?})")]
    WorkerExited {
        phase: ExitPhase,
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("Run failed: {0}")]
    RunFailed(String),

    #[error("Reply was not saved: {0}")]
    NotSaved(String),
}

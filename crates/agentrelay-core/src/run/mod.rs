pub mod client;
pub mod state;

use thiserror::Error;

use crate::api::ApiError;
use crate::session::{SessionId, StoreError};

pub use client::{RunClient, RunUpdate};
pub use state::{RunId, RunState, RunStatus};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Runtime is not ready")]
    NotReady,

    #[error("Transport error: {0}")]
    Transport(#[source] ApiError),

    #[error("Worker rejected the run: {0}")]
    Rejected(#[source] ApiError),

    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RunError {
    /// Worker answered but refused, as opposed to never answering properly.
    pub fn from_api(err: ApiError) -> Self {
        match err {
            ApiError::Status { .. } | ApiError::RunConflict { .. } | ApiError::NotFound { .. } => {
                Self::Rejected(err)
            }
            other => Self::Transport(other),
        }
    }
}

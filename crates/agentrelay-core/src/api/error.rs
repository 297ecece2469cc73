use eventsource_stream::EventStreamError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SseParseError {
    #[error("UTF-8 error: {details}")]
    Utf8 { details: String },
    #[error("Parse error: {details}")]
    Parser { details: String },
    #[error("Transport error: {details}")]
    Transport { details: String },
}

impl<E> From<EventStreamError<E>> for SseParseError
where
    E: std::error::Error,
{
    fn from(err: EventStreamError<E>) -> Self {
        match err {
            EventStreamError::Utf8(err) => Self::Utf8 {
                details: err.to_string(),
            },
            EventStreamError::Parser(err) => Self::Parser {
                details: err.to_string(),
            },
            EventStreamError::Transport(err) => Self::Transport {
                details: err.to_string(),
            },
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {details}")]
    Status {
        endpoint: String,
        status: u16,
        details: String,
    },

    #[error("Not found: {endpoint}")]
    NotFound { endpoint: String },

    #[error("Run {run_id} already exists")]
    RunConflict { run_id: String },

    #[error("Invalid response from {endpoint}: {details}")]
    Decode { endpoint: String, details: String },

    #[error("Event stream error: {0}")]
    Stream(#[from] SseParseError),

    #[error("Malformed {event} event: {details}")]
    MalformedEvent { event: String, details: String },
}

impl ApiError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::NotFound { .. } => Some(404),
            Self::RunConflict { .. } => Some(409),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::sse::SseEvent;
use crate::session::Role;

/// `GET /status`. Unknown fields are ignored so newer workers stay readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub service: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_runs: Option<u32>,
    #[serde(default)]
    pub metadata: StatusMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMetadata {
    #[serde(default)]
    pub offline_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deepseek: Option<DeepSeekStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepSeekStatus {
    pub api_key_set: bool,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepSeekSettings {
    pub api_key_set: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    pub base_url: String,
}

/// Body of `POST /settings/deepseek`. `None` fields are sent as `null`,
/// which the worker treats as "clear".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepSeekSettingsPayload {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_network: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_concurrency: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunRequest {
    pub run_id: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub conversation: Vec<ConversationMessage>,
    pub constraints: Constraints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAck {
    pub run_id: String,
    pub status: String,
}

/// One decoded event from `GET /runs/{id}/events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunEvent {
    /// Run the payload claims to belong to, when it says.
    pub run_id: Option<String>,
    pub kind: RunEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEventKind {
    Started,
    Delta {
        text: String,
    },
    Completed {
        response: String,
    },
    Failed {
        message: String,
        error_code: Option<String>,
    },
    Cancelled {
        reason: Option<String>,
    },
}

impl RunEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RunEventPayload {
    run_id: Option<String>,
    text: Option<String>,
    response: Option<String>,
    message: Option<String>,
    error_code: Option<String>,
    reason: Option<String>,
}

pub const DEFAULT_FAILURE_MESSAGE: &str = "Run failed";

impl RunEvent {
    /// Decode an SSE frame. Unknown event names yield `Ok(None)`.
    pub fn from_sse(event: &SseEvent) -> Result<Option<Self>, ApiError> {
        let name = event.event_type.as_deref().unwrap_or("message");
        if !matches!(
            name,
            "run.started" | "run.delta" | "run.completed" | "run.failed" | "run.cancelled"
        ) {
            return Ok(None);
        }

        let payload: RunEventPayload = if event.data.trim().is_empty() {
            RunEventPayload::default()
        } else {
            serde_json::from_str(&event.data).map_err(|e| ApiError::MalformedEvent {
                event: name.to_string(),
                details: e.to_string(),
            })?
        };

        let kind = match name {
            "run.started" => RunEventKind::Started,
            "run.delta" => RunEventKind::Delta {
                text: payload.text.ok_or_else(|| ApiError::MalformedEvent {
                    event: name.to_string(),
                    details: "missing text".to_string(),
                })?,
            },
            "run.completed" => RunEventKind::Completed {
                response: payload.response.unwrap_or_default(),
            },
            "run.failed" => RunEventKind::Failed {
                message: payload
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
                error_code: payload.error_code,
            },
            _ => RunEventKind::Cancelled {
                reason: payload.reason,
            },
        };

        Ok(Some(Self {
            run_id: payload.run_id,
            kind,
        }))
    }
}

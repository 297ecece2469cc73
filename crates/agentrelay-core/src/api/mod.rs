pub mod error;
pub mod sse;
pub mod types;

use std::pin::Pin;
use std::time::Duration;

use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

pub use error::{ApiError, SseParseError};
pub use sse::{SseEvent, SseStream, parse_sse_stream};
pub use types::{
    Constraints, ConversationMessage, CreateRunRequest, DeepSeekSettings,
    DeepSeekSettingsPayload, DeepSeekStatus, RunAck, RunEvent, RunEventKind, ServiceStatus,
    StatusMetadata,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Applies to every call except the event stream, which may run indefinitely.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub type RunEventStream = Pin<Box<dyn Stream<Item = Result<RunEvent, ApiError>> + Send>>;

/// HTTP client for a running worker.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(host: &str, port: u16) -> Result<Self, ApiError> {
        Self::with_base_url(format!("http://{host}:{port}"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self
            .http_client
            .request(method, self.url(path))
            .timeout(REQUEST_TIMEOUT);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(path, status, response.text().await.unwrap_or_default()));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ApiError::Decode {
            endpoint: path.to_string(),
            details: e.to_string(),
        })
    }

    pub async fn status(&self) -> Result<ServiceStatus, ApiError> {
        self.call::<_, ()>(Method::GET, "/status", None).await
    }

    pub async fn deepseek_settings(&self) -> Result<DeepSeekSettings, ApiError> {
        self.call::<_, ()>(Method::GET, "/settings/deepseek", None)
            .await
    }

    pub async fn save_deepseek_settings(
        &self,
        payload: &DeepSeekSettingsPayload,
    ) -> Result<DeepSeekSettings, ApiError> {
        self.call(Method::POST, "/settings/deepseek", Some(payload))
            .await
    }

    pub async fn reset_deepseek_settings(&self) -> Result<DeepSeekSettings, ApiError> {
        self.call::<_, ()>(Method::DELETE, "/settings/deepseek", None)
            .await
    }

    /// Submit a run. A 409 means the run id is already taken.
    pub async fn create_run(&self, request: &CreateRunRequest) -> Result<RunAck, ApiError> {
        match self.call(Method::POST, "/runs", Some(request)).await {
            Err(ApiError::Status { status: 409, .. }) => Err(ApiError::RunConflict {
                run_id: request.run_id.clone(),
            }),
            other => other,
        }
    }

    pub async fn cancel_run(&self, run_id: &str) -> Result<RunAck, ApiError> {
        self.call::<_, ()>(Method::POST, &format!("/runs/{run_id}/cancel"), None)
            .await
    }

    /// Open the event stream of a run. Unknown event names are skipped.
    pub async fn run_events(&self, run_id: &str) -> Result<RunEventStream, ApiError> {
        let path = format!("/runs/{run_id}/events");
        let response = self
            .http_client
            .get(self.url(&path))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(&path, status, response.text().await.unwrap_or_default()));
        }

        debug!(target: "agentrelay::api", run_id, "Run event stream opened");

        let events = parse_sse_stream(response.bytes_stream()).filter_map(|item| async move {
            match item {
                Ok(sse) => match RunEvent::from_sse(&sse) {
                    Ok(Some(event)) => Some(Ok(event)),
                    Ok(None) => {
                        warn!(
                            target: "agentrelay::api",
                            event = ?sse.event_type,
                            "Ignoring unknown run event"
                        );
                        None
                    }
                    Err(e) => Some(Err(e)),
                },
                Err(e) => Some(Err(e)),
            }
        });

        Ok(Box::pin(events))
    }
}

fn status_error(path: &str, status: StatusCode, details: String) -> ApiError {
    if status == StatusCode::NOT_FOUND {
        ApiError::NotFound {
            endpoint: path.to_string(),
        }
    } else {
        ApiError::Status {
            endpoint: path.to_string(),
            status: status.as_u16(),
            details,
        }
    }
}

use std::future::Future;
use std::time::Duration;

use agentrelay_core::AppContext;
use agentrelay_core::api::BackendClient;
use async_trait::async_trait;
use chrono::{Local, TimeZone};
use eyre::{Result, eyre};

pub mod send;
pub mod serve;
pub mod session;
pub mod settings;
pub mod status;

#[async_trait]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

/// Launch the worker, hand its client to `f`, then shut everything down
/// whether or not `f` succeeded.
pub(crate) async fn with_worker<F, Fut, T>(ctx: &AppContext, timeout: Duration, f: F) -> Result<T>
where
    F: FnOnce(BackendClient) -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
    T: Send,
{
    let result = match ctx.start_and_wait(timeout).await {
        Ok(backend) => f(backend).await,
        Err(e) => Err(eyre!("Worker did not become ready: {}", e)),
    };

    ctx.shutdown()
        .await
        .map_err(|e| eyre!("Failed to shut down cleanly: {}", e))?;
    result
}

/// Millisecond timestamp rendered in local time.
pub(crate) fn format_timestamp(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map_or_else(
            || "N/A".to_string(),
            |t| t.format("%Y-%m-%d %H:%M:%S").to_string(),
        )
}

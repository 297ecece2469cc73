use std::io::{self, Write};

use agentrelay_core::AppContext;
use agentrelay_core::runtime::{RuntimeEvent, StartOutcome};
use async_trait::async_trait;
use eyre::{Result, eyre};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::Command;
use crate::error::Error;

pub struct ServeCommand {
    pub ctx: AppContext,
    pub json: bool,
}

impl ServeCommand {
    fn render(&self, event: &RuntimeEvent) -> Result<()> {
        let mut stdout = io::stdout();
        if self.json {
            writeln!(stdout, "{}", serde_json::to_string(event)?)?;
            return Ok(());
        }

        match event {
            RuntimeEvent::Ready { host, port } => {
                writeln!(stdout, "Worker listening on http://{host}:{port}")?;
            }
            RuntimeEvent::Log { line } => writeln!(stdout, "{line}")?,
            RuntimeEvent::ErrorLog { chunk } => {
                let mut stderr = io::stderr();
                write!(stderr, "{chunk}")?;
            }
            RuntimeEvent::Exited { code, signal, .. } => {
                writeln!(stdout, "Worker exited (code: {code:?}, signal: {signal:?})")?;
            }
        }
        Ok(())
    }

    async fn forward_until_exit(&self) -> Result<()> {
        let mut events = self.ctx.supervisor().subscribe();

        match self
            .ctx
            .start()
            .await
            .map_err(|e| eyre!("Failed to start worker: {}", e))?
        {
            StartOutcome::Started { pid } => info!(?pid, "Worker launched"),
            StartOutcome::AlreadyRunning => info!("Worker already running"),
        }

        if !self.json {
            let mut stdout = io::stdout();
            if self.ctx.config().runtime.headless {
                writeln!(stdout, "Running headless")?;
            }
            writeln!(stdout, "Press Ctrl+C to shutdown")?;
        }

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                result = &mut ctrl_c => {
                    result?;
                    info!("Shutdown signal received");
                    return Ok(());
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        self.render(&event)?;
                        if let RuntimeEvent::Exited { code, signal, phase } = event {
                            return Err(Error::WorkerExited { phase, code, signal }.into());
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Output is falling behind the worker");
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
            }
        }
    }
}

#[async_trait]
impl Command for ServeCommand {
    async fn execute(&self) -> Result<()> {
        let result = self.forward_until_exit().await;

        self.ctx
            .shutdown()
            .await
            .map_err(|e| eyre!("Failed to shut down cleanly: {}", e))?;
        info!("Serve shutdown complete");

        result
    }
}

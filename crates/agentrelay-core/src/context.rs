use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::api::BackendClient;
use crate::config::{AppConfig, WorkerCommand};
use crate::error::{Error, Result};
use crate::run::{RunClient, RunError};
use crate::runtime::{RuntimeSupervisor, StartOutcome};
use crate::session::{DocumentStorage, JsonFileStorage, SessionStore};

/// Everything an entry point needs, built once and passed around explicitly.
///
/// Independent contexts share nothing, so tests can run several side by side.
#[derive(Clone)]
pub struct AppContext {
    config: Arc<AppConfig>,
    store: SessionStore,
    supervisor: RuntimeSupervisor,
    runs: RunClient,
}

impl AppContext {
    /// Build a context backed by the configured session file.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let path = config.store.resolve_path()?;
        info!(target: "agentrelay::context", path = %path.display(), "Opening session store");
        Self::with_storage(config, Arc::new(JsonFileStorage::new(path))).await
    }

    pub async fn with_storage(
        config: AppConfig,
        storage: Arc<dyn DocumentStorage>,
    ) -> Result<Self> {
        let command = WorkerCommand::from_config(&config);
        Self::with_parts(config, storage, command).await
    }

    pub async fn with_parts(
        config: AppConfig,
        storage: Arc<dyn DocumentStorage>,
        command: WorkerCommand,
    ) -> Result<Self> {
        let store = SessionStore::load(storage, config.store.persist_config()).await?;
        let supervisor = RuntimeSupervisor::new(command);
        let runs = RunClient::new(
            store.clone(),
            supervisor.watch_status(),
            config.runs.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            supervisor,
            runs,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn supervisor(&self) -> &RuntimeSupervisor {
        &self.supervisor
    }

    pub fn runs(&self) -> &RunClient {
        &self.runs
    }

    /// Launch the worker with the configured runtime options.
    pub async fn start(&self) -> Result<StartOutcome> {
        Ok(self.supervisor.start(self.config.runtime.clone()).await?)
    }

    /// Launch the worker and wait for its readiness line.
    pub async fn start_and_wait(&self, timeout: Duration) -> Result<BackendClient> {
        self.start().await?;
        let (host, port) = self.supervisor.wait_ready(timeout).await?;
        Ok(BackendClient::new(&host, port)?)
    }

    /// Client for the worker, available once it is ready.
    pub fn backend(&self) -> Result<BackendClient> {
        let status = self.supervisor.status();
        let (host, port) = status
            .address()
            .ok_or(Error::Run(RunError::NotReady))?;
        Ok(BackendClient::new(host, port)?)
    }

    /// Cancel open runs, stop the worker and put everything on disk.
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.runs.cancel_all().await {
            warn!(target: "agentrelay::context", error = %e, "Failed to cancel runs during shutdown");
        }
        self.supervisor.stop().await?;
        self.store.flush().await?;
        info!(target: "agentrelay::context", "Shutdown complete");
        Ok(())
    }
}

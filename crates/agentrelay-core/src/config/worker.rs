use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::{AppConfig, RuntimeOptions};

pub const WORKER_ENV_VAR: &str = "AGENTRELAY_WORKER";
pub const DEFAULT_WORKER_PROGRAM: &str = "python";

/// The program and leading arguments used to launch the worker.
///
/// `program` may be a bare name; the supervisor resolves it on `PATH` when
/// starting so a missing executable is reported before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub entrypoint: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            entrypoint: None,
        }
    }

    #[must_use]
    pub fn with_entrypoint(mut self, entrypoint: impl Into<PathBuf>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    /// Explicit path, then `AGENTRELAY_WORKER`, then `python`.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::select(
            &config.runtime,
            config.worker.entrypoint.as_deref(),
            std::env::var_os(WORKER_ENV_VAR),
        )
    }

    fn select(
        options: &RuntimeOptions,
        entrypoint: Option<&Path>,
        env_program: Option<OsString>,
    ) -> Self {
        let program = options
            .worker_executable_path
            .clone()
            .or_else(|| env_program.filter(|p| !p.is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKER_PROGRAM));

        Self {
            program,
            entrypoint: entrypoint.map(Path::to_path_buf),
        }
    }

    /// Full argument vector: entrypoint first, then the worker flags.
    pub fn args(&self, options: &RuntimeOptions) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(entrypoint) = &self.entrypoint {
            args.push(entrypoint.clone().into_os_string());
        }
        args.extend(options.worker_args().into_iter().map(OsString::from));
        args
    }
}

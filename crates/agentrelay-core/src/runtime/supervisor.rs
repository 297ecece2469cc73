use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::readiness::{LineOutcome, StdoutDecoder};
use crate::config::{RuntimeOptions, WorkerCommand};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 4096;
/// How long an exited worker's pipes may keep draining (held open by grandchildren).
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Worker executable {program:?} not found: {source}")]
    ExecutableNotFound {
        program: PathBuf,
        #[source]
        source: which::Error,
    },

    #[error("Failed to spawn worker {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {0} was not captured")]
    MissingPipe(&'static str),

    #[error("Worker exited before becoming ready (code: {code:?}, signal: {signal:?})")]
    ExitedBeforeReady {
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("Worker did not become ready within {0:?}")]
    ReadyTimeout(Duration),

    #[error("Supervisor shut down")]
    ChannelClosed,
}

impl SupervisorError {
    /// The start attempt failed before any process existed.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(
            self,
            Self::ExecutableNotFound { .. } | Self::Spawn { .. } | Self::MissingPipe(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExitPhase {
    BeforeReady,
    AfterReady,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    Ready {
        host: String,
        port: u16,
    },
    Log {
        line: String,
    },
    ErrorLog {
        chunk: String,
    },
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
        phase: ExitPhase,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RuntimeStatus {
    #[default]
    Stopped,
    Starting,
    Ready {
        host: String,
        port: u16,
    },
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
        phase: ExitPhase,
    },
}

impl RuntimeStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// `(host, port)` of a ready worker.
    pub fn address(&self) -> Option<(&str, u16)> {
        match self {
            Self::Ready { host, port } => Some((host, *port)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { pid: Option<u32> },
    AlreadyRunning,
}

enum SupervisorCmd {
    Start {
        options: RuntimeOptions,
        reply: oneshot::Sender<Result<StartOutcome, SupervisorError>>,
    },
    Stop {
        reply: oneshot::Sender<bool>,
    },
    ProcessReady {
        generation: u64,
        port: u16,
    },
    ProcessExited {
        generation: u64,
        code: Option<i32>,
        signal: Option<i32>,
        phase: ExitPhase,
    },
}

/// Handle to the worker process supervisor.
///
/// Cloning shares the same supervisor. The worker is terminated once every
/// handle has been dropped.
#[derive(Clone)]
pub struct RuntimeSupervisor {
    cmd_tx: mpsc::UnboundedSender<SupervisorCmd>,
    events: broadcast::Sender<RuntimeEvent>,
    status: watch::Receiver<RuntimeStatus>,
}

impl RuntimeSupervisor {
    pub fn new(command: WorkerCommand) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, status) = watch::channel(RuntimeStatus::Stopped);

        let actor = SupervisorActor {
            command,
            cmd_tx: cmd_tx.downgrade(),
            events: events.clone(),
            status: status_tx,
            current: None,
            generation: 0,
        };
        tokio::spawn(actor.run(cmd_rx));

        Self {
            cmd_tx,
            events,
            status,
        }
    }

    /// Spawn the worker. A second call while a process is held is a no-op.
    pub async fn start(&self, options: RuntimeOptions) -> Result<StartOutcome, SupervisorError> {
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SupervisorCmd::Start { options, reply })
            .map_err(|_| SupervisorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SupervisorError::ChannelClosed)?
    }

    /// Ask the worker to terminate. Returns whether a process was signalled;
    /// the exit itself arrives later as [`RuntimeEvent::Exited`].
    pub async fn stop(&self) -> Result<bool, SupervisorError> {
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SupervisorCmd::Stop { reply })
            .map_err(|_| SupervisorError::ChannelClosed)?;
        reply_rx.await.map_err(|_| SupervisorError::ChannelClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> RuntimeStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<RuntimeStatus> {
        self.status.clone()
    }

    pub fn is_ready(&self) -> bool {
        self.status.borrow().is_ready()
    }

    /// Wait until the worker reports readiness, returning its address.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(String, u16), SupervisorError> {
        let mut status = self.status.clone();
        let settled = tokio::time::timeout(
            timeout,
            status.wait_for(|s| {
                matches!(s, RuntimeStatus::Ready { .. } | RuntimeStatus::Exited { .. })
            }),
        )
        .await
        .map_err(|_| SupervisorError::ReadyTimeout(timeout))?
        .map_err(|_| SupervisorError::ChannelClosed)?;

        match &*settled {
            RuntimeStatus::Ready { host, port } => Ok((host.clone(), *port)),
            RuntimeStatus::Exited { code, signal, .. } => Err(SupervisorError::ExitedBeforeReady {
                code: *code,
                signal: *signal,
            }),
            RuntimeStatus::Stopped | RuntimeStatus::Starting => {
                Err(SupervisorError::ReadyTimeout(timeout))
            }
        }
    }
}

struct ProcessSlot {
    generation: u64,
    host: String,
    kill_tx: Option<oneshot::Sender<()>>,
}

struct SupervisorActor {
    command: WorkerCommand,
    cmd_tx: mpsc::WeakUnboundedSender<SupervisorCmd>,
    events: broadcast::Sender<RuntimeEvent>,
    status: watch::Sender<RuntimeStatus>,
    current: Option<ProcessSlot>,
    generation: u64,
}

impl SupervisorActor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<SupervisorCmd>) {
        loop {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        SupervisorCmd::Start { options, reply } => {
                            let result = self.start(options);
                            let _ = reply.send(result);
                        }
                        SupervisorCmd::Stop { reply } => {
                            let _ = reply.send(self.stop());
                        }
                        SupervisorCmd::ProcessReady { generation, port } => {
                            self.on_ready(generation, port);
                        }
                        SupervisorCmd::ProcessExited { generation, code, signal, phase } => {
                            self.on_exit(generation, code, signal, phase);
                        }
                    }
                }
                else => break,
            }
        }

        // Dropping the slot closes the kill channel, which terminates the worker.
        self.current = None;
        debug!(target: "agentrelay::runtime", "Runtime supervisor stopped");
    }

    fn start(&mut self, options: RuntimeOptions) -> Result<StartOutcome, SupervisorError> {
        if self.current.is_some() {
            debug!(target: "agentrelay::runtime", "Worker already running; start ignored");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let program = which::which(&self.command.program).map_err(|source| {
            error!(
                target: "agentrelay::runtime",
                program = %self.command.program.display(),
                "Worker executable not found"
            );
            SupervisorError::ExecutableNotFound {
                program: self.command.program.clone(),
                source,
            }
        })?;

        let mut child = Command::new(&program)
            .args(self.command.args(&options))
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| {
                error!(
                    target: "agentrelay::runtime",
                    program = %program.display(),
                    error = %source,
                    "Failed to spawn worker"
                );
                SupervisorError::Spawn {
                    program: program.clone(),
                    source,
                }
            })?;

        let stdout = child.stdout.take().ok_or(SupervisorError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SupervisorError::MissingPipe("stderr"))?;

        self.generation += 1;
        let generation = self.generation;
        let pid = child.id();
        let became_ready = Arc::new(AtomicBool::new(false));

        let stdout_task = tokio::spawn(read_stdout(
            stdout,
            options.port,
            generation,
            self.events.clone(),
            self.cmd_tx.clone(),
            became_ready.clone(),
        ));
        let stderr_task = tokio::spawn(read_stderr(stderr, self.events.clone()));

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(wait_for_exit(
            child,
            kill_rx,
            generation,
            [stdout_task, stderr_task],
            became_ready,
            self.cmd_tx.clone(),
            self.events.clone(),
        ));

        self.current = Some(ProcessSlot {
            generation,
            host: options.host.clone(),
            kill_tx: Some(kill_tx),
        });
        self.status.send_replace(RuntimeStatus::Starting);

        info!(
            target: "agentrelay::runtime",
            program = %program.display(),
            ?pid,
            host = %options.host,
            port = options.port,
            "Worker spawned"
        );

        Ok(StartOutcome::Started { pid })
    }

    fn stop(&mut self) -> bool {
        let Some(mut slot) = self.current.take() else {
            return false;
        };

        if let Some(kill_tx) = slot.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        self.status.send_replace(RuntimeStatus::Stopped);
        info!(target: "agentrelay::runtime", generation = slot.generation, "Worker stop requested");
        true
    }

    fn on_ready(&mut self, generation: u64, port: u16) {
        let Some(slot) = self.current.as_ref().filter(|s| s.generation == generation) else {
            debug!(target: "agentrelay::runtime", generation, "Ignoring readiness from a previous worker");
            return;
        };

        let host = slot.host.clone();
        info!(target: "agentrelay::runtime", %host, port, "Worker ready");
        self.status.send_replace(RuntimeStatus::Ready {
            host: host.clone(),
            port,
        });
        let _ = self.events.send(RuntimeEvent::Ready { host, port });
    }

    fn on_exit(
        &mut self,
        generation: u64,
        code: Option<i32>,
        signal: Option<i32>,
        phase: ExitPhase,
    ) {
        let is_current = self
            .current
            .as_ref()
            .is_some_and(|s| s.generation == generation);

        if is_current {
            self.current = None;
            self.status
                .send_replace(RuntimeStatus::Exited { code, signal, phase });
            warn!(
                target: "agentrelay::runtime",
                ?code,
                ?signal,
                %phase,
                "Worker exited"
            );
        } else {
            debug!(
                target: "agentrelay::runtime",
                generation,
                ?code,
                ?signal,
                "Previous worker exited"
            );
        }

        let _ = self
            .events
            .send(RuntimeEvent::Exited { code, signal, phase });
    }
}

async fn read_stdout(
    mut stdout: impl AsyncRead + Unpin,
    fallback_port: u16,
    generation: u64,
    events: broadcast::Sender<RuntimeEvent>,
    cmd_tx: mpsc::WeakUnboundedSender<SupervisorCmd>,
    became_ready: Arc<AtomicBool>,
) {
    let mut decoder = StdoutDecoder::new(fallback_port);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    let publish = |outcome: LineOutcome| {
        let line = match outcome {
            LineOutcome::Log(line) => line,
            LineOutcome::Ready { line, port } => {
                became_ready.store(true, Ordering::SeqCst);
                if let Some(tx) = cmd_tx.upgrade() {
                    let _ = tx.send(SupervisorCmd::ProcessReady { generation, port });
                }
                line
            }
        };
        info!(target: "agentrelay::worker", "{line}");
        let _ = events.send(RuntimeEvent::Log { line });
    };

    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => decoder.push(&buf[..n]).into_iter().for_each(&publish),
            Err(e) => {
                warn!(target: "agentrelay::runtime", error = %e, "Worker stdout read failed");
                break;
            }
        }
    }

    if let Some(outcome) = decoder.finish() {
        publish(outcome);
    }
}

async fn read_stderr(mut stderr: impl AsyncRead + Unpin, events: broadcast::Sender<RuntimeEvent>) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                warn!(target: "agentrelay::worker", "{}", chunk.trim_end());
                let _ = events.send(RuntimeEvent::ErrorLog { chunk });
            }
            Err(e) => {
                warn!(target: "agentrelay::runtime", error = %e, "Worker stderr read failed");
                break;
            }
        }
    }
}

async fn wait_for_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    generation: u64,
    readers: [JoinHandle<()>; 2],
    became_ready: Arc<AtomicBool>,
    cmd_tx: mpsc::WeakUnboundedSender<SupervisorCmd>,
    events: broadcast::Sender<RuntimeEvent>,
) {
    // A dropped sender means the supervisor is gone; terminate as well.
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => {
            terminate(&mut child);
            child.wait().await
        }
    };

    // Let the readers forward everything the worker wrote before it died.
    let drained = tokio::time::timeout(PIPE_DRAIN_TIMEOUT, async {
        for reader in readers {
            let _ = reader.await;
        }
    })
    .await;
    if drained.is_err() {
        debug!(target: "agentrelay::runtime", "Worker pipes still open after exit");
    }

    let (code, signal) = match &status {
        Ok(status) => exit_details(*status),
        Err(e) => {
            error!(target: "agentrelay::runtime", error = %e, "Failed to wait for worker");
            (None, None)
        }
    };
    let phase = if became_ready.load(Ordering::SeqCst) {
        ExitPhase::AfterReady
    } else {
        ExitPhase::BeforeReady
    };

    let exited = SupervisorCmd::ProcessExited {
        generation,
        code,
        signal,
        phase,
    };
    match cmd_tx.upgrade() {
        Some(tx) => {
            let _ = tx.send(exited);
        }
        None => {
            let _ = events.send(RuntimeEvent::Exited { code, signal, phase });
        }
    }
}

/// Graceful termination where the platform has it, a hard kill elsewhere.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            match kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => return,
                Err(e) => {
                    warn!(target: "agentrelay::runtime", error = %e, "SIGTERM failed; killing worker");
                }
            }
        }
    }

    if let Err(e) = child.start_kill() {
        warn!(target: "agentrelay::runtime", error = %e, "Failed to kill worker");
    }
}

fn exit_details(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        (status.code(), status.signal())
    }
    #[cfg(not(unix))]
    {
        (status.code(), None)
    }
}

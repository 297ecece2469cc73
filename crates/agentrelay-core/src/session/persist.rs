//! Coalescing write queue for the session document.
//!
//! All writes to the backing storage go through one task, which makes the
//! store single-writer. Callers either ask for an immediate write (discrete
//! user actions) or schedule a deferred one (streaming deltas). Deferred
//! writes use a trailing-edge delay, capped by `max_delay` so a run that
//! never pauses still reaches disk.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error};

use super::storage::{DocumentStorage, StoreError};
use super::types::PersistedDocument;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistConfig {
    pub debounce: Duration,
    pub max_delay: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

/// The in-memory document together with the storage it is written to.
pub(crate) struct DocumentCell {
    pub document: Mutex<PersistedDocument>,
    pub storage: Arc<dyn DocumentStorage>,
}

impl DocumentCell {
    async fn write_snapshot(&self) -> Result<(), StoreError> {
        let snapshot = self.document.lock().await.clone();
        self.storage.write(&snapshot).await
    }
}

enum PersistCmd {
    Schedule,
    WriteNow {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Flush {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

#[derive(Clone)]
pub(crate) struct PersistQueue {
    cmd_tx: mpsc::UnboundedSender<PersistCmd>,
}

impl PersistQueue {
    pub fn spawn(cell: Arc<DocumentCell>, config: PersistConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(PersistWorker::new(cell, config).run(cmd_rx));
        Self { cmd_tx }
    }

    /// Mark the document dirty; the write happens once mutations settle.
    pub fn schedule(&self) -> Result<(), StoreError> {
        self.cmd_tx
            .send(PersistCmd::Schedule)
            .map_err(|_| StoreError::QueueClosed)
    }

    /// Write the current document now, superseding any pending deferred write.
    pub async fn write_now(&self) -> Result<(), StoreError> {
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(PersistCmd::WriteNow { reply })
            .map_err(|_| StoreError::QueueClosed)?;
        reply_rx.await.map_err(|_| StoreError::QueueClosed)?
    }

    /// Write a pending deferred change, if any, and report the last deferred failure.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let (reply, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(PersistCmd::Flush { reply })
            .map_err(|_| StoreError::QueueClosed)?;
        reply_rx.await.map_err(|_| StoreError::QueueClosed)?
    }
}

struct Pending {
    deadline: Instant,
    first_scheduled: Instant,
}

struct PersistWorker {
    cell: Arc<DocumentCell>,
    config: PersistConfig,
    pending: Option<Pending>,
    /// Set by any mutation, cleared only by a write that succeeded.
    dirty: bool,
    deferred_error: Option<StoreError>,
}

impl PersistWorker {
    fn new(cell: Arc<DocumentCell>, config: PersistConfig) -> Self {
        Self {
            cell,
            config,
            pending: None,
            dirty: false,
            deferred_error: None,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<PersistCmd>) {
        loop {
            let deadline = self.pending.as_ref().map(|p| p.deadline);

            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PersistCmd::Schedule) => self.schedule(),
                        Some(PersistCmd::WriteNow { reply }) => {
                            self.pending = None;
                            self.dirty = true;
                            let _ = reply.send(self.write().await);
                        }
                        Some(PersistCmd::Flush { reply }) => {
                            self.pending = None;
                            let result = if self.dirty {
                                self.write().await
                            } else {
                                Ok(())
                            };
                            let result = match self.deferred_error.take() {
                                Some(err) if result.is_ok() => Err(err),
                                _ => result,
                            };
                            let _ = reply.send(result);
                        }
                        None => {
                            if self.dirty {
                                self.write_deferred().await;
                            }
                            break;
                        }
                    }
                }
                () = sleep_until_deadline(deadline), if deadline.is_some() => {
                    self.pending = None;
                    self.write_deferred().await;
                }
            }
        }

        debug!(target: "session::persist", "Persist queue stopped");
    }

    fn schedule(&mut self) {
        let now = Instant::now();
        let first_scheduled = self.pending.as_ref().map_or(now, |p| p.first_scheduled);
        let cap = first_scheduled + self.config.max_delay;
        let deadline = (now + self.config.debounce).min(cap);
        self.dirty = true;
        self.pending = Some(Pending {
            deadline,
            first_scheduled,
        });
    }

    /// A failed write leaves the document dirty, so the next flush or
    /// deadline writes it again.
    async fn write(&mut self) -> Result<(), StoreError> {
        let result = self.cell.write_snapshot().await;
        if result.is_ok() {
            self.dirty = false;
        }
        result
    }

    async fn write_deferred(&mut self) {
        if let Err(err) = self.write().await {
            error!(target: "session::persist", error = %err, "Deferred session write failed");
            self.deferred_error = Some(err);
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use super::types::PersistedDocument;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to write session store at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read session store at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session store is corrupt: {message}")]
    Corrupt { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Persist queue closed")]
    QueueClosed,
}

impl StoreError {
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Write failures must reach the caller; read failures are healed by reseeding.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Self::Write { .. } | Self::Serialization { .. })
    }
}

/// Durable backing for the persisted document.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    async fn read(&self) -> Result<Option<PersistedDocument>, StoreError>;

    async fn write(&self, document: &PersistedDocument) -> Result<(), StoreError>;

    /// Keep an unreadable document out of the way before it is overwritten.
    async fn quarantine(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Pretty-printed JSON file replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    // Same directory as the target so the final rename never crosses filesystems.
    let mut temp = NamedTempFile::new_in(&dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl DocumentStorage for JsonFileStorage {
    async fn read(&self) -> Result<Option<PersistedDocument>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source: e,
                });
            }
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| StoreError::corrupt(format!("{}: {e}", self.path.display())))
    }

    async fn write(&self, document: &PersistedDocument) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| StoreError::serialization(e.to_string()))?;
        let path = self.path.clone();

        let result = tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| StoreError::Write {
                path: self.path.clone(),
                source: std::io::Error::other(e.to_string()),
            })?;

        result.map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })?;

        debug!(target: "session::storage", path = %self.path.display(), "Session store written");
        Ok(())
    }

    async fn quarantine(&self) -> Result<(), StoreError> {
        if !tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let mut aside = self.path.clone().into_os_string();
        aside.push(format!(".corrupt-{stamp}"));
        let aside = PathBuf::from(aside);

        tokio::fs::rename(&self.path, &aside)
            .await
            .map_err(|source| StoreError::Write {
                path: aside.clone(),
                source,
            })?;

        warn!(
            target: "session::storage",
            path = %self.path.display(),
            moved_to = %aside.display(),
            "Moved unreadable session store aside"
        );
        Ok(())
    }
}

/// In-memory storage for tests and ephemeral contexts.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    document: Mutex<Option<String>>,
    writes: AtomicUsize,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed raw contents, including contents that do not parse.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            document: Mutex::new(Some(raw.into())),
            ..Self::default()
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn raw(&self) -> Option<String> {
        self.document
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DocumentStorage for MemoryStorage {
    async fn read(&self) -> Result<Option<PersistedDocument>, StoreError> {
        match self.raw() {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::corrupt(e.to_string())),
        }
    }

    async fn write(&self, document: &PersistedDocument) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                path: PathBuf::from(":memory:"),
                source: std::io::Error::other("simulated write failure"),
            });
        }
        let raw = serde_json::to_string(document)
            .map_err(|e| StoreError::serialization(e.to_string()))?;
        *self
            .document
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(raw);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

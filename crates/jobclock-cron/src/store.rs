//! File-backed job storage.
//!
//! The whole collection lives in one JSON document. Saves replace it
//! atomically (temp file + rename) and every mutation runs under the
//! store lock from before its load until after its save.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use jobclock_config::CronConfig;
use jobclock_types::JobStoreFile;

use crate::error::{CronError, Result};
use crate::lock::StoreLock;

/// What a mutation closure produced, and whether the collection needs saving.
#[derive(Debug)]
pub struct Mutation<T> {
    value: T,
    changed: bool,
}

impl<T> Mutation<T> {
    /// The collection was modified and must be written back.
    pub fn changed(value: T) -> Self {
        Self {
            value,
            changed: true,
        }
    }

    /// Nothing was modified; the save is skipped.
    pub fn unchanged(value: T) -> Self {
        Self {
            value,
            changed: false,
        }
    }
}

/// Persistent storage for jobs.
#[derive(Debug, Clone)]
pub struct JobStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
    lock_retry: Duration,
}

impl JobStore {
    /// Store at `path` with default lock timing.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::from_config(path, &CronConfig::default())
    }

    /// Store at `path` with lock timing taken from `config`.
    pub fn from_config(path: impl Into<PathBuf>, config: &CronConfig) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self {
            path,
            lock_path,
            lock_timeout: config.lock_timeout(),
            lock_retry: config.lock_retry(),
        }
    }

    pub fn with_lock_timing(mut self, timeout: Duration, retry: Duration) -> Self {
        self.lock_timeout = timeout;
        self.lock_retry = retry.max(Duration::from_millis(1));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Read the whole collection. A missing document is an empty collection;
    /// an unreadable one is an error.
    pub async fn load(&self) -> Result<JobStoreFile> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "job store not found, starting empty");
                return Ok(JobStoreFile::default());
            }
            Err(e) => return Err(e.into()),
        };

        let file: JobStoreFile =
            serde_json::from_slice(&bytes).map_err(|source| CronError::CorruptStore {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), jobs = file.jobs.len(), "job store loaded");
        Ok(file)
    }

    /// Replace the whole document atomically.
    pub async fn save(&self, file: &JobStoreFile) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let json = serde_json::to_vec_pretty(file)?;
        let file_name = self.path.file_name().unwrap_or_default().to_string_lossy();
        let tmp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        if let Err(e) = write_synced(&tmp_path, &json).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(path = %self.path.display(), jobs = file.jobs.len(), "job store saved");
        Ok(())
    }

    /// Acquire the exclusive store lock, waiting at most the configured timeout.
    pub async fn lock(&self) -> Result<StoreLock> {
        StoreLock::acquire(&self.lock_path, self.lock_timeout, self.lock_retry).await
    }

    /// Locked load-modify-save. The collection is only written when `apply`
    /// reports a change; an error from `apply` leaves the document untouched.
    pub async fn mutate<T, F>(&self, apply: F) -> Result<T>
    where
        F: FnOnce(&mut JobStoreFile) -> Result<Mutation<T>>,
    {
        let _lock = self.lock().await?;
        let mut file = self.load().await?;
        let mutation = apply(&mut file)?;
        if mutation.changed {
            self.save(&file).await?;
        }
        Ok(mutation.value)
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

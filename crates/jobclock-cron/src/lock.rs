//! Cross-process exclusive lock guarding store mutations.
//!
//! On Unix the lock is an advisory `flock` on a sidecar file. Every
//! acquisition opens its own descriptor, so two tasks in one process
//! serialize just like two processes do. Other targets fall back to an
//! exclusively created sentinel file that is removed on release; a sentinel
//! left behind by a crashed holder is broken once it is older than
//! [`STALE_SENTINEL`].

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::{CronError, Result};

/// Age after which an abandoned sentinel lock file may be removed.
pub const STALE_SENTINEL: Duration = Duration::from_secs(300);

/// Held while a load-modify-save cycle runs. Released on drop.
#[derive(Debug)]
pub struct StoreLock {
    path: PathBuf,
    file: Option<File>,
}

impl StoreLock {
    /// Wait up to `timeout` for the lock at `path`, polling every `retry`.
    pub async fn acquire(path: &Path, timeout: Duration, retry: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let started = tokio::time::Instant::now();
        loop {
            let attempt_path = path.to_path_buf();
            let attempt = tokio::task::spawn_blocking(move || platform::lock(&attempt_path))
                .await
                .map_err(std::io::Error::other)??;
            if let Some(file) = attempt {
                let lock = Self {
                    path: path.to_path_buf(),
                    file: Some(file),
                };
                debug!(
                    lock = %path.display(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "store lock acquired"
                );
                return Ok(lock);
            }

            let waited = started.elapsed();
            if waited >= timeout {
                warn!(
                    lock = %path.display(),
                    waited_ms = waited.as_millis() as u64,
                    "timed out waiting for store lock"
                );
                return Err(CronError::LockTimeout {
                    path: path.to_path_buf(),
                    waited_ms: waited.as_millis() as u64,
                });
            }
            tokio::time::sleep(retry.min(timeout - waited)).await;
        }
    }

    /// One non-blocking attempt from synchronous code. `Ok(None)` means
    /// someone else holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        match platform::lock(path) {
            Ok(Some(file)) => Ok(Some(Self {
                path: path.to_path_buf(),
                file: Some(file),
            })),
            Ok(None) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            platform::unlock(&self.path, file);
            debug!(lock = %self.path.display(), "store lock released");
        }
    }
}

#[cfg(unix)]
mod platform {
    use super::*;
    use std::os::unix::io::AsRawFd;

    pub(super) fn lock(path: &Path) -> io::Result<Option<File>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(Some(file));
        }
        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(None),
            _ => Err(err),
        }
    }

    pub(super) fn unlock(_path: &Path, file: File) {
        // Dropping the file also releases it.
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use super::*;
    use std::io::Write;

    pub(super) fn lock(path: &Path) -> io::Result<Option<File>> {
        match create_sentinel(path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let modified = std::fs::metadata(path)?.modified()?;
                if !sentinel_is_stale(modified, SystemTime::now()) {
                    return Ok(None);
                }
                tracing::warn!(lock = %path.display(), "breaking stale lock file");
                std::fs::remove_file(path)?;
                match create_sentinel(path) {
                    Ok(file) => Ok(Some(file)),
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Create the sentinel and record who holds it.
    fn create_sentinel(path: &Path) -> io::Result<File> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(file)
    }

    pub(super) fn unlock(path: &Path, file: File) {
        drop(file);
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(lock = %path.display(), "failed to remove lock file: {e}");
        }
    }
}

/// Whether a sentinel last written at `modified` is old enough to break.
#[cfg_attr(unix, allow(dead_code))]
fn sentinel_is_stale(modified: SystemTime, now: SystemTime) -> bool {
    now.duration_since(modified)
        .is_ok_and(|age| age > STALE_SENTINEL)
}

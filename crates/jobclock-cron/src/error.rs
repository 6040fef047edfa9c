use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by every scheduler operation.
#[derive(Debug, Error)]
pub enum CronError {
    /// No job with the given ID exists in the store.
    #[error("Job not found: {id}")]
    NotFound { id: String },

    /// A required field is missing or malformed.
    #[error("Invalid job: {0}")]
    Validation(String),

    /// The schedule cannot be evaluated.
    #[error("Invalid schedule: {0}")]
    Schedule(String),

    /// Another writer held the store lock for longer than the wait budget.
    #[error("Timed out after {waited_ms}ms waiting for store lock {}", path.display())]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The store document exists but cannot be parsed. Never treated as empty.
    #[error("Job store {} is corrupt: {source}", path.display())]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode job store: {0}")]
    Encode(#[from] serde_json::Error),

    /// The store location could not be resolved.
    #[error("Config error: {0}")]
    Config(#[from] jobclock_config::ConfigError),
}

/// Coarse error class, for callers that branch on failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Schedule,
    LockTimeout,
    Io,
}

impl CronError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CronError::NotFound { .. } => ErrorKind::NotFound,
            CronError::Validation(_) => ErrorKind::Validation,
            CronError::Schedule(_) => ErrorKind::Schedule,
            CronError::LockTimeout { .. } => ErrorKind::LockTimeout,
            CronError::Io(_)
            | CronError::CorruptStore { .. }
            | CronError::Encode(_)
            | CronError::Config(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn not_found(id: &str) -> Self {
        CronError::NotFound { id: id.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, CronError>;

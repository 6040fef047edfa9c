use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that overrides the job store location.
pub const STORE_PATH_ENV: &str = "JOBCLOCK_CRON_STORE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CronConfig {
    /// Job store document location (overridden by env / explicit path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    /// How long a mutation waits for the store lock before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Delay between lock attempts while waiting.
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,
    /// Runs older than this are considered abandoned by `clear_stale_runs`.
    #[serde(default = "default_stale_run_ms")]
    pub stale_run_ms: i64,
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_lock_retry_ms() -> u64 {
    25
}

fn default_stale_run_ms() -> i64 {
    2 * 60 * 60 * 1000
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_retry_ms: default_lock_retry_ms(),
            stale_run_ms: default_stale_run_ms(),
        }
    }
}

impl CronConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_retry(&self) -> Duration {
        // Never spin on a zero interval.
        Duration::from_millis(self.lock_retry_ms.max(1))
    }
}

/// Resolve the jobclock config directory (~/.jobclock/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".jobclock"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.jobclock/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Default job store location (~/.jobclock/cron/jobs.json).
pub fn default_store_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("cron").join("jobs.json"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<CronConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<CronConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(CronConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: CronConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Resolve the store path: explicit override, then `JOBCLOCK_CRON_STORE`,
/// then the config file, then the default location.
pub fn resolve_store_path(
    override_path: Option<&Path>,
    config: &CronConfig,
) -> Result<PathBuf, ConfigError> {
    let env_value = std::env::var(STORE_PATH_ENV).ok();
    resolve_store_path_with(override_path, env_value.as_deref(), config)
}

/// Same as [`resolve_store_path`] with the environment value supplied by the caller.
pub fn resolve_store_path_with(
    override_path: Option<&Path>,
    env_value: Option<&str>,
    config: &CronConfig,
) -> Result<PathBuf, ConfigError> {
    if let Some(path) = override_path {
        return Ok(path.to_path_buf());
    }
    if let Some(raw) = env_value.map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(expand_home(raw));
    }
    if let Some(path) = &config.store_path {
        return Ok(path.clone());
    }
    default_store_path()
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}

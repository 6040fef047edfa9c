use serde::{Deserialize, Serialize};

/// Current version of the persisted store document.
pub const STORE_VERSION: u32 = 1;

// ──────────────────── Schedule Types ────────────────────

/// Defines when a job fires. All instants are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Schedule {
    /// Fire exactly once at `at_ms`.
    #[serde(rename_all = "camelCase")]
    At { at_ms: i64 },
    /// Fire every `interval_ms`, phase-aligned to `anchor_ms`.
    #[serde(rename_all = "camelCase")]
    Every {
        interval_ms: i64,
        /// Filled in with the creation time when omitted.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        anchor_ms: Option<i64>,
    },
    /// Calendar recurrence (5, 6 or 7 field cron expression).
    #[serde(rename_all = "camelCase")]
    Cron {
        expression: String,
        /// IANA timezone name. UTC when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
}

impl Schedule {
    /// The serialized discriminator (`at`, `every`, `cron`).
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::At { .. } => "at",
            Schedule::Every { .. } => "every",
            Schedule::Cron { .. } => "cron",
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Schedule::At { .. })
    }
}

// ──────────────────── Payload Types ────────────────────

/// What the external executor should do when a job fires.
///
/// Opaque to the scheduler beyond validation and patching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    /// Inject a text event into the main session.
    SystemEvent { text: String },
    /// Run an agent turn with the given message.
    #[serde(rename_all = "camelCase")]
    AgentTurn {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thinking: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_seconds: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        deliver: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        best_effort_deliver: Option<bool>,
    },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::SystemEvent { .. } => "systemEvent",
            Payload::AgentTurn { .. } => "agentTurn",
        }
    }
}

/// Partial payload used by updates.
///
/// When the kind matches the stored payload, absent fields keep their stored
/// values and optional fields sent as `null` are cleared (`Some(None)`).
/// When the kind differs, the patch replaces the payload and must be complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PayloadPatch {
    SystemEvent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AgentTurn {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(
            default,
            deserialize_with = "nullable",
            skip_serializing_if = "Option::is_none"
        )]
        model: Option<Option<String>>,
        #[serde(
            default,
            deserialize_with = "nullable",
            skip_serializing_if = "Option::is_none"
        )]
        thinking: Option<Option<String>>,
        #[serde(
            default,
            deserialize_with = "nullable",
            skip_serializing_if = "Option::is_none"
        )]
        timeout_seconds: Option<Option<u64>>,
        #[serde(
            default,
            deserialize_with = "nullable",
            skip_serializing_if = "Option::is_none"
        )]
        deliver: Option<Option<bool>>,
        #[serde(
            default,
            deserialize_with = "nullable",
            skip_serializing_if = "Option::is_none"
        )]
        channel: Option<Option<String>>,
        #[serde(
            default,
            deserialize_with = "nullable",
            skip_serializing_if = "Option::is_none"
        )]
        to: Option<Option<String>>,
        #[serde(
            default,
            deserialize_with = "nullable",
            skip_serializing_if = "Option::is_none"
        )]
        best_effort_deliver: Option<Option<bool>>,
    },
}

impl PayloadPatch {
    pub fn kind(&self) -> &'static str {
        match self {
            PayloadPatch::SystemEvent { .. } => "systemEvent",
            PayloadPatch::AgentTurn { .. } => "agentTurn",
        }
    }
}

/// Keeps an explicit `null` distinct from an absent field: absent stays `None`
/// through `#[serde(default)]`, `null` becomes `Some(None)`.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ──────────────────── Job Types ────────────────────

/// Outcome of a single run, as reported by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Error,
    Skipped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Ok => "ok",
            RunStatus::Error => "error",
            RunStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(RunStatus::Ok),
            "error" => Ok(RunStatus::Error),
            "skipped" => Ok(RunStatus::Skipped),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Execution state tracked per job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    /// Set only while the job is enabled and has a future fire time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
    /// Set between `mark_running` and `mark_completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_duration_ms: Option<i64>,
}

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// UUID v4 string, assigned at creation.
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
    pub schedule: Schedule,
    pub payload: Payload,
    /// Delete the job after a successful one-shot run instead of disabling it.
    #[serde(default)]
    pub delete_after_run: bool,
    // Routing metadata: passed through to the executor untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<serde_json::Value>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(default)]
    pub state: JobState,
}

impl Job {
    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.state.running_at_ms.is_some()
    }
}

/// Input for creating a new job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreate {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub schedule: Schedule,
    pub payload: Payload,
    #[serde(default)]
    pub delete_after_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wake_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<serde_json::Value>,
}

impl JobCreate {
    /// A minimal enabled job with no routing metadata.
    pub fn new(name: impl Into<String>, schedule: Schedule, payload: Payload) -> Self {
        Self {
            name: name.into(),
            description: None,
            enabled: true,
            schedule,
            payload,
            delete_after_run: false,
            session_target: None,
            wake_mode: None,
            agent_id: None,
            isolation: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Partial update of a job. Absent fields are left untouched; optional
/// fields sent as `null` are cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<PayloadPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_run: Option<bool>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_target: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub wake_mode: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub agent_id: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub isolation: Option<Option<serde_json::Value>>,
}

/// Result reported by the executor when a run finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
}

impl RunOutcome {
    pub fn ok(duration_ms: i64) -> Self {
        Self {
            status: RunStatus::Ok,
            error: None,
            duration_ms,
        }
    }

    pub fn error(error: impl Into<String>, duration_ms: i64) -> Self {
        Self {
            status: RunStatus::Error,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// Summary a poller uses to decide when to check again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronStatus {
    pub job_count: usize,
    pub enabled_count: usize,
    pub running_count: usize,
    /// Earliest `next_run_at_ms` among enabled jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<i64>,
}

// ──────────────────── Store Document ────────────────────

/// The whole persisted collection: `{ "version": 1, "jobs": [...] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStoreFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

fn default_version() -> u32 {
    STORE_VERSION
}

impl Default for JobStoreFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            jobs: Vec::new(),
        }
    }
}

impl JobStoreFile {
    pub fn find(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.jobs.iter().position(|j| j.id == id)
    }
}

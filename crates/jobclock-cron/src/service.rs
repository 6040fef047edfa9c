//! Job lifecycle: the operation surface external callers use.
//!
//! Mutations run inside [`JobStore::mutate`], so each one holds the store
//! lock across its load and save. Reads go straight to the latest snapshot.
//! "Now" is read from the clock exactly once per operation.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use jobclock_config::CronConfig;
use jobclock_types::{
    CronStatus, Job, JobCreate, JobPatch, JobState, RunOutcome, RunStatus, Schedule,
};

use crate::clock::{Clock, SystemClock};
use crate::due::{select_due, summarize};
use crate::error::{CronError, Result};
use crate::patch::{anchor_schedule, apply_fields, validate_create};
use crate::schedule::compute_next_run;
use crate::store::{JobStore, Mutation};

/// Manages job definitions and their execution state.
pub struct CronService {
    store: JobStore,
    clock: Arc<dyn Clock>,
    stale_run_ms: i64,
}

impl CronService {
    /// Create a service over `store`, reading time from `clock`.
    pub fn new(store: JobStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            stale_run_ms: CronConfig::default().stale_run_ms,
        }
    }

    /// Resolve the store location from `config` and use the system clock.
    pub fn from_config(config: &CronConfig, store_override: Option<&Path>) -> Result<Self> {
        let path = jobclock_config::resolve_store_path(store_override, config)?;
        info!(path = %path.display(), "using job store");
        Ok(Self::new(JobStore::from_config(path, config), Arc::new(SystemClock))
            .with_stale_run_ms(config.stale_run_ms))
    }

    pub fn with_stale_run_ms(mut self, stale_run_ms: i64) -> Self {
        self.stale_run_ms = stale_run_ms;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Add a new job. Returns the fully populated record.
    pub async fn create(&self, input: JobCreate) -> Result<Job> {
        validate_create(&input)?;
        let now = self.clock.now_ms();

        let schedule = anchor_schedule(input.schedule, now);
        let next_run_at_ms = if input.enabled {
            compute_next_run(&schedule, now)?
        } else {
            None
        };

        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            name: input.name,
            description: input.description,
            enabled: input.enabled,
            schedule,
            payload: input.payload,
            delete_after_run: input.delete_after_run,
            session_target: input.session_target,
            wake_mode: input.wake_mode,
            agent_id: input.agent_id,
            isolation: input.isolation,
            created_at_ms: now,
            updated_at_ms: now,
            state: JobState {
                next_run_at_ms,
                ..JobState::default()
            },
        };

        let job = self
            .store
            .mutate(move |file| {
                file.jobs.push(job.clone());
                Ok(Mutation::changed(job))
            })
            .await?;

        info!(
            job_id = %job.id,
            name = %job.name,
            kind = job.schedule.kind(),
            next_run_at_ms = ?job.state.next_run_at_ms,
            "job created"
        );
        Ok(job)
    }

    /// Get a job by ID.
    pub async fn get(&self, id: &str) -> Result<Job> {
        let file = self.store.load().await?;
        file.find(id).cloned().ok_or_else(|| CronError::not_found(id))
    }

    /// List jobs, soonest first. Disabled jobs only when asked for.
    pub async fn list(&self, include_disabled: bool) -> Result<Vec<Job>> {
        let file = self.store.load().await?;
        let mut jobs: Vec<Job> = file
            .jobs
            .into_iter()
            .filter(|j| include_disabled || j.enabled)
            .collect();
        jobs.sort_by(|a, b| {
            let a_key = (a.state.next_run_at_ms.is_none(), a.state.next_run_at_ms);
            let b_key = (b.state.next_run_at_ms.is_none(), b.state.next_run_at_ms);
            a_key.cmp(&b_key).then_with(|| a.id.cmp(&b.id))
        });
        Ok(jobs)
    }

    /// Apply a partial update. Fails without touching the job if any part
    /// of the patch is invalid.
    pub async fn update(&self, id: &str, patch: JobPatch) -> Result<Job> {
        let now = self.clock.now_ms();
        let reschedule = patch.schedule.is_some() || patch.enabled.is_some();

        let job = self
            .store
            .mutate(|file| {
                let idx = file.position(id).ok_or_else(|| CronError::not_found(id))?;
                let existing = &file.jobs[idx];
                let patched = apply_fields(existing, &patch, now)?;

                let next_run_at_ms = if !patched.enabled {
                    None
                } else if reschedule {
                    compute_next_run(&patched.schedule, now)?
                } else {
                    existing.state.next_run_at_ms
                };
                let updated = Job {
                    state: JobState {
                        next_run_at_ms,
                        ..patched.state
                    },
                    ..patched
                };

                file.jobs[idx] = updated.clone();
                Ok(Mutation::changed(updated))
            })
            .await?;

        info!(
            job_id = %job.id,
            enabled = job.enabled,
            next_run_at_ms = ?job.state.next_run_at_ms,
            "job updated"
        );
        Ok(job)
    }

    /// Remove a job. Returns whether anything was removed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let removed = self
            .store
            .mutate(|file| match file.position(id) {
                Some(idx) => {
                    file.jobs.remove(idx);
                    Ok(Mutation::changed(true))
                }
                None => Ok(Mutation::unchanged(false)),
            })
            .await?;
        if removed {
            info!(job_id = %id, "job removed");
        }
        Ok(removed)
    }

    /// Record that a run has started. Calling it again on a running job
    /// refreshes the start time.
    pub async fn mark_running(&self, id: &str) -> Result<Job> {
        let now = self.clock.now_ms();
        self.store
            .mutate(|file| {
                let idx = file.position(id).ok_or_else(|| CronError::not_found(id))?;
                let existing = &file.jobs[idx];
                if let Some(started) = existing.state.running_at_ms {
                    debug!(job_id = %id, started, "job already running, refreshing start time");
                }
                let updated = Job {
                    state: JobState {
                        running_at_ms: Some(now),
                        ..existing.state.clone()
                    },
                    ..existing.clone()
                };
                file.jobs[idx] = updated.clone();
                Ok(Mutation::changed(updated))
            })
            .await
    }

    /// Record the end of a run and schedule the next one.
    ///
    /// Returns `None` when a successful one-shot run deleted the job.
    pub async fn mark_completed(&self, id: &str, outcome: RunOutcome) -> Result<Option<Job>> {
        if outcome.duration_ms < 0 {
            return Err(CronError::Validation(format!(
                "durationMs must not be negative, got {}",
                outcome.duration_ms
            )));
        }
        let now = self.clock.now_ms();

        let result = self
            .store
            .mutate(|file| {
                let idx = file.position(id).ok_or_else(|| CronError::not_found(id))?;
                let existing = &file.jobs[idx];

                let finished = JobState {
                    running_at_ms: None,
                    last_run_at_ms: Some(now),
                    last_status: Some(outcome.status),
                    last_error: outcome.error.clone(),
                    last_duration_ms: Some(outcome.duration_ms),
                    next_run_at_ms: existing.state.next_run_at_ms,
                };

                if existing.schedule.is_one_shot() && outcome.status == RunStatus::Ok {
                    if existing.delete_after_run {
                        file.jobs.remove(idx);
                        return Ok(Mutation::changed(None));
                    }
                    let disabled = Job {
                        enabled: false,
                        updated_at_ms: now,
                        state: JobState {
                            next_run_at_ms: None,
                            ..finished
                        },
                        ..existing.clone()
                    };
                    file.jobs[idx] = disabled.clone();
                    return Ok(Mutation::changed(Some(disabled)));
                }

                let state = if existing.enabled {
                    let next = completion_schedule(&existing.schedule, now);
                    reschedule_state(&existing.id, &next, now, finished)
                } else {
                    JobState {
                        next_run_at_ms: None,
                        ..finished
                    }
                };
                let updated = Job {
                    state,
                    ..existing.clone()
                };
                file.jobs[idx] = updated.clone();
                Ok(Mutation::changed(Some(updated)))
            })
            .await?;

        match &result {
            Some(job) => info!(
                job_id = %id,
                status = %outcome.status,
                duration_ms = outcome.duration_ms,
                enabled = job.enabled,
                next_run_at_ms = ?job.state.next_run_at_ms,
                "job run completed"
            ),
            None => info!(job_id = %id, "one-shot job completed and deleted"),
        }
        Ok(result)
    }

    /// Jobs due at `reference_ms`, earliest first.
    pub async fn due_jobs(&self, reference_ms: i64) -> Result<Vec<Job>> {
        let file = self.store.load().await?;
        Ok(select_due(&file.jobs, reference_ms))
    }

    /// Job counts and the earliest upcoming run.
    pub async fn status(&self) -> Result<CronStatus> {
        let file = self.store.load().await?;
        Ok(summarize(&file.jobs))
    }

    /// Release jobs whose run started longer ago than the stale threshold,
    /// so an executor that died mid-run does not block them forever.
    /// Returns the IDs of the released jobs.
    pub async fn clear_stale_runs(&self) -> Result<Vec<String>> {
        let now = self.clock.now_ms();
        let max_age_ms = self.stale_run_ms;

        let cleared = self
            .store
            .mutate(|file| {
                let mut cleared = Vec::new();
                for slot in file.jobs.iter_mut() {
                    let Some(started) = slot.state.running_at_ms else {
                        continue;
                    };
                    let age_ms = now.saturating_sub(started);
                    if age_ms <= max_age_ms {
                        continue;
                    }

                    let released = JobState {
                        running_at_ms: None,
                        last_status: Some(RunStatus::Error),
                        last_error: Some(format!("run abandoned after {age_ms}ms")),
                        ..slot.state.clone()
                    };
                    let state = if slot.enabled && released.next_run_at_ms.is_none() {
                        reschedule_state(&slot.id, &slot.schedule, now, released)
                    } else {
                        released
                    };
                    warn!(job_id = %slot.id, started, "clearing stale run");
                    *slot = Job {
                        state,
                        ..slot.clone()
                    };
                    cleared.push(slot.id.clone());
                }

                if cleared.is_empty() {
                    Ok(Mutation::unchanged(cleared))
                } else {
                    Ok(Mutation::changed(cleared))
                }
            })
            .await?;
        Ok(cleared)
    }
}

/// The schedule used to pick the next run after a completion. Interval jobs
/// restart their period at the completion time so a late run never queues
/// catch-up runs.
fn completion_schedule(schedule: &Schedule, completed_at_ms: i64) -> Schedule {
    match schedule {
        Schedule::Every { interval_ms, .. } => Schedule::Every {
            interval_ms: *interval_ms,
            anchor_ms: Some(completed_at_ms),
        },
        other => other.clone(),
    }
}

/// Compute the next run into `state`. An unevaluable schedule leaves the job
/// unscheduled with the reason recorded, instead of failing the operation.
fn reschedule_state(job_id: &str, schedule: &Schedule, now: i64, state: JobState) -> JobState {
    match compute_next_run(schedule, now) {
        Ok(next_run_at_ms) => JobState {
            next_run_at_ms,
            ..state
        },
        Err(e) => {
            warn!(job_id = %job_id, "cannot compute next run: {e}");
            JobState {
                next_run_at_ms: None,
                last_error: Some(e.to_string()),
                ..state
            }
        }
    }
}

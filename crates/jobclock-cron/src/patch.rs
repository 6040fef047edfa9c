//! Input validation and variant-aware patching.
//!
//! All functions here are pure and build new values; stored jobs are never
//! modified in place.

use jobclock_types::{Job, JobCreate, JobPatch, Payload, PayloadPatch, Schedule};

use crate::error::{CronError, Result};
use crate::schedule::validate_schedule;

/// Validate everything `create` needs before touching the store.
pub fn validate_create(input: &JobCreate) -> Result<()> {
    validate_name(&input.name)?;
    validate_schedule(&input.schedule)?;
    validate_payload(&input.payload)
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CronError::Validation("name must not be empty".into()));
    }
    Ok(())
}

pub fn validate_payload(payload: &Payload) -> Result<()> {
    match payload {
        Payload::SystemEvent { text } => {
            if text.trim().is_empty() {
                return Err(CronError::Validation(
                    "systemEvent payload requires non-empty text".into(),
                ));
            }
        }
        Payload::AgentTurn {
            message,
            timeout_seconds,
            ..
        } => {
            if message.trim().is_empty() {
                return Err(CronError::Validation(
                    "agentTurn payload requires a non-empty message".into(),
                ));
            }
            if *timeout_seconds == Some(0) {
                return Err(CronError::Validation(
                    "agentTurn timeoutSeconds must be positive".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Pin an `every` schedule without an anchor to `now_ms`.
pub fn anchor_schedule(schedule: Schedule, now_ms: i64) -> Schedule {
    match schedule {
        Schedule::Every {
            interval_ms,
            anchor_ms: None,
        } => Schedule::Every {
            interval_ms,
            anchor_ms: Some(now_ms),
        },
        other => other,
    }
}

/// Apply a payload patch.
///
/// Same kind: absent fields are carried over from `existing`.
/// Different kind: the patch replaces the payload and must be complete.
pub fn merge_payload(existing: &Payload, patch: &PayloadPatch) -> Result<Payload> {
    let merged = match (existing, patch) {
        (Payload::SystemEvent { text }, PayloadPatch::SystemEvent { text: new_text }) => {
            Payload::SystemEvent {
                text: new_text.clone().unwrap_or_else(|| text.clone()),
            }
        }
        (
            Payload::AgentTurn {
                message,
                model,
                thinking,
                timeout_seconds,
                deliver,
                channel,
                to,
                best_effort_deliver,
            },
            PayloadPatch::AgentTurn {
                message: new_message,
                model: new_model,
                thinking: new_thinking,
                timeout_seconds: new_timeout,
                deliver: new_deliver,
                channel: new_channel,
                to: new_to,
                best_effort_deliver: new_best_effort,
            },
        ) => Payload::AgentTurn {
            message: new_message.clone().unwrap_or_else(|| message.clone()),
            model: patched(new_model, model),
            thinking: patched(new_thinking, thinking),
            timeout_seconds: patched(new_timeout, timeout_seconds),
            deliver: patched(new_deliver, deliver),
            channel: patched(new_channel, channel),
            to: patched(new_to, to),
            best_effort_deliver: patched(new_best_effort, best_effort_deliver),
        },
        (_, patch) => payload_from_patch(patch)?,
    };
    validate_payload(&merged)?;
    Ok(merged)
}

fn payload_from_patch(patch: &PayloadPatch) -> Result<Payload> {
    match patch {
        PayloadPatch::SystemEvent { text } => {
            let text = text.clone().ok_or_else(|| {
                CronError::Validation("payload kind changed to systemEvent: text is required".into())
            })?;
            Ok(Payload::SystemEvent { text })
        }
        PayloadPatch::AgentTurn {
            message,
            model,
            thinking,
            timeout_seconds,
            deliver,
            channel,
            to,
            best_effort_deliver,
        } => {
            let message = message.clone().ok_or_else(|| {
                CronError::Validation(
                    "payload kind changed to agentTurn: message is required".into(),
                )
            })?;
            Ok(Payload::AgentTurn {
                message,
                model: model.clone().flatten(),
                thinking: thinking.clone().flatten(),
                timeout_seconds: timeout_seconds.flatten(),
                deliver: deliver.flatten(),
                channel: channel.clone().flatten(),
                to: to.clone().flatten(),
                best_effort_deliver: best_effort_deliver.flatten(),
            })
        }
    }
}

/// Apply a clearable field: absent keeps `current`, `Some(None)` clears it.
fn patched<T: Clone>(patch: &Option<Option<T>>, current: &Option<T>) -> Option<T> {
    match patch {
        Some(value) => value.clone(),
        None => current.clone(),
    }
}

/// Build the patched job's fields. Scheduling state is left to the caller.
pub fn apply_fields(existing: &Job, patch: &JobPatch, now_ms: i64) -> Result<Job> {
    if let Some(name) = &patch.name {
        validate_name(name)?;
    }
    let schedule = match &patch.schedule {
        Some(schedule) => {
            validate_schedule(schedule)?;
            anchor_schedule(schedule.clone(), now_ms)
        }
        None => existing.schedule.clone(),
    };
    let payload = match &patch.payload {
        Some(payload_patch) => merge_payload(&existing.payload, payload_patch)?,
        None => existing.payload.clone(),
    };

    Ok(Job {
        id: existing.id.clone(),
        name: patch.name.clone().unwrap_or_else(|| existing.name.clone()),
        description: patched(&patch.description, &existing.description),
        enabled: patch.enabled.unwrap_or(existing.enabled),
        schedule,
        payload,
        delete_after_run: patch.delete_after_run.unwrap_or(existing.delete_after_run),
        session_target: patched(&patch.session_target, &existing.session_target),
        wake_mode: patched(&patch.wake_mode, &existing.wake_mode),
        agent_id: patched(&patch.agent_id, &existing.agent_id),
        isolation: patched(&patch.isolation, &existing.isolation),
        created_at_ms: existing.created_at_ms,
        updated_at_ms: now_ms,
        state: existing.state.clone(),
    })
}

//! Due-job selection over a loaded collection.

use jobclock_types::{CronStatus, Job};

/// A job is due when it is enabled, not running, and its next run has arrived.
pub fn is_due(job: &Job, reference_ms: i64) -> bool {
    job.enabled
        && job.state.running_at_ms.is_none()
        && job
            .state
            .next_run_at_ms
            .is_some_and(|next| next <= reference_ms)
}

/// Jobs due at `reference_ms`, earliest first, ties broken by id.
pub fn select_due(jobs: &[Job], reference_ms: i64) -> Vec<Job> {
    let mut due: Vec<Job> = jobs
        .iter()
        .filter(|j| is_due(j, reference_ms))
        .cloned()
        .collect();
    due.sort_by(|a, b| {
        a.state
            .next_run_at_ms
            .cmp(&b.state.next_run_at_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
    due
}

/// Counts plus the earliest upcoming run among enabled jobs.
pub fn summarize(jobs: &[Job]) -> CronStatus {
    CronStatus {
        job_count: jobs.len(),
        enabled_count: jobs.iter().filter(|j| j.enabled).count(),
        running_count: jobs.iter().filter(|j| j.is_running()).count(),
        next_run_at_ms: jobs
            .iter()
            .filter(|j| j.enabled)
            .filter_map(|j| j.state.next_run_at_ms)
            .min(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobclock_types::{JobState, Payload, Schedule};

    fn job(id: &str, enabled: bool, next: Option<i64>, running: Option<i64>) -> Job {
        Job {
            id: id.into(),
            name: id.into(),
            description: None,
            enabled,
            schedule: Schedule::Every {
                interval_ms: 1000,
                anchor_ms: Some(0),
            },
            payload: Payload::SystemEvent { text: "t".into() },
            delete_after_run: false,
            session_target: None,
            wake_mode: None,
            agent_id: None,
            isolation: None,
            created_at_ms: 0,
            updated_at_ms: 0,
            state: JobState {
                next_run_at_ms: next,
                running_at_ms: running,
                ..JobState::default()
            },
        }
    }

    #[test]
    fn test_due_predicate() {
        assert!(is_due(&job("a", true, Some(100), None), 100));
        assert!(is_due(&job("a", true, Some(50), None), 100));
        assert!(!is_due(&job("a", true, Some(101), None), 100));
        assert!(!is_due(&job("a", false, Some(50), None), 100));
        assert!(!is_due(&job("a", true, None, None), 100));
        // Running jobs are never due, however overdue.
        assert!(!is_due(&job("a", true, Some(0), Some(10)), i64::MAX));
    }

    #[test]
    fn test_select_due_orders_by_time_then_id() {
        let jobs = vec![
            job("c", true, Some(300), None),
            job("b", true, Some(100), None),
            job("a", true, Some(100), None),
            job("late", true, Some(900), None),
            job("off", false, Some(50), None),
            job("busy", true, Some(10), Some(10)),
        ];
        let ids: Vec<String> = select_due(&jobs, 500).into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_summarize() {
        let jobs = vec![
            job("a", true, Some(300), None),
            job("b", false, Some(100), None),
            job("c", true, Some(200), Some(150)),
            job("d", true, None, None),
        ];
        let status = summarize(&jobs);
        assert_eq!(status.job_count, 4);
        assert_eq!(status.enabled_count, 3);
        assert_eq!(status.running_count, 1);
        assert_eq!(status.next_run_at_ms, Some(200));
    }

    #[test]
    fn test_summarize_empty() {
        let status = summarize(&[]);
        assert_eq!(status, CronStatus::default());
    }
}

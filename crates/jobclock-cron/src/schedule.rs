//! Next-fire-time evaluation for schedules.
//!
//! Everything here is pure: the reference time is always an argument, so the
//! same inputs always produce the same answer.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use jobclock_types::Schedule;

use crate::error::{CronError, Result};

/// Compute the next fire time strictly after `reference_ms`.
///
/// Returns `Ok(None)` when the schedule will never fire again (an elapsed
/// `at`, or a cron expression bounded to past years).
pub fn compute_next_run(schedule: &Schedule, reference_ms: i64) -> Result<Option<i64>> {
    match schedule {
        Schedule::At { at_ms } => Ok((*at_ms > reference_ms).then_some(*at_ms)),

        Schedule::Every {
            interval_ms,
            anchor_ms,
        } => next_interval(*interval_ms, anchor_ms.unwrap_or(reference_ms), reference_ms),

        Schedule::Cron {
            expression,
            timezone,
        } => next_cron(expression, timezone.as_deref(), reference_ms),
    }
}

/// Check that a schedule is well-formed without evaluating it.
pub fn validate_schedule(schedule: &Schedule) -> Result<()> {
    match schedule {
        Schedule::At { .. } => Ok(()),
        Schedule::Every { interval_ms, .. } => {
            if *interval_ms <= 0 {
                return Err(CronError::Schedule(format!(
                    "intervalMs must be positive, got {interval_ms}"
                )));
            }
            Ok(())
        }
        Schedule::Cron {
            expression,
            timezone,
        } => {
            parse_expression(expression)?;
            parse_timezone(timezone.as_deref())?;
            Ok(())
        }
    }
}

/// Smallest `anchor + k * interval` (k >= 0) strictly after `reference`.
fn next_interval(interval_ms: i64, anchor_ms: i64, reference_ms: i64) -> Result<Option<i64>> {
    if interval_ms <= 0 {
        return Err(CronError::Schedule(format!(
            "intervalMs must be positive, got {interval_ms}"
        )));
    }
    if anchor_ms > reference_ms {
        return Ok(Some(anchor_ms));
    }
    reference_ms
        .checked_sub(anchor_ms)
        .map(|elapsed| elapsed / interval_ms + 1)
        .and_then(|steps| steps.checked_mul(interval_ms))
        .and_then(|offset| anchor_ms.checked_add(offset))
        .map(Some)
        .ok_or_else(|| CronError::Schedule("next run overflows the timestamp range".into()))
}

fn next_cron(expression: &str, timezone: Option<&str>, reference_ms: i64) -> Result<Option<i64>> {
    let schedules = parse_expression(expression)?;
    let tz = parse_timezone(timezone)?;
    let reference = DateTime::<Utc>::from_timestamp_millis(reference_ms).ok_or_else(|| {
        CronError::Schedule(format!("reference time {reference_ms} is out of range"))
    })?;
    let reference = reference.with_timezone(&tz);

    // `after` skips to the next whole second; the filter keeps the result
    // strictly later than a reference carrying sub-second millis.
    Ok(schedules
        .iter()
        .filter_map(|schedule| {
            schedule
                .after(&reference)
                .map(|next| next.timestamp_millis())
                .find(|next| *next > reference_ms)
        })
        .min())
}

/// Parse into one schedule, or two whose union is the expression when a
/// 5-field expression restricts both day-of-month and day-of-week.
fn parse_expression(expression: &str) -> Result<Vec<cron::Schedule>> {
    normalize_expression(expression)?
        .iter()
        .map(|normalized| {
            cron::Schedule::from_str(normalized).map_err(|e| {
                CronError::Schedule(format!("invalid cron expression {expression:?}: {e}"))
            })
        })
        .collect()
}

fn parse_timezone(timezone: Option<&str>) -> Result<Tz> {
    match timezone.map(str::trim).filter(|tz| !tz.is_empty()) {
        None => Ok(Tz::UTC),
        Some(name) => name
            .parse()
            .map_err(|_| CronError::Schedule(format!("unknown timezone {name:?}"))),
    }
}

/// Convert a 5-field Unix expression to the seconds-first form the `cron`
/// crate parses. 6 and 7 field expressions pass through unchanged.
///
/// Unix cron fires when either day field matches if both are restricted,
/// while the `cron` crate requires both. That case splits into one
/// expression per day field.
fn normalize_expression(expression: &str) -> Result<Vec<String>> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);
            let dow = unix_weekdays_to_names(fields[4]);
            if is_restricted(dom) && is_restricted(fields[4]) {
                Ok(vec![
                    format!("0 {minute} {hour} {dom} {month} *"),
                    format!("0 {minute} {hour} * {month} {dow}"),
                ])
            } else {
                Ok(vec![format!("0 {minute} {hour} {dom} {month} {dow}")])
            }
        }
        6 | 7 => Ok(vec![fields.join(" ")]),
        n => Err(CronError::Schedule(format!(
            "cron expression {expression:?} has {n} fields, expected 5, 6 or 7"
        ))),
    }
}

/// A day field that does not start with `*` (or `?`) restricts the day.
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field.starts_with('?'))
}

const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Unix numbers weekdays 0-7 from Sunday; the `cron` crate numbers them 1-7.
/// Rewrite numeric weekdays as names, which both agree on.
fn unix_weekdays_to_names(field: &str) -> String {
    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            if let (Some((start, end)), Some(step)) = (range.split_once('-'), step) {
                if let Some(days) = expand_stepped_range(start, end, step) {
                    return days;
                }
            }
            let rewritten = match range.split_once('-') {
                Some((start, end)) => {
                    let start = weekday_name(start);
                    match end {
                        // SUN-SUN would be an inverted range once 7 becomes SUN.
                        "7" => format!("{start}-SAT,SUN"),
                        _ => format!("{start}-{}", weekday_name(end)),
                    }
                }
                None => weekday_name(range),
            };
            match step {
                Some(step) => format!("{rewritten}/{step}"),
                None => rewritten,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Step through a numeric range in Unix numbering and list the day names.
/// `None` when the item is not purely numeric, leaving it to the parser.
fn expand_stepped_range(start: &str, end: &str, step: &str) -> Option<String> {
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    let step: usize = step.parse().ok()?;
    if step == 0 || start > end || end >= WEEKDAYS.len() {
        return None;
    }
    let mut days: Vec<&str> = Vec::new();
    for n in (start..=end).step_by(step) {
        if !days.contains(&WEEKDAYS[n]) {
            days.push(WEEKDAYS[n]);
        }
    }
    Some(days.join(","))
}

fn weekday_name(token: &str) -> String {
    match token.parse::<usize>() {
        Ok(n) if n < WEEKDAYS.len() => WEEKDAYS[n].to_string(),
        _ => token.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ms(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn test_at_future_and_past() {
        let at = Schedule::At { at_ms: 5000 };
        assert_eq!(compute_next_run(&at, 4999).unwrap(), Some(5000));
        assert_eq!(compute_next_run(&at, 5000).unwrap(), None);
        assert_eq!(compute_next_run(&at, 9000).unwrap(), None);
    }

    #[test]
    fn test_every_aligns_to_anchor() {
        let every = Schedule::Every {
            interval_ms: 60_000,
            anchor_ms: Some(0),
        };
        assert_eq!(compute_next_run(&every, 0).unwrap(), Some(60_000));
        assert_eq!(compute_next_run(&every, 59_999).unwrap(), Some(60_000));
        assert_eq!(compute_next_run(&every, 60_000).unwrap(), Some(120_000));
        assert_eq!(compute_next_run(&every, 60_500).unwrap(), Some(120_000));
    }

    #[test]
    fn test_every_future_anchor_is_first_fire() {
        let every = Schedule::Every {
            interval_ms: 1000,
            anchor_ms: Some(50_000),
        };
        assert_eq!(compute_next_run(&every, 10_000).unwrap(), Some(50_000));
    }

    #[test]
    fn test_every_without_anchor_counts_from_reference() {
        let every = Schedule::Every {
            interval_ms: 1000,
            anchor_ms: None,
        };
        assert_eq!(compute_next_run(&every, 12_345).unwrap(), Some(13_345));
    }

    #[test]
    fn test_every_rejects_non_positive_interval() {
        let every = Schedule::Every {
            interval_ms: 0,
            anchor_ms: None,
        };
        assert!(matches!(
            compute_next_run(&every, 0),
            Err(CronError::Schedule(_))
        ));
        assert!(validate_schedule(&every).is_err());
    }

    #[test]
    fn test_every_extreme_anchor_is_schedule_error() {
        let every = Schedule::Every {
            interval_ms: 1000,
            anchor_ms: Some(i64::MIN),
        };
        assert!(matches!(
            compute_next_run(&every, 1_000),
            Err(CronError::Schedule(_))
        ));

        let every = Schedule::Every {
            interval_ms: 1000,
            anchor_ms: Some(i64::MAX - 10),
        };
        assert_eq!(
            compute_next_run(&every, 1_000).unwrap(),
            Some(i64::MAX - 10)
        );
    }

    #[test]
    fn test_recurring_results_strictly_after_reference() {
        let schedules = [
            Schedule::Every {
                interval_ms: 7,
                anchor_ms: Some(3),
            },
            Schedule::Cron {
                expression: "* * * * *".into(),
                timezone: None,
            },
            Schedule::Cron {
                expression: "*/15 * * * * *".into(),
                timezone: Some("Asia/Tokyo".into()),
            },
        ];
        let base = ms(2026, 3, 1, 12, 0, 0);
        for schedule in &schedules {
            for offset in [0, 1, 999, 1000, 59_999, 60_000, 86_400_001] {
                let reference = base + offset;
                let next = compute_next_run(schedule, reference).unwrap().unwrap();
                assert!(next > reference, "{schedule:?} at {reference} gave {next}");
            }
        }
    }

    #[test]
    fn test_cron_daily_utc() {
        let schedule = Schedule::Cron {
            expression: "0 0 * * *".into(),
            timezone: None,
        };
        let next = compute_next_run(&schedule, ms(2026, 1, 19, 10, 30, 0)).unwrap();
        assert_eq!(next, Some(ms(2026, 1, 20, 0, 0, 0)));
    }

    #[test]
    fn test_cron_exact_match_moves_forward() {
        let schedule = Schedule::Cron {
            expression: "30 10 * * *".into(),
            timezone: Some("UTC".into()),
        };
        let next = compute_next_run(&schedule, ms(2026, 1, 19, 10, 30, 0)).unwrap();
        assert_eq!(next, Some(ms(2026, 1, 20, 10, 30, 0)));
    }

    #[test]
    fn test_cron_in_timezone() {
        // 09:00 in New York during EST is 14:00 UTC.
        let schedule = Schedule::Cron {
            expression: "0 9 * * *".into(),
            timezone: Some("America/New_York".into()),
        };
        let next = compute_next_run(&schedule, ms(2026, 1, 19, 15, 0, 0)).unwrap();
        assert_eq!(next, Some(ms(2026, 1, 20, 14, 0, 0)));
    }

    #[test]
    fn test_cron_unix_weekday_numbers() {
        // 2026-01-17 is a Saturday; "1-5" means Monday to Friday.
        let schedule = Schedule::Cron {
            expression: "0 8 * * 1-5".into(),
            timezone: None,
        };
        let next = compute_next_run(&schedule, ms(2026, 1, 17, 12, 0, 0)).unwrap();
        assert_eq!(next, Some(ms(2026, 1, 19, 8, 0, 0)));

        // 0 and 7 are both Sunday.
        for dow in ["0", "7"] {
            let schedule = Schedule::Cron {
                expression: format!("0 8 * * {dow}"),
                timezone: None,
            };
            let next = compute_next_run(&schedule, ms(2026, 1, 17, 12, 0, 0)).unwrap();
            assert_eq!(next, Some(ms(2026, 1, 18, 8, 0, 0)));
        }

        // Stepped range up to 7: Monday, Wednesday, Friday, Sunday.
        let schedule = Schedule::Cron {
            expression: "0 8 * * 1-7/2".into(),
            timezone: None,
        };
        assert!(validate_schedule(&schedule).is_ok());
        let next = compute_next_run(&schedule, ms(2026, 1, 17, 12, 0, 0)).unwrap();
        assert_eq!(next, Some(ms(2026, 1, 18, 8, 0, 0)));
        let next = compute_next_run(&schedule, ms(2026, 1, 18, 12, 0, 0)).unwrap();
        assert_eq!(next, Some(ms(2026, 1, 19, 8, 0, 0)));
        let next = compute_next_run(&schedule, ms(2026, 1, 19, 12, 0, 0)).unwrap();
        assert_eq!(next, Some(ms(2026, 1, 21, 8, 0, 0)));
    }

    #[test]
    fn test_cron_day_of_month_or_day_of_week() {
        // Both day fields restricted: the 1st of the month or any Monday.
        let schedule = Schedule::Cron {
            expression: "0 0 1 * 1".into(),
            timezone: None,
        };
        let next = compute_next_run(&schedule, ms(2026, 1, 2, 0, 0, 0)).unwrap();
        assert_eq!(next, Some(ms(2026, 1, 5, 0, 0, 0)));
        // 2026-02-01 is a Sunday, ahead of the first Monday.
        let next = compute_next_run(&schedule, ms(2026, 1, 31, 12, 0, 0)).unwrap();
        assert_eq!(next, Some(ms(2026, 2, 1, 0, 0, 0)));

        // A starred day-of-month keeps plain matching.
        let schedule = Schedule::Cron {
            expression: "0 0 * * 1".into(),
            timezone: None,
        };
        let next = compute_next_run(&schedule, ms(2026, 1, 31, 12, 0, 0)).unwrap();
        assert_eq!(next, Some(ms(2026, 2, 2, 0, 0, 0)));
    }

    #[test]
    fn test_weekday_rewrite() {
        assert_eq!(unix_weekdays_to_names("*"), "*");
        assert_eq!(unix_weekdays_to_names("1-5"), "MON-FRI");
        assert_eq!(unix_weekdays_to_names("0,6"), "SUN,SAT");
        assert_eq!(unix_weekdays_to_names("3-7"), "WED-SAT,SUN");
        assert_eq!(unix_weekdays_to_names("1-7/2"), "MON,WED,FRI,SUN");
        assert_eq!(unix_weekdays_to_names("0-7/7"), "SUN");
        assert_eq!(unix_weekdays_to_names("MON-FRI/2"), "MON-FRI/2");
        assert_eq!(unix_weekdays_to_names("*/2"), "*/2");
        assert_eq!(unix_weekdays_to_names("MON-FRI"), "MON-FRI");
    }

    #[test]
    fn test_cron_seconds_field() {
        let schedule = Schedule::Cron {
            expression: "*/10 * * * * *".into(),
            timezone: None,
        };
        let reference = ms(2026, 1, 1, 0, 0, 0) + 500;
        let next = compute_next_run(&schedule, reference).unwrap();
        assert_eq!(next, Some(ms(2026, 1, 1, 0, 0, 10)));
    }

    #[test]
    fn test_malformed_cron_is_schedule_error() {
        for expression in ["not a cron", "61 * * * *", "* * *"] {
            let schedule = Schedule::Cron {
                expression: expression.into(),
                timezone: None,
            };
            assert!(
                matches!(compute_next_run(&schedule, 0), Err(CronError::Schedule(_))),
                "{expression} should fail"
            );
            assert!(validate_schedule(&schedule).is_err());
        }
    }

    #[test]
    fn test_unknown_timezone_is_schedule_error() {
        let schedule = Schedule::Cron {
            expression: "0 9 * * *".into(),
            timezone: Some("Mars/Olympus_Mons".into()),
        };
        assert!(matches!(
            validate_schedule(&schedule),
            Err(CronError::Schedule(_))
        ));
    }
}

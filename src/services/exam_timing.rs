use std::time::Duration;

use time::PrimitiveDateTime;

use crate::core::time::{add_std, until};
use crate::db::models::QuestionSet;

/// Time allowed for one attempt: the set's own duration, else the configured default.
pub(crate) fn attempt_duration(set: &QuestionSet, default_minutes: u64) -> Duration {
    match set.duration_seconds {
        Some(seconds) if seconds > 0 => Duration::from_secs(seconds as u64),
        _ => Duration::from_secs(default_minutes.saturating_mul(60)),
    }
}

/// `started_at + duration`, cut short when the exam window closes earlier.
pub(crate) fn compute_deadline(
    started_at: PrimitiveDateTime,
    duration: Duration,
    available_until: Option<PrimitiveDateTime>,
) -> PrimitiveDateTime {
    let by_duration = add_std(started_at, duration);
    match available_until {
        Some(until) if until < by_duration => until.max(started_at),
        _ => by_duration,
    }
}

/// Seconds spent on the attempt. Time after the deadline is not counted.
pub(crate) fn time_taken_seconds(
    started_at: PrimitiveDateTime,
    deadline: PrimitiveDateTime,
    ended_at: Option<PrimitiveDateTime>,
) -> i64 {
    let end = ended_at.map_or(deadline, |ended| ended.min(deadline));
    until(started_at, end).as_secs().min(i64::MAX as u64) as i64
}

//! Pure delay and priority computation.
//!
//! These functions are deterministic and side-effect free; the queue and
//! workers call them but never the other way around. All timestamps are
//! monotonic UTC.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use super::types::Priority;

/// Compute the delay until a feed's next refresh is due.
///
/// `delay = max(0, (last_fetched_at ?? now) + interval - now)`. A feed that
/// has never been fetched is due immediately.
pub fn compute_delay(
    last_fetched_at: Option<DateTime<Utc>>,
    interval_minutes: u32,
    now: DateTime<Utc>,
) -> Duration {
    let last = match last_fetched_at {
        Some(last) => last,
        None => return Duration::ZERO,
    };
    let due = last + ChronoDuration::minutes(interval_minutes as i64);
    (due - now).to_std().unwrap_or(Duration::ZERO)
}

/// Compute the priority tier for a feed's next refresh.
///
/// `force_immediate` always wins. A feed more than twice its interval
/// behind is overdue; exactly twice is still normal. A never-fetched feed
/// is normal (there is no prior fetch to be overdue from).
pub fn compute_priority(
    last_fetched_at: Option<DateTime<Utc>>,
    interval_minutes: u32,
    now: DateTime<Utc>,
    force_immediate: bool,
) -> Priority {
    if force_immediate {
        return Priority::Manual;
    }
    let last = match last_fetched_at {
        Some(last) => last,
        None => return Priority::Normal,
    };
    if now - last > ChronoDuration::minutes(2 * interval_minutes as i64) {
        Priority::Overdue
    } else {
        Priority::Normal
    }
}
